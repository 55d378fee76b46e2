use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::business::BusinessId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactDetails {
    /// Fills only the fields that are still unknown.
    pub fn fill_missing(&mut self, other: ContactDetails) {
        if self.email.is_none() {
            self.email = other.email;
        }
        if self.phone.is_none() {
            self.phone = other.phone;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.email.is_some() && self.phone.is_some()
    }
}

/// Outcome of the model-backed name lookup for one persistence round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameInference {
    /// The lookup was skipped this round.
    NotEvaluated,
    /// The model answered with the `null` sentinel.
    NoName,
    Found(String),
}

impl NameInference {
    const MAX_NAME_CHARS: usize = 60;
    const MAX_NAME_WORDS: usize = 4;

    pub fn from_model_output(raw: &str) -> Self {
        let first_line = raw.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
        let candidate = first_line.trim_matches(|c: char| {
            c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.' | '!' | ',')
        });

        if candidate.is_empty()
            || candidate.eq_ignore_ascii_case("null")
            || candidate.eq_ignore_ascii_case("none")
            || candidate.chars().count() > Self::MAX_NAME_CHARS
            || candidate.split_whitespace().count() > Self::MAX_NAME_WORDS
        {
            return Self::NoName;
        }

        Self::Found(candidate.to_string())
    }

    pub fn was_evaluated(&self) -> bool {
        !matches!(self, Self::NotEvaluated)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Found(name) => Some(name),
            Self::NotEvaluated | Self::NoName => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatLifecycle {
    Draft,
    Persisted,
    Updated,
    Deleted,
}

impl ChatLifecycle {
    pub fn can_transition_to(&self, next: ChatLifecycle) -> bool {
        matches!(
            (self, next),
            (ChatLifecycle::Draft, ChatLifecycle::Persisted)
                | (ChatLifecycle::Persisted, ChatLifecycle::Updated)
                | (ChatLifecycle::Updated, ChatLifecycle::Updated)
                | (ChatLifecycle::Persisted, ChatLifecycle::Deleted)
                | (ChatLifecycle::Updated, ChatLifecycle::Deleted)
        )
    }
}

/// Which contact fields are already on file for the active chat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContactStatus {
    pub name: bool,
    pub email: bool,
    pub phone: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub business_id: BusinessId,
    pub chat_number: i64,
    pub summary: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub messages: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// Payload for the first persistence of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChat {
    pub business_id: BusinessId,
    pub summary: String,
    pub messages: Vec<Turn>,
    pub contact: ContactDetails,
    pub name: NameInference,
}

/// Payload for every later persistence of the same conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatUpdate {
    pub summary: String,
    pub messages: Vec<Turn>,
    pub contact: ContactDetails,
    pub name: NameInference,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    pub business_id: BusinessId,
    pub chat_number: i64,
    pub summary: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl ChatRecord {
    pub fn create(new_chat: NewChat, id: ChatId, chat_number: i64, now: DateTime<Utc>) -> Self {
        let contact_name = new_chat.name.name().map(ToString::to_string);
        Self {
            id,
            business_id: new_chat.business_id,
            chat_number,
            summary: new_chat.summary,
            contact_name,
            contact_email: new_chat.contact.email,
            contact_phone: new_chat.contact.phone,
            messages: new_chat.messages,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    pub fn lifecycle(&self) -> ChatLifecycle {
        if self.is_deleted {
            ChatLifecycle::Deleted
        } else if self.updated_at > self.created_at {
            ChatLifecycle::Updated
        } else {
            ChatLifecycle::Persisted
        }
    }

    /// Replaces summary and transcript, merging contact fields so a known
    /// value is never replaced by an absent one.
    pub fn apply_update(
        &mut self,
        update: ChatUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_transition(ChatLifecycle::Updated)?;

        self.summary = update.summary;
        self.messages = update.messages;
        if let Some(email) = update.contact.email {
            self.contact_email = Some(email);
        }
        if let Some(phone) = update.contact.phone {
            self.contact_phone = Some(phone);
        }
        if let NameInference::Found(name) = update.name {
            self.contact_name = Some(name);
        }
        self.updated_at = now.max(self.updated_at);
        Ok(())
    }

    pub fn mark_deleted(&mut self) -> Result<(), DomainError> {
        if self.is_deleted {
            return Ok(());
        }
        self.ensure_transition(ChatLifecycle::Deleted)?;
        self.is_deleted = true;
        Ok(())
    }

    pub fn contact_status(&self) -> ContactStatus {
        ContactStatus {
            name: self.contact_name.is_some(),
            email: self.contact_email.is_some(),
            phone: self.contact_phone.is_some(),
        }
    }

    pub fn summarize(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            business_id: self.business_id.clone(),
            chat_number: self.chat_number,
            summary: self.summary.clone(),
            contact_name: self.contact_name.clone(),
            contact_email: self.contact_email.clone(),
            contact_phone: self.contact_phone.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            is_deleted: self.is_deleted,
        }
    }

    fn ensure_transition(&self, next: ChatLifecycle) -> Result<(), DomainError> {
        let current = self.lifecycle();
        if current.can_transition_to(next) {
            return Ok(());
        }
        Err(DomainError::InvalidChatTransition { from: current, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::business::BusinessId;
    use crate::errors::DomainError;

    use super::{
        ChatId, ChatLifecycle, ChatRecord, ChatUpdate, ContactDetails, NameInference, NewChat,
        Turn,
    };

    fn record(email: Option<&str>, name: Option<&str>) -> ChatRecord {
        let mut record = ChatRecord::create(
            NewChat {
                business_id: BusinessId("B1".to_string()),
                summary: "Painting quote".to_string(),
                messages: vec![Turn::user("hi")],
                contact: ContactDetails { email: email.map(ToString::to_string), phone: None },
                name: NameInference::NotEvaluated,
            },
            ChatId("chat-1".to_string()),
            1,
            Utc::now() - Duration::minutes(5),
        );
        record.contact_name = name.map(ToString::to_string);
        record
    }

    fn update(email: Option<&str>, name: NameInference) -> ChatUpdate {
        ChatUpdate {
            summary: "Updated".to_string(),
            messages: vec![Turn::user("hi"), Turn::assistant("hello")],
            contact: ContactDetails { email: email.map(ToString::to_string), phone: None },
            name,
        }
    }

    #[test]
    fn update_keeps_known_email_when_incoming_is_absent() {
        let mut record = record(Some("a@x.com"), None);
        record.apply_update(update(None, NameInference::NotEvaluated), Utc::now()).expect("update");

        assert_eq!(record.contact_email.as_deref(), Some("a@x.com"));
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.summary, "Updated");
        assert_eq!(record.lifecycle(), ChatLifecycle::Updated);
    }

    #[test]
    fn update_replaces_email_when_incoming_is_present() {
        let mut record = record(Some("a@x.com"), None);
        record
            .apply_update(update(Some("b@x.com"), NameInference::NotEvaluated), Utc::now())
            .expect("update");

        assert_eq!(record.contact_email.as_deref(), Some("b@x.com"));
    }

    #[test]
    fn name_is_kept_unless_inference_found_one() {
        let mut record = record(None, Some("Sam"));
        record.apply_update(update(None, NameInference::NoName), Utc::now()).expect("update");
        assert_eq!(record.contact_name.as_deref(), Some("Sam"));

        record.apply_update(update(None, NameInference::NotEvaluated), Utc::now()).expect("update");
        assert_eq!(record.contact_name.as_deref(), Some("Sam"));

        record
            .apply_update(update(None, NameInference::Found("Samantha".to_string())), Utc::now())
            .expect("update");
        assert_eq!(record.contact_name.as_deref(), Some("Samantha"));
    }

    #[test]
    fn deleted_chat_rejects_updates() {
        let mut record = record(None, None);
        record.mark_deleted().expect("delete");
        record.mark_deleted().expect("repeat delete is a no-op");

        let error = record
            .apply_update(update(None, NameInference::NotEvaluated), Utc::now())
            .expect_err("deleted chats are terminal");
        assert!(matches!(
            error,
            DomainError::InvalidChatTransition { from: ChatLifecycle::Deleted, .. }
        ));
    }

    #[test]
    fn model_name_output_is_parsed_with_null_sentinel() {
        assert_eq!(NameInference::from_model_output("null"), NameInference::NoName);
        assert_eq!(NameInference::from_model_output(" NULL \n"), NameInference::NoName);
        assert_eq!(NameInference::from_model_output(""), NameInference::NoName);
        assert_eq!(
            NameInference::from_model_output("\"John\".\n"),
            NameInference::Found("John".to_string())
        );
        assert_eq!(
            NameInference::from_model_output("The customer did not mention a name anywhere"),
            NameInference::NoName
        );
        assert!(!NameInference::NotEvaluated.was_evaluated());
        assert!(NameInference::NoName.was_evaluated());
    }

    #[test]
    fn model_name_output_strips_mixed_quotes_and_punctuation() {
        assert_eq!(NameInference::from_model_output("\"null\"."), NameInference::NoName);
        assert_eq!(NameInference::from_model_output("'None'!"), NameInference::NoName);
        assert_eq!(
            NameInference::from_model_output("`Mary Jane`, "),
            NameInference::Found("Mary Jane".to_string())
        );
        assert_eq!(
            NameInference::from_model_output("John.\"\n"),
            NameInference::Found("John".to_string())
        );
    }

    #[test]
    fn lifecycle_only_allows_documented_transitions() {
        assert!(ChatLifecycle::Draft.can_transition_to(ChatLifecycle::Persisted));
        assert!(ChatLifecycle::Persisted.can_transition_to(ChatLifecycle::Deleted));
        assert!(!ChatLifecycle::Draft.can_transition_to(ChatLifecycle::Deleted));
        assert!(!ChatLifecycle::Deleted.can_transition_to(ChatLifecycle::Updated));
    }
}
