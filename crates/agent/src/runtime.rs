use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use instaquote_core::config::{AppConfig, SessionScope};
use instaquote_core::contact;
use instaquote_core::domain::business::{BusinessConfig, BusinessId};
use instaquote_core::domain::chat::{
    ChatId, ChatRecord, ChatSummary, ContactStatus, NameInference, NewChat, Turn,
};
use instaquote_core::errors::ApplicationError;
use instaquote_core::session::{SessionKey, SessionStore};
use instaquote_db::repositories::{BusinessDirectory, ChatRepository, RepositoryError};

use crate::conversation;
use crate::llm::{backoff_delay, CompletionClient, CompletionPurpose, CompletionRequest};
use crate::prompt::PromptBuilder;

/// Returned to the visitor whenever the model cannot produce a reply.
pub const APOLOGY_REPLY: &str = "Sorry, I'm having trouble putting an estimate together right \
now. Please try again in a moment, or leave your email and we'll get back to you.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssistantSettings {
    pub scope: SessionScope,
    /// Upper bound for one quote exchange, retries included.
    pub exchange_timeout: Duration,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self { scope: SessionScope::Business, exchange_timeout: Duration::from_secs(60) }
    }
}

impl AssistantSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let per_call = Duration::from_secs(config.llm.timeout_secs.max(1));
        let attempts = config.llm.max_retries + 1;
        let backoff = (0..config.llm.max_retries).map(backoff_delay).sum::<Duration>();

        Self {
            scope: config.session.scope,
            exchange_timeout: per_call * attempts + backoff + Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteRequest {
    pub business_id: BusinessId,
    pub message: String,
    pub chat_id: Option<ChatId>,
    /// Client-held transcript, used only to rebuild an empty session.
    pub transcript: Vec<Turn>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteReply {
    pub message: String,
    pub chat_id: Option<ChatId>,
    pub degraded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompleteChatRequest {
    pub business_id: BusinessId,
    pub messages: Vec<Turn>,
    pub chat_id: Option<ChatId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatPersisted {
    pub chat_id: ChatId,
    pub chat_number: i64,
    pub created: bool,
}

/// Orchestrates live quote exchanges and conversation persistence. This is
/// the only entry point the HTTP layer talks to.
pub struct QuoteAssistant {
    sessions: Arc<dyn SessionStore>,
    businesses: Arc<dyn BusinessDirectory>,
    chats: Arc<dyn ChatRepository>,
    llm: Arc<dyn CompletionClient>,
    prompts: PromptBuilder,
    settings: AssistantSettings,
}

fn repository_failure(error: RepositoryError) -> ApplicationError {
    if error.is_not_found() {
        ApplicationError::NotFound(error.to_string())
    } else {
        ApplicationError::Persistence(error.to_string())
    }
}

fn require_business_id(business_id: &BusinessId) -> Result<(), ApplicationError> {
    if business_id.0.trim().is_empty() {
        return Err(ApplicationError::Validation("businessId is required".to_string()));
    }
    Ok(())
}

impl QuoteAssistant {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        businesses: Arc<dyn BusinessDirectory>,
        chats: Arc<dyn ChatRepository>,
        llm: Arc<dyn CompletionClient>,
        settings: AssistantSettings,
    ) -> Self {
        Self { sessions, businesses, chats, llm, prompts: PromptBuilder::new(), settings }
    }

    pub fn settings(&self) -> AssistantSettings {
        self.settings
    }

    async fn business(&self, business_id: &BusinessId) -> Result<BusinessConfig, ApplicationError> {
        self.businesses
            .find_business(business_id)
            .await
            .map_err(repository_failure)?
            .ok_or_else(|| ApplicationError::NotFound(format!("business `{business_id}`")))
    }

    async fn contact_status(
        &self,
        business_id: &BusinessId,
        chat_id: Option<&ChatId>,
    ) -> ContactStatus {
        let Some(chat_id) = chat_id else {
            return ContactStatus::default();
        };

        match self.chats.find(chat_id, business_id).await {
            Ok(Some(chat)) => chat.contact_status(),
            Ok(None) => {
                warn!(
                    event_name = "chat.quote.unknown_chat",
                    business_id = %business_id,
                    chat_id = %chat_id,
                    "chat id not found for business, treating contact details as unknown"
                );
                ContactStatus::default()
            }
            Err(error) => {
                warn!(
                    event_name = "chat.quote.contact_status_failed",
                    business_id = %business_id,
                    chat_id = %chat_id,
                    error = %error,
                    "could not load contact status"
                );
                ContactStatus::default()
            }
        }
    }

    /// Handles one visitor message: append it, ask the model, append the
    /// answer. A failing or slow model yields [`APOLOGY_REPLY`]; the visitor
    /// turn stays in the session either way.
    pub async fn generate_reply(
        &self,
        request: QuoteRequest,
    ) -> Result<QuoteReply, ApplicationError> {
        require_business_id(&request.business_id)?;
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ApplicationError::Validation("message is required".to_string()));
        }

        let business = self.business(&request.business_id).await?;
        let contact = self.contact_status(&business.id, request.chat_id.as_ref()).await;
        let key = SessionKey::resolve(self.settings.scope, &business.id, request.chat_id.as_ref());

        let _exchange = self.sessions.exchange_lock(&key).await;

        if self.sessions.snapshot(&key).await.is_empty() && !request.transcript.is_empty() {
            let mut history = request.transcript.as_slice();
            if history.last().is_some_and(|turn| turn == &Turn::user(message)) {
                history = &history[..history.len() - 1];
            }
            for turn in history {
                self.sessions.append(&key, turn.clone()).await;
            }
        }

        self.sessions.append(&key, Turn::user(message)).await;
        let session = self.sessions.snapshot(&key).await;
        let bundle = self.prompts.build(&business, &session, contact);
        let completion = CompletionRequest {
            purpose: CompletionPurpose::QuoteReply,
            system_prompt: bundle.system_prompt,
            messages: bundle.messages,
        };

        let outcome =
            tokio::time::timeout(self.settings.exchange_timeout, self.llm.complete(completion))
                .await;
        let (reply, degraded) = match outcome {
            Ok(Ok(reply)) => (reply, false),
            Ok(Err(llm_error)) => {
                warn!(
                    event_name = "chat.quote.upstream_failed",
                    business_id = %business.id,
                    error = %llm_error,
                    "quote reply failed, sending apology"
                );
                (APOLOGY_REPLY.to_string(), true)
            }
            Err(_) => {
                warn!(
                    event_name = "chat.quote.timed_out",
                    business_id = %business.id,
                    timeout_ms = self.settings.exchange_timeout.as_millis() as u64,
                    "quote reply timed out, sending apology"
                );
                (APOLOGY_REPLY.to_string(), true)
            }
        };

        self.sessions.append(&key, Turn::assistant(reply.clone())).await;
        info!(
            event_name = "chat.quote.replied",
            business_id = %business.id,
            session_key = key.as_str(),
            degraded,
            "quote reply sent"
        );

        Ok(QuoteReply { message: reply, chat_id: request.chat_id, degraded })
    }

    /// Persists a finished conversation: contact extraction, optional name
    /// inference, summary, then create-or-update.
    pub async fn complete_chat(
        &self,
        request: CompleteChatRequest,
    ) -> Result<ChatPersisted, ApplicationError> {
        require_business_id(&request.business_id)?;
        if request.messages.is_empty() {
            return Err(ApplicationError::Validation("messages are required".to_string()));
        }
        let business = self.business(&request.business_id).await?;

        let contact = contact::extract_from_turns(&request.messages);
        let name = if contact::should_infer_name(request.chat_id.as_ref(), &request.messages) {
            conversation::infer_name(self.llm.as_ref(), &request.messages).await
        } else {
            NameInference::NotEvaluated
        };
        let summary = conversation::summarize(self.llm.as_ref(), &request.messages).await;

        let message_count = request.messages.len();
        let new_chat = NewChat {
            business_id: business.id.clone(),
            summary,
            messages: request.messages,
            contact,
            name,
        };

        let record = match self.chats.upsert(request.chat_id.as_ref(), new_chat).await {
            Ok(record) => record,
            Err(repo_error) => {
                let failure = repository_failure(repo_error);
                if matches!(failure, ApplicationError::Persistence(_)) {
                    error!(
                        event_name = "chat.persist.failed",
                        business_id = %business.id,
                        chat_id = request.chat_id.as_ref().map(|id| id.0.as_str()).unwrap_or("new"),
                        message_count,
                        error = %failure,
                        "chat could not be persisted; client must retry"
                    );
                }
                return Err(failure);
            }
        };

        let created = request.chat_id.is_none();
        let event_name = if created { "chat.persist.created" } else { "chat.persist.updated" };
        info!(
            event_name,
            business_id = %record.business_id,
            chat_id = %record.id,
            chat_number = record.chat_number,
            message_count,
            "chat persisted"
        );

        Ok(ChatPersisted { chat_id: record.id, chat_number: record.chat_number, created })
    }

    pub async fn list_chats(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<ChatSummary>, ApplicationError> {
        require_business_id(business_id)?;
        self.chats.list_active(business_id).await.map_err(repository_failure)
    }

    pub async fn chat_detail(
        &self,
        chat_id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<ChatRecord, ApplicationError> {
        require_business_id(business_id)?;
        self.chats
            .find(chat_id, business_id)
            .await
            .map_err(repository_failure)?
            .ok_or_else(|| ApplicationError::NotFound(format!("chat `{chat_id}`")))
    }

    pub async fn delete_chat(
        &self,
        chat_id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<(), ApplicationError> {
        require_business_id(business_id)?;
        self.chats.soft_delete(chat_id, business_id).await.map_err(repository_failure)?;
        info!(
            event_name = "chat.deleted",
            business_id = %business_id,
            chat_id = %chat_id,
            "chat soft-deleted"
        );
        Ok(())
    }

    pub async fn list_all_chats(&self) -> Result<Vec<ChatSummary>, ApplicationError> {
        self.chats.list_all().await.map_err(repository_failure)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.session_count().await
    }

    /// Drops idle sessions; called by the server's sweep task.
    pub async fn evict_idle_sessions(&self, max_idle: Duration) -> usize {
        let evicted = self.sessions.evict_idle(max_idle).await;
        if evicted > 0 {
            info!(event_name = "session.evicted", evicted, "idle sessions evicted");
        }
        evicted
    }
}
