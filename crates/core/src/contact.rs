//! Deterministic contact extraction from visitor messages.
//!
//! Emails and Australian phone numbers are matched with fixed patterns.
//! Names are not pattern-matched here; [`should_infer_name`] only decides
//! whether a model-backed lookup is worth its cost this round.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::chat::{ChatId, ContactDetails, Role, Turn};

const NAME_HINTS: [&str; 5] = ["name", "actually", "i am", "i'm", "call me"];
const NAME_HINT_LOOKBACK: usize = 3;

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("Invalid email regex")
    })
}

/// The number itself is capture group 1; the outer groups keep it from
/// starting or ending inside a longer run of digits.
fn phone_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\D)((?:\+61|61|0)[ -]?[23478](?:[ -]?\d){8})(?:\D|$)")
            .expect("Invalid phone regex")
    })
}

/// Returns the first email and the first phone number found in `text`.
pub fn extract(text: &str) -> ContactDetails {
    ContactDetails {
        email: email_pattern().find(text).map(|found| found.as_str().to_string()),
        phone: phone_pattern()
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|found| found.as_str().to_string()),
    }
}

/// Folds [`extract`] over the visitor's turns; the first value seen for a
/// field wins and later turns cannot replace it.
pub fn extract_from_turns(turns: &[Turn]) -> ContactDetails {
    let mut contact = ContactDetails::default();
    for turn in turns.iter().filter(|turn| turn.role == Role::User) {
        if contact.is_complete() {
            break;
        }
        contact.fill_missing(extract(&turn.content));
    }
    contact
}

/// A new conversation always gets a name lookup. An existing one only when
/// the latest visitor turn among the last few hints at a name.
pub fn should_infer_name(chat_id: Option<&ChatId>, turns: &[Turn]) -> bool {
    if chat_id.is_none() {
        return true;
    }

    let recent_start = turns.len().saturating_sub(NAME_HINT_LOOKBACK);
    let last_user_turn =
        turns[recent_start..].iter().rev().find(|turn| turn.role == Role::User);
    let Some(last_user_turn) = last_user_turn else {
        return false;
    };

    let lowered = last_user_turn.content.to_lowercase();
    NAME_HINTS.iter().any(|hint| lowered.contains(hint))
}

#[cfg(test)]
mod tests {
    use crate::domain::chat::{ChatId, Turn};

    use super::{extract, extract_from_turns, should_infer_name};

    #[test]
    fn extracts_email_and_mobile_from_one_message() {
        let contact = extract("email me at john@example.com or call 0412 345 678");

        assert_eq!(contact.email.as_deref(), Some("john@example.com"));
        assert_eq!(contact.phone.as_deref(), Some("0412 345 678"));
    }

    #[test]
    fn accepts_international_and_landline_prefixes() {
        assert_eq!(extract("ring +61412345678 today").phone.as_deref(), Some("+61412345678"));
        assert_eq!(extract("office 61 2 9876 5432").phone.as_deref(), Some("61 2 9876 5432"));
        assert_eq!(extract("landline 02-9876-5432").phone.as_deref(), Some("02-9876-5432"));
    }

    #[test]
    fn rejects_numbers_outside_the_australian_pattern() {
        assert_eq!(extract("my code is 0512 345 678").phone, None);
        assert_eq!(extract("call 0412 345").phone, None);
        assert_eq!(extract("no contact details here").email, None);
    }

    #[test]
    fn ignores_phone_like_digits_inside_longer_numbers() {
        assert_eq!(extract("ref 1234061412345678").phone, None);
        assert_eq!(extract("invoice 04123456789").phone, None);
        assert_eq!(
            extract("ref 90412345678, mobile 0412345678").phone.as_deref(),
            Some("0412345678")
        );
        assert_eq!(extract("0412345678").phone.as_deref(), Some("0412345678"));
    }

    #[test]
    fn returns_first_match_in_text() {
        let contact = extract("first a@x.com then b@x.com, 0412345678 then 0398765432");

        assert_eq!(contact.email.as_deref(), Some("a@x.com"));
        assert_eq!(contact.phone.as_deref(), Some("0412345678"));
    }

    #[test]
    fn fold_over_turns_keeps_first_seen_value() {
        let turns = vec![
            Turn::user("Need a quote for painting"),
            Turn::user("you can reach me on a@x.com"),
            Turn::assistant("Thanks! Anything else?"),
            Turn::user("actually use b@x.com and 0412 345 678"),
        ];

        let contact = extract_from_turns(&turns);
        assert_eq!(contact.email.as_deref(), Some("a@x.com"));
        assert_eq!(contact.phone.as_deref(), Some("0412 345 678"));
    }

    #[test]
    fn fold_ignores_assistant_turns() {
        let turns =
            vec![Turn::assistant("Email us at office@painters.com"), Turn::user("sounds good")];

        assert_eq!(extract_from_turns(&turns).email, None);
    }

    #[test]
    fn new_conversations_always_infer_name() {
        assert!(should_infer_name(None, &[Turn::user("hello")]));
        assert!(should_infer_name(None, &[]));
    }

    #[test]
    fn existing_conversations_infer_name_only_on_hint() {
        let chat_id = ChatId("chat-1".to_string());

        let hinted = vec![
            Turn::user("Need a quote"),
            Turn::assistant("Sure, what's the job?"),
            Turn::user("Actually, call me Dave"),
        ];
        assert!(should_infer_name(Some(&chat_id), &hinted));

        let plain = vec![
            Turn::user("Need a quote"),
            Turn::assistant("Sure, what's the job?"),
            Turn::user("Two bedrooms and a hallway"),
        ];
        assert!(!should_infer_name(Some(&chat_id), &plain));
    }

    #[test]
    fn name_hint_outside_recent_turns_is_ignored() {
        let chat_id = ChatId("chat-1".to_string());
        let turns = vec![
            Turn::user("my name is Dave"),
            Turn::assistant("Hi Dave"),
            Turn::assistant("What rooms?"),
            Turn::assistant("Any timeframe?"),
        ];

        assert!(!should_infer_name(Some(&chat_id), &turns));
    }
}
