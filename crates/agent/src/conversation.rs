//! Secondary model calls made when a conversation is persisted: visitor
//! name inference and the one-line summary shown in the dashboard.

use tracing::warn;

use instaquote_core::domain::chat::{NameInference, Role, Turn};

use crate::llm::{CompletionClient, CompletionPurpose, CompletionRequest};

pub const SUMMARY_MAX_CHARS: usize = 200;
const EMPTY_SUMMARY: &str = "Conversation without customer messages";

const NAME_PROMPT: &str = "\
You read a conversation between a customer and a quoting assistant.
Reply with the customer's name exactly as they gave it, capitalized, and nothing else.
If the customer never stated their name, reply with the single word null.";

const SUMMARY_PROMPT: &str = "\
Summarize the job this customer wants quoted in one sentence under 200 characters.
Mention the service, the size or scope, and any price range already discussed.
Reply with the summary only.";

fn transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "Customer",
                Role::Assistant => "Assistant",
            };
            format!("{speaker}: {}", turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn clip(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut clipped = collapsed.chars().take(max_chars.saturating_sub(3)).collect::<String>();
    clipped.truncate(clipped.trim_end().len());
    clipped.push_str("...");
    clipped
}

/// Deterministic stand-in used when the summary call fails: an excerpt of
/// the visitor's first message.
pub fn fallback_summary(turns: &[Turn]) -> String {
    turns
        .iter()
        .find(|turn| turn.role == Role::User && !turn.content.trim().is_empty())
        .map(|turn| clip(&turn.content, SUMMARY_MAX_CHARS))
        .unwrap_or_else(|| EMPTY_SUMMARY.to_string())
}

/// Asks the model for the visitor's name. A failed call means the name was
/// not evaluated this round, so a stored name is never cleared by an outage.
pub async fn infer_name(client: &dyn CompletionClient, turns: &[Turn]) -> NameInference {
    let request = CompletionRequest {
        purpose: CompletionPurpose::NameInference,
        system_prompt: NAME_PROMPT.to_string(),
        messages: vec![Turn::user(transcript(turns))],
    };

    match client.complete(request).await {
        Ok(output) => NameInference::from_model_output(&output),
        Err(error) => {
            warn!(
                event_name = "chat.name_inference.failed",
                error = %error,
                "name inference unavailable, leaving name untouched"
            );
            NameInference::NotEvaluated
        }
    }
}

pub async fn summarize(client: &dyn CompletionClient, turns: &[Turn]) -> String {
    let request = CompletionRequest {
        purpose: CompletionPurpose::Summary,
        system_prompt: SUMMARY_PROMPT.to_string(),
        messages: vec![Turn::user(transcript(turns))],
    };

    match client.complete(request).await {
        Ok(summary) if !summary.trim().is_empty() => clip(&summary, SUMMARY_MAX_CHARS),
        Ok(_) => fallback_summary(turns),
        Err(error) => {
            warn!(
                event_name = "chat.summary.failed",
                error = %error,
                "summary unavailable, using first customer message"
            );
            fallback_summary(turns)
        }
    }
}
