//! Agent Runtime - the conversational side of instant estimates
//!
//! This crate turns visitor messages into model-backed quote replies and
//! finished conversations into durable chat records:
//! - Assembles system prompts from business profile, pricing rules and contact status
//! - Calls the language model for replies, name inference and summaries
//! - Serializes exchanges per session and degrades to an apology on model failure
//!
//! # Key Types
//!
//! - `QuoteAssistant` - Orchestrator used by the HTTP layer (see `runtime` module)
//! - `CompletionClient` - Pluggable model trait with an OpenAI-compatible implementation
//! - `PromptBuilder` - Pure prompt composition
//!
//! # Safety Principle
//!
//! The model only writes prose. Chat numbering, contact extraction and
//! merge rules are deterministic and never delegated to it.

pub mod conversation;
pub mod llm;
pub mod prompt;
pub mod runtime;

pub use llm::{
    CompletionClient, CompletionPurpose, CompletionRequest, LlmError, OpenAiCompatClient,
    ScriptedCompletionClient,
};
pub use prompt::{PromptBuilder, PromptBundle};
pub use runtime::{
    AssistantSettings, ChatPersisted, CompleteChatRequest, QuoteAssistant, QuoteReply,
    QuoteRequest, APOLOGY_REPLY,
};
