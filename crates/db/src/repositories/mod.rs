use async_trait::async_trait;
use thiserror::Error;

use instaquote_core::domain::business::{BusinessConfig, BusinessId};
use instaquote_core::domain::chat::{ChatId, ChatRecord, ChatSummary, ChatUpdate, NewChat};

pub mod business;
pub mod chat;
pub mod memory;

pub use business::SqlBusinessDirectory;
pub use chat::SqlChatRepository;
pub use memory::{InMemoryBusinessDirectory, InMemoryChatRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("chat `{chat_id}` not found for business `{business_id}`")]
    ChatNotFound { chat_id: ChatId, business_id: BusinessId },
    #[error("chat numbering for business `{0}` kept conflicting")]
    NumberingContention(BusinessId),
    #[error("storage task interrupted: {0}")]
    Interrupted(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChatNotFound { .. })
    }
}

/// Durable store for finished conversations.
///
/// Every lookup is scoped to the owning business; a chat id that belongs to
/// another business behaves exactly like an unknown id.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Inserts a new chat with the next per-business chat number.
    async fn create(&self, new_chat: NewChat) -> Result<ChatRecord, RepositoryError>;

    /// Replaces summary and transcript and merges contact fields. Deleted or
    /// foreign chats fail with [`RepositoryError::ChatNotFound`].
    async fn update(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
        update: ChatUpdate,
    ) -> Result<ChatRecord, RepositoryError>;

    /// Detail for the owner. Deleted chats are not returned.
    async fn find(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<Option<ChatRecord>, RepositoryError>;

    /// Non-deleted chats of one business, newest first.
    async fn list_active(&self, business_id: &BusinessId)
        -> Result<Vec<ChatSummary>, RepositoryError>;

    /// Every chat of every business, newest first, deleted ones included.
    async fn list_all(&self) -> Result<Vec<ChatSummary>, RepositoryError>;

    async fn soft_delete(&self, id: &ChatId, business_id: &BusinessId)
        -> Result<(), RepositoryError>;

    async fn upsert(
        &self,
        chat_id: Option<&ChatId>,
        new_chat: NewChat,
    ) -> Result<ChatRecord, RepositoryError> {
        match chat_id {
            Some(chat_id) => {
                let business_id = new_chat.business_id.clone();
                let update = ChatUpdate {
                    summary: new_chat.summary,
                    messages: new_chat.messages,
                    contact: new_chat.contact,
                    name: new_chat.name,
                };
                self.update(chat_id, &business_id, update).await
            }
            None => self.create(new_chat).await,
        }
    }
}

/// Read-only view of business profiles and their pricing guidance.
#[async_trait]
pub trait BusinessDirectory: Send + Sync {
    /// Business profile with only its active rules, in display order.
    async fn find_business(
        &self,
        id: &BusinessId,
    ) -> Result<Option<BusinessConfig>, RepositoryError>;
}
