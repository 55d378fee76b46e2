use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use instaquote_core::domain::business::{BusinessConfig, BusinessId};
use instaquote_core::domain::chat::{ChatId, ChatRecord, ChatSummary, ChatUpdate, NewChat};

use super::{BusinessDirectory, ChatRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryChatRepository {
    chats: RwLock<HashMap<String, ChatRecord>>,
}

impl InMemoryChatRepository {
    fn not_found(id: &ChatId, business_id: &BusinessId) -> RepositoryError {
        RepositoryError::ChatNotFound { chat_id: id.clone(), business_id: business_id.clone() }
    }
}

fn newest_first(summaries: &mut [ChatSummary]) {
    summaries.sort_by(|a, b| {
        b.created_at.cmp(&a.created_at).then_with(|| b.chat_number.cmp(&a.chat_number))
    });
}

#[async_trait::async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn create(&self, new_chat: NewChat) -> Result<ChatRecord, RepositoryError> {
        let mut chats = self.chats.write().await;
        let next = chats
            .values()
            .filter(|chat| chat.business_id == new_chat.business_id)
            .map(|chat| chat.chat_number)
            .max()
            .unwrap_or(0)
            + 1;

        let record = ChatRecord::create(new_chat, ChatId::generate(), next, Utc::now());
        chats.insert(record.id.0.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
        update: ChatUpdate,
    ) -> Result<ChatRecord, RepositoryError> {
        let mut chats = self.chats.write().await;
        let record = chats
            .get_mut(&id.0)
            .filter(|chat| &chat.business_id == business_id && !chat.is_deleted)
            .ok_or_else(|| Self::not_found(id, business_id))?;

        record
            .apply_update(update, Utc::now())
            .map_err(|_| Self::not_found(id, business_id))?;
        Ok(record.clone())
    }

    async fn find(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<Option<ChatRecord>, RepositoryError> {
        let chats = self.chats.read().await;
        Ok(chats
            .get(&id.0)
            .filter(|chat| &chat.business_id == business_id && !chat.is_deleted)
            .cloned())
    }

    async fn list_active(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<ChatSummary>, RepositoryError> {
        let chats = self.chats.read().await;
        let mut summaries = chats
            .values()
            .filter(|chat| &chat.business_id == business_id && !chat.is_deleted)
            .map(ChatRecord::summarize)
            .collect::<Vec<_>>();
        newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn list_all(&self) -> Result<Vec<ChatSummary>, RepositoryError> {
        let chats = self.chats.read().await;
        let mut summaries = chats.values().map(ChatRecord::summarize).collect::<Vec<_>>();
        newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn soft_delete(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<(), RepositoryError> {
        let mut chats = self.chats.write().await;
        let record = chats
            .get_mut(&id.0)
            .filter(|chat| &chat.business_id == business_id)
            .ok_or_else(|| Self::not_found(id, business_id))?;
        record.mark_deleted().map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryBusinessDirectory {
    businesses: RwLock<HashMap<String, BusinessConfig>>,
}

impl InMemoryBusinessDirectory {
    pub async fn insert(&self, business: BusinessConfig) {
        let mut businesses = self.businesses.write().await;
        businesses.insert(business.id.0.clone(), business);
    }
}

#[async_trait::async_trait]
impl BusinessDirectory for InMemoryBusinessDirectory {
    async fn find_business(
        &self,
        id: &BusinessId,
    ) -> Result<Option<BusinessConfig>, RepositoryError> {
        let businesses = self.businesses.read().await;
        Ok(businesses.get(&id.0).map(|business| BusinessConfig {
            rules: business.active_rules().cloned().collect(),
            ..business.clone()
        }))
    }
}
