use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::Row;
use tracing::warn;

use instaquote_core::domain::business::BusinessId;
use instaquote_core::domain::chat::{
    ChatId, ChatRecord, ChatSummary, ChatUpdate, NewChat, Turn,
};

use super::{ChatRepository, RepositoryError};
use crate::DbPool;

const MAX_NUMBERING_ATTEMPTS: usize = 5;

const CHAT_COLUMNS: &str = "id, business_id, chat_number, summary, contact_name, contact_email,
     contact_phone, messages, created_at, updated_at, is_deleted";

pub struct SqlChatRepository {
    pool: DbPool,
}

impl SqlChatRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Stored timestamps carry microseconds, so records are built with the same
/// precision and compare equal after a round trip.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn encode_messages(messages: &[Turn]) -> Result<String, RepositoryError> {
    serde_json::to_string(messages).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_chat(row: &sqlx::sqlite::SqliteRow) -> Result<ChatRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let business_id: String =
        row.try_get("business_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let chat_number: i64 =
        row.try_get("chat_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let summary: String =
        row.try_get("summary").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let contact_name: Option<String> =
        row.try_get("contact_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let contact_email: Option<String> =
        row.try_get("contact_email").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let contact_phone: Option<String> =
        row.try_get("contact_phone").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let messages_json: String =
        row.try_get("messages").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_deleted: bool =
        row.try_get("is_deleted").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let messages: Vec<Turn> = serde_json::from_str(&messages_json)
        .map_err(|e| RepositoryError::Decode(format!("messages: {e}")))?;

    Ok(ChatRecord {
        id: ChatId(id),
        business_id: BusinessId(business_id),
        chat_number,
        summary,
        contact_name,
        contact_email,
        contact_phone,
        messages,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        is_deleted,
    })
}

async fn fetch_chat<'e, E>(executor: E, id: &ChatId) -> Result<Option<ChatRecord>, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(executor)
        .await?;

    match row {
        Some(ref r) => Ok(Some(row_to_chat(r)?)),
        None => Ok(None),
    }
}

/// One numbering attempt. The read of `MAX(chat_number)` and the insert run
/// under `BEGIN IMMEDIATE`, so no other writer can slip in between. The
/// transaction rolls back when dropped without a commit.
async fn insert_numbered(pool: &DbPool, record: &mut ChatRecord) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let next: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(chat_number), 0) + 1 FROM chats WHERE business_id = ?",
    )
    .bind(&record.business_id.0)
    .fetch_one(&mut *tx)
    .await?;
    record.chat_number = next;

    let messages =
        serde_json::to_string(&record.messages).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query(
        "INSERT INTO chats (id, business_id, chat_number, summary, contact_name,
                            contact_email, contact_phone, messages, created_at,
                            updated_at, is_deleted)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(&record.id.0)
    .bind(&record.business_id.0)
    .bind(record.chat_number)
    .bind(&record.summary)
    .bind(&record.contact_name)
    .bind(&record.contact_email)
    .bind(&record.contact_phone)
    .bind(messages)
    .bind(timestamp(record.created_at))
    .bind(timestamp(record.updated_at))
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().is_some_and(|db| db.is_unique_violation())
}

#[async_trait::async_trait]
impl ChatRepository for SqlChatRepository {
    async fn create(&self, new_chat: NewChat) -> Result<ChatRecord, RepositoryError> {
        let pool = self.pool.clone();
        // Detached so a dropped request cannot abandon an open transaction.
        let task = tokio::spawn(async move {
            let business_id = new_chat.business_id.clone();
            let mut record = ChatRecord::create(new_chat, ChatId::generate(), 0, now());

            for attempt in 1..=MAX_NUMBERING_ATTEMPTS {
                match insert_numbered(&pool, &mut record).await {
                    Ok(()) => return Ok(record),
                    Err(error) if is_unique_violation(&error) => {
                        warn!(
                            event_name = "db.chat.numbering_conflict",
                            business_id = %business_id,
                            attempt,
                            "chat number already taken, retrying"
                        );
                    }
                    Err(error) => return Err(RepositoryError::Database(error)),
                }
            }
            Err(RepositoryError::NumberingContention(business_id))
        });

        task.await.map_err(|e| RepositoryError::Interrupted(e.to_string()))?
    }

    async fn update(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
        update: ChatUpdate,
    ) -> Result<ChatRecord, RepositoryError> {
        let messages = encode_messages(&update.messages)?;
        let name = update.name.name().map(ToString::to_string);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE chats SET
                 summary = ?,
                 messages = ?,
                 contact_email = COALESCE(?, contact_email),
                 contact_phone = COALESCE(?, contact_phone),
                 contact_name = COALESCE(?, contact_name),
                 updated_at = MAX(updated_at, ?)
             WHERE id = ? AND business_id = ? AND is_deleted = 0",
        )
        .bind(&update.summary)
        .bind(messages)
        .bind(&update.contact.email)
        .bind(&update.contact.phone)
        .bind(name)
        .bind(timestamp(now()))
        .bind(&id.0)
        .bind(&business_id.0)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::ChatNotFound {
                chat_id: id.clone(),
                business_id: business_id.clone(),
            });
        }

        let record = fetch_chat(&mut *tx, id).await?.ok_or_else(|| {
            RepositoryError::ChatNotFound { chat_id: id.clone(), business_id: business_id.clone() }
        })?;
        tx.commit().await?;
        Ok(record)
    }

    async fn find(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<Option<ChatRecord>, RepositoryError> {
        let record = fetch_chat(&self.pool, id).await?;
        Ok(record.filter(|chat| &chat.business_id == business_id && !chat.is_deleted))
    }

    async fn list_active(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<ChatSummary>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE business_id = ? AND is_deleted = 0
             ORDER BY created_at DESC, chat_number DESC"
        ))
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_chat(row).map(|chat| chat.summarize())).collect()
    }

    async fn list_all(&self) -> Result<Vec<ChatSummary>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats ORDER BY created_at DESC, chat_number DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_chat(row).map(|chat| chat.summarize())).collect()
    }

    async fn soft_delete(
        &self,
        id: &ChatId,
        business_id: &BusinessId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chats SET is_deleted = 1 WHERE id = ? AND business_id = ?",
        )
        .bind(&id.0)
        .bind(&business_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::ChatNotFound {
                chat_id: id.clone(),
                business_id: business_id.clone(),
            });
        }
        Ok(())
    }
}
