//! `GET /health`: database reachability, schema currency and live session
//! load. Any failed check turns the whole response into a 503.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use instaquote_agent::runtime::QuoteAssistant;
use instaquote_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    assistant: Arc<QuoteAssistant>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, assistant: Arc<QuoteAssistant>) -> Self {
        Self { db_pool, assistant }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseCheck {
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCheck {
    pub status: CheckStatus,
    pub applied_version: Option<i64>,
    pub expected_version: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: CheckStatus,
    pub database: DatabaseCheck,
    pub schema: SchemaCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match instaquote_db::ping(&state.db_pool).await {
        Ok(()) => DatabaseCheck { status: CheckStatus::Ready, detail: "reachable".to_string() },
        Err(error) => DatabaseCheck { status: CheckStatus::Degraded, detail: error.to_string() },
    };
    let schema = schema_check(&state.db_pool).await;

    let ready = database.status == CheckStatus::Ready && schema.status == CheckStatus::Ready;
    let payload = HealthResponse {
        status: if ready { CheckStatus::Ready } else { CheckStatus::Degraded },
        database,
        schema,
        active_sessions: state.assistant.active_sessions().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

/// Ready only when the newest embedded migration has been applied.
async fn schema_check(pool: &DbPool) -> SchemaCheck {
    let expected_version = migrations::MIGRATOR.iter().map(|migration| migration.version).max();
    let applied_version = migrations::applied_version(pool).await.ok().flatten();

    let status = if applied_version.is_some() && applied_version == expected_version {
        CheckStatus::Ready
    } else {
        CheckStatus::Degraded
    };
    SchemaCheck { status, applied_version, expected_version }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use instaquote_agent::llm::{CompletionPurpose, ScriptedCompletionClient};
    use instaquote_agent::runtime::{AssistantSettings, QuoteAssistant, QuoteRequest};
    use instaquote_core::domain::business::{BusinessConfig, BusinessId};
    use instaquote_core::session::InMemorySessionStore;
    use instaquote_db::repositories::{InMemoryBusinessDirectory, InMemoryChatRepository};
    use instaquote_db::{connect_with_settings, migrations, DbPool};

    use crate::health::{health, CheckStatus, HealthState};

    async fn assistant() -> Arc<QuoteAssistant> {
        let directory = InMemoryBusinessDirectory::default();
        directory
            .insert(BusinessConfig {
                id: BusinessId("B1".to_string()),
                name: "Bright Windows".to_string(),
                industry: "window cleaning".to_string(),
                is_demo: false,
                rules: Vec::new(),
            })
            .await;

        Arc::new(QuoteAssistant::new(
            Arc::new(InMemorySessionStore::default()),
            Arc::new(directory),
            Arc::new(InMemoryChatRepository::default()),
            Arc::new(
                ScriptedCompletionClient::new().with_reply(CompletionPurpose::QuoteReply, "About $90"),
            ),
            AssistantSettings::default(),
        ))
    }

    async fn pool() -> DbPool {
        connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect")
    }

    #[tokio::test]
    async fn migrated_database_is_ready_and_reports_sessions() {
        let pool = pool().await;
        migrations::run_pending(&pool).await.expect("migrations");
        let assistant = assistant().await;
        assistant
            .generate_reply(QuoteRequest {
                business_id: BusinessId("B1".to_string()),
                message: "Ten windows please".to_string(),
                chat_id: None,
                transcript: Vec::new(),
            })
            .await
            .expect("reply");

        let (status, Json(payload)) =
            health(State(HealthState::new(pool.clone(), assistant))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, CheckStatus::Ready);
        assert_eq!(payload.schema.status, CheckStatus::Ready);
        assert_eq!(payload.schema.applied_version, Some(1));
        assert_eq!(payload.schema.expected_version, Some(1));
        assert_eq!(payload.active_sessions, 1);

        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["status"], "ready");
        assert_eq!(json["schema"]["appliedVersion"], 1);
        assert_eq!(json["activeSessions"], 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn unmigrated_database_is_degraded() {
        let pool = pool().await;

        let (status, Json(payload)) =
            health(State(HealthState::new(pool.clone(), assistant().await))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, CheckStatus::Ready);
        assert_eq!(payload.schema.status, CheckStatus::Degraded);
        assert_eq!(payload.schema.applied_version, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_database_is_degraded() {
        let pool = pool().await;
        migrations::run_pending(&pool).await.expect("migrations");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool, assistant().await))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, CheckStatus::Degraded);
        assert_eq!(payload.database.status, CheckStatus::Degraded);
        assert_eq!(payload.schema.status, CheckStatus::Degraded);
        assert_eq!(payload.active_sessions, 0);
    }
}
