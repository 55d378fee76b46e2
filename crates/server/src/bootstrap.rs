use std::sync::Arc;

use instaquote_agent::llm::{LlmError, OpenAiCompatClient};
use instaquote_agent::runtime::{AssistantSettings, QuoteAssistant};
use instaquote_core::config::AppConfig;
use instaquote_core::session::InMemorySessionStore;
use instaquote_db::repositories::{SqlBusinessDirectory, SqlChatRepository};
use instaquote_db::{connect_from_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub assistant: Arc<QuoteAssistant>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("language model client setup failed: {0}")]
    Llm(#[source] LlmError),
}

/// Builds the application from an already loaded config, so logging can be
/// initialized from the same config before the first bootstrap event.
pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        session_scope = ?config.session.scope,
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = OpenAiCompatClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    info!(
        event_name = "system.bootstrap.llm_configured",
        correlation_id = "bootstrap",
        endpoint = llm.endpoint(),
        model = llm.model(),
        "language model client configured"
    );

    let assistant = QuoteAssistant::new(
        Arc::new(InMemorySessionStore::new(config.session.window)),
        Arc::new(SqlBusinessDirectory::new(db_pool.clone())),
        Arc::new(SqlChatRepository::new(db_pool.clone())),
        Arc::new(llm),
        AssistantSettings::from_config(&config),
    );

    Ok(Application { config, db_pool, assistant: Arc::new(assistant) })
}
