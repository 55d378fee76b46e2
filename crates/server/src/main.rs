mod api;
mod bootstrap;
mod cors;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use instaquote_agent::runtime::QuoteAssistant;
use instaquote_core::config::{AppConfig, LoadOptions, SessionConfig};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use instaquote_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

fn app_router(app: &bootstrap::Application) -> Router {
    let health_state = health::HealthState::new(app.db_pool.clone(), app.assistant.clone());
    api::router(api::ApiState::new(app.assistant.clone()))
        .merge(health::router(health_state))
        .layer(cors::cors_layer(&app.config.server))
        .layer(TraceLayer::new_for_http())
}

async fn run() -> Result<()> {
    // Logging must be up before bootstrap emits its first event.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_session_sweeper(
        app.assistant.clone(),
        app.config.session.clone(),
        shutdown_rx.clone(),
    );

    let server = axum::serve(listener, app_router(&app))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));
    let mut server_task = tokio::spawn(async move { server.await });

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "instaquote-server listening"
    );

    tokio::select! {
        result = &mut server_task => {
            sweeper.abort();
            result.context("server task panicked")??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "instaquote-server draining in-flight requests"
    );
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut server_task).await {
        Ok(result) => result.context("server task panicked")??,
        Err(_) => {
            warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish in time; aborting"
            );
            server_task.abort();
        }
    }

    let _ = sweeper.await;
    app.db_pool.close().await;
    info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "instaquote-server stopped"
    );

    Ok(())
}

fn spawn_session_sweeper(
    assistant: Arc<QuoteAssistant>,
    session: SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let max_idle = Duration::from_secs(session.idle_ttl_secs);
    let period = Duration::from_secs(session.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    assistant.evict_idle_sessions(max_idle).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(
                event_name = "system.server.signal_error",
                error = %error,
                "failed to install ctrl-c handler"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
