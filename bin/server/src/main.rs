use gist_analytics_platform_access::{InMemorySessionStore, SessionStore};
use gist_analytics_query::AnalyticsRepository;
use gist_analytics_server::{
    analytics::ClickHouseStore,
    auth::{AppState, KeycloakClient},
    config::ServerConfig,
    error::StartupError,
    router,
};
use rootcause::prelude::Report;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!("{report}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    config.validate()?;
    tracing::info!(keycloak = ?config.keycloak, clickhouse = ?config.clickhouse, "Loaded configuration");

    let provider = KeycloakClient::new(&config.keycloak).map_err(|e| StartupError::HttpClient {
        details: e.to_string(),
    })?;
    let event_store = ClickHouseStore::new(&config.clickhouse)?;
    let sessions = Arc::new(InMemorySessionStore::new(config.session.idle_ttl()));

    // Spawn periodic session cleanup task
    let sweeper = Arc::clone(&sessions);
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            let swept = sweeper.sweep_expired().await;
            if swept > 0 {
                tracing::debug!(expired_sessions = swept, "Periodic session cleanup");
            }
        }
    });

    let listen_addr = config.listen_addr;
    let app_state = Arc::new(AppState::new(
        config.keycloak,
        Arc::new(provider),
        sessions,
        AnalyticsRepository::new(Arc::new(event_store)),
        config.session,
    ));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: listen_addr.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", listen_addr);

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
