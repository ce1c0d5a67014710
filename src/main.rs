use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradepilot::application::actors::{spawn_scanner_actor, NearLimitScanner};
use tradepilot::application::handlers::{router, AppState};
use tradepilot::application::workflow::phases::{AgentPhase, ExecutionPhase, PortfolioPhase};
use tradepilot::application::workflow::{RetryPolicy, RetryTimeoutGuard, WorkflowCoordinator};
use tradepilot::config::EngineConfig;
use tradepilot::domain::repositories::analysis_store::AnalysisStore;
use tradepilot::domain::services::decision_engine::DecisionEngine;
use tradepilot::infrastructure::client_factory::{ClientFactory, HttpClientFactory};
use tradepilot::persistence::{init_database, DatabaseConfig, SqliteAnalysisStore};
use tradepilot::rate_limit::{create_rate_limiter, RateLimiterConfig};
use tradepilot::task_runner::CircuitBreakerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradepilot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("Failed to load .env file: {}", e);
        }
    }

    let config = EngineConfig::from_env();
    info!("Starting TradePilot decision engine");
    info!(
        "Phase timeout {}s, {} retries, near-limit scan {}",
        config.phase_timeout_seconds,
        config.phase_max_retries,
        if config.near_limit_scan_enabled { "enabled" } else { "disabled" }
    );

    let db_config = DatabaseConfig::from_env();
    let pool = init_database(&db_config).await?;
    let store: Arc<dyn AnalysisStore> = Arc::new(SqliteAnalysisStore::new(pool));
    let clients: Arc<dyn ClientFactory> = Arc::new(HttpClientFactory);

    let coordinator = Arc::new(
        WorkflowCoordinator::new(
            store.clone(),
            RetryTimeoutGuard::new(RetryPolicy::from_config(&config)),
        )
        .with_phase(Arc::new(AgentPhase::market(store.clone(), clients.clone())))
        .with_phase(Arc::new(AgentPhase::research(store.clone(), clients.clone())))
        .with_phase(Arc::new(AgentPhase::risk(store.clone(), clients.clone())))
        .with_phase(Arc::new(PortfolioPhase::new(
            store.clone(),
            clients.clone(),
            DecisionEngine::new(config.decision_engine()),
        )))
        .with_phase(Arc::new(ExecutionPhase::new(store.clone(), clients.clone()))),
    );

    let scanner = if config.near_limit_scan_enabled {
        let scanner = NearLimitScanner::new(
            store.clone(),
            clients.clone(),
            coordinator.clone(),
            config.lookback(),
        );
        Some(spawn_scanner_actor(
            scanner,
            config.scan_interval(),
            CircuitBreakerConfig::default(),
        ))
    } else {
        None
    };

    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.requests_per_minute,
        ..RateLimiterConfig::default()
    });
    let app = router(
        AppState {
            store: store.clone(),
            coordinator: coordinator.clone(),
        },
        limiter,
    );

    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    info!("Listening on {}", config.server_addr);
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    server.with_graceful_shutdown(shutdown_signal).await?;
    info!("Server shutting down gracefully...");

    if let Some((handle, task)) = scanner {
        handle.shutdown().await;
        match task.await {
            Ok(exit) => info!("Near-limit scanner exited: {:?}", exit),
            Err(e) => warn!("Near-limit scanner task failed: {}", e),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
