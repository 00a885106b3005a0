pub mod api;
pub mod assistant;
pub mod auth;
pub mod board;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod memory;
pub mod models;
pub mod store;

use crate::api::AppState;
use crate::auth::TokenAuthority;
use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::memory::{MemoryMonitor, MemoryProbe, ProcProbe};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub async fn run(cli: Cli) -> AppResult<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Serve => serve(config).await,
        Command::AnalyzeMemory { dir } => {
            let dir = dir.unwrap_or_else(|| config.memory_log_dir());
            let (report, path) = memory::analyze_logs(&dir)?;
            print!("{}", report.summary());
            println!("Report written to {}", path.display());
            Ok(())
        }
        Command::IssueToken { user_id } => {
            let tokens = TokenAuthority::new(config.require_jwt_secret()?, config.token_ttl_minutes)?;
            println!("{}", tokens.issue(&user_id)?);
            Ok(())
        }
    }
}

/// The routed API with CORS and request tracing applied.
pub fn build_app(state: AppState, config: &AppConfig) -> AppResult<Router> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    // Credentials cannot be combined with a wildcard origin.
    let cors = if config.allows_any_origin() {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| AppError::Validation(format!("invalid allowed origin: {}", origin)))
            })
            .collect::<AppResult<Vec<_>>>()?;
        cors.allow_origin(origins).allow_credentials(true)
    };

    Ok(api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn serve(config: AppConfig) -> AppResult<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    init_tracing(&config.log_dir())?;

    let tokens = Arc::new(TokenAuthority::new(config.require_jwt_secret()?, config.token_ttl_minutes)?);
    let db = Arc::new(Database::new(&config.database_path())?);
    tracing::info!(path = %db.path().display(), "database opened");
    let app = build_app(
        AppState {
            db: db.clone(),
            tokens,
        },
        &config,
    )?;

    let monitor = if config.memory.enabled {
        let probe: Arc<dyn MemoryProbe> = Arc::new(ProcProbe::default());
        let monitor = Arc::new(
            MemoryMonitor::new(config.memory.clone(), config.memory_log_dir(), probe.clone())?.with_reclaimer(db),
        );
        memory::install_panic_log(monitor.log_dir().to_path_buf(), probe);
        monitor.clone().spawn();
        Some(monitor)
    } else {
        None
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
    tracing::info!(addr = %listener.local_addr()?, "finadvise server listening");
    let memory_signal = monitor.as_ref().map(|monitor| monitor.shutdown_signal());
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(memory_signal))
        .await?;

    if monitor.is_some_and(|monitor| monitor.shutdown_requested()) {
        return Err(AppError::Internal(
            "memory usage exceeded the exit threshold".to_string(),
        ));
    }
    tracing::info!("finadvise server stopped");
    Ok(())
}

async fn wait_for_shutdown(memory: Option<Arc<Notify>>) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let memory = async {
        match memory {
            Some(signal) => signal.notified().await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => tracing::info!("shutdown requested"),
        _ = memory => tracing::warn!("shutting down on memory pressure"),
    }
}

fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
