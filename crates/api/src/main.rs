use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use restorer_api::config::{EngineSettings, LogFormat, ServerConfig};
use restorer_api::router::build_app_router;
use restorer_api::state::AppState;
use restorer_api::background;
use restorer_engine::{CommandEngine, PassthroughEngine, RestorationEngine};
use restorer_pipeline::{Dispatcher, HeartbeatMonitor, JobStore, StagingArea, StatusService};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    // Read before tracing is installed so LOG_FORMAT can pick the layer.
    let config = ServerConfig::from_env();

    // --- Tracing ---
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or_default();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "restorer_api=debug,restorer_pipeline=debug,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        host = %config.host,
        port = %config.port,
        delivery = ?config.pipeline.delivery_mode,
        "Loaded server configuration"
    );

    // --- Staging area ---
    let staging = match StagingArea::open(&config.pipeline.staging_dir).await {
        Ok(staging) => Arc::new(staging),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open staging directory");
            std::process::exit(1);
        }
    };

    // --- Pipeline ---
    let store = Arc::new(JobStore::new());
    let engine = build_engine(&config.engine);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&staging),
        engine,
        &config.pipeline,
    );
    let status = StatusService::new(
        Arc::clone(&store),
        Arc::clone(&staging),
        config.pipeline.delivery_mode,
    );
    let heartbeat = HeartbeatMonitor::new(config.pipeline.heartbeat_interval());

    // --- Background retention sweep ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = config.pipeline.sweep_interval().map(|every| {
        tokio::spawn(background::artifact_retention::run(
            Arc::clone(&staging),
            Arc::clone(&store),
            config.pipeline.retention(),
            every,
            retention_cancel.clone(),
        ))
    });
    if retention_handle.is_none() {
        tracing::info!("Periodic artifact retention disabled");
    }

    // --- App state ---
    let state = AppState {
        store,
        dispatcher: dispatcher.clone(),
        status,
        heartbeat,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = match config.host.parse() {
        Ok(ip) => SocketAddr::new(ip, config.port),
        Err(e) => {
            tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Starting server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    retention_cancel.cancel();
    if let Some(handle) = retention_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tracing::info!("Artifact retention job stopped");
    }

    let abandoned = dispatcher
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if abandoned > 0 {
        tracing::warn!(abandoned, "Shut down with jobs still running");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Pick the configured engine, falling back to passthrough.
fn build_engine(settings: &EngineSettings) -> Arc<dyn RestorationEngine> {
    match &settings.program {
        Some(program) => {
            let engine = CommandEngine::from_template(program.as_str(), &settings.args);
            tracing::info!(program = %engine.program(), "Using command restoration engine");
            Arc::new(engine)
        }
        None => {
            tracing::warn!("ENGINE_PROGRAM not set, images will be returned unchanged");
            Arc::new(PassthroughEngine)
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
