use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use barkeep::api::{create_router, AppState};
use barkeep::config::AppConfig;
use barkeep::session::SessionManager;
use barkeep::watcher::DirectoryWatcher;
use barkeep::ws::Hub;

#[derive(Debug, Parser)]
#[command(
    name = "barkeep",
    about = "Realtime supervisor and multiplexer for interactive CLI sessions.",
    version
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, value_name = "PATH", env = "BARKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long, env = "BARKEEP_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "BARKEEP_PORT")]
    port: Option<u16>,

    /// Directory to serve static frontend files from
    #[arg(long, value_name = "PATH", env = "BARKEEP_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Maximum concurrent sessions
    #[arg(long, env = "BARKEEP_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(static_dir) = cli.static_dir {
        config.server.static_dir = static_dir.to_string_lossy().into_owned();
    }
    if let Some(max_sessions) = cli.max_sessions {
        config.sessions.max_sessions = max_sessions;
    }

    serve(config).await
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "barkeep=debug,tower_http=debug"
    } else {
        "barkeep=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();

    // Compatibility init for dependencies logging through the log facade.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .ok();
}

async fn serve(config: AppConfig) -> Result<()> {
    let manager = Arc::new(SessionManager::new(config.sessions.manager_config()));

    // The hub exists before the watcher; the watcher only ever sees the
    // update callback, never the hub itself.
    let hub = Arc::new(Hub::new(manager.clone(), config.realtime.outbound_queue));
    let watcher = {
        let hub = hub.clone();
        Arc::new(DirectoryWatcher::new(
            config.watcher.drink_ratio,
            config.watcher.debounce(),
            Arc::new(move |session_id: &str, file_count, drink_count| {
                hub.on_file_update(session_id, file_count, drink_count);
            }),
        ))
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing listen address")?;

    let state = AppState {
        manager: manager.clone(),
        hub,
        watcher: watcher.clone(),
        config: Arc::new(config),
    };
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("barkeep listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(watcher, manager))
        .await
        .context("serving HTTP")?;

    info!("shutdown complete");

    Ok(())
}

/// Resolve when SIGINT or SIGTERM arrives, after stopping the watchers
/// and terminating all sessions. The teardown runs here, when the signal
/// fires, so subprocesses are reaped even while open realtime
/// connections are still draining.
async fn shutdown_signal(watcher: Arc<DirectoryWatcher>, manager: Arc<SessionManager>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
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

    info!("shutting down");
    watcher.shutdown();
    manager.shutdown().await;
}
