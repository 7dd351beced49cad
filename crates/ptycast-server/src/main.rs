//! ptycast-server: streams one PTY-backed process to WebSocket observers.
//!
//! Spawns (on request or at boot) a single interactive process on a
//! pseudo-terminal and fans its output out to any number of connected
//! observers, replaying recent history to late joiners.

mod config;
mod control;
mod server;
mod session;
mod workspace;

use clap::Parser;
use config::ServerConfig;
use control::{StartRequest, TerminalControl, TerminalDefaults};
use server::connections::ConnectionManager;
use server::Server;
use session::SessionManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// ptycast-server, a PTY session broadcast server.
#[derive(Parser, Debug)]
#[command(name = "ptycast-server", version, about = "PTY session broadcast server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Command to run in the terminal session
    #[arg(long)]
    command: Option<String>,

    /// Initial terminal columns
    #[arg(long)]
    cols: Option<u16>,

    /// Initial terminal rows
    #[arg(long)]
    rows: Option<u16>,

    /// Start the configured command immediately at boot
    #[arg(long)]
    spawn: bool,

    /// Config file path
    #[arg(long, default_value = "~/.ptycast/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ptycast-server");

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.command.as_deref(),
        cli.cols,
        cli.rows,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let bind_addr: SocketAddr = match format!("{}:{}", config.bind, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, bind = %config.bind, port = config.port, "invalid bind address");
            std::process::exit(1);
        }
    };

    // Explicitly constructed and injected, no globals: tests and future
    // request-handling layers get handles to the same instances.
    let sessions = Arc::new(SessionManager::new(
        config.history_max_bytes,
        config.history_max_chunks,
        config.output_queue,
    ));
    let connections = ConnectionManager::new();
    let terminal = TerminalControl::new(
        sessions.clone(),
        connections.clone(),
        TerminalDefaults {
            command: config.command.clone(),
            args: config.args.clone(),
            cols: config.cols,
            rows: config.rows,
        },
        config.workspace_roots.clone(),
    );

    if cli.spawn {
        match terminal.start(StartRequest::default()).await {
            Ok(info) => info!(session_id = %info.session_id, pid = info.pid, "session spawned at boot"),
            Err(e) => {
                error!(error = %e, "failed to spawn session at boot");
                std::process::exit(1);
            }
        }
    }

    let ws_server = Server::new(sessions.clone(), connections.clone());

    tokio::select! {
        result = ws_server.run(bind_addr) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    connections.shutdown();
    sessions.shutdown().await;
    info!("ptycast-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
