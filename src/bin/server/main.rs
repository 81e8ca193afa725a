//! linechat-server: a multi-room chat server speaking a plain line protocol.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin linechat-server
//! cargo run --bin linechat-server -- --port 6000 --max-rooms 8 --json-events
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linechat::server::ServerEvent;
use linechat::{ChatServer, Config};

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _log_guard = setup_logging(&args)?;

    let mut config = Config::load_or_default(&args.config)?;
    args.apply(&mut config);

    info!(
        "Starting linechat on {} (max {} clients, {} rooms)",
        config.bind_addr(),
        config.max_clients,
        config.max_rooms
    );

    let bind_addr = config.bind_addr();
    let server = match ChatServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    if args.json_events {
        tokio::spawn(print_events(server.subscribe()));
    }

    server.run_until(shutdown_signal()).await?;
    Ok(())
}

/// Console logging filtered by `RUST_LOG` or `--log-level`, plus an optional
/// log file. The returned guard must live until exit so the file is flushed.
fn setup_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&args.log_level))?;

    let (file_layer, guard) = match args.log_file {
        Some(ref path) => {
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn print_events(mut rx: broadcast::Receiver<ServerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to encode event: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event stream lagged, {} events dropped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
