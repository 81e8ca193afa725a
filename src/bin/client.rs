//! Minimal terminal client for linechat.
//!
//! Lines typed on stdin are sent as-is; lines from the server are printed to
//! stdout. Typing `q` sends the quit token and exits.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin linechat-client -- --host 127.0.0.1 --port 5100
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linechat::constants::{DEFAULT_PORT, QUIT_TOKEN};

#[derive(Parser, Debug)]
#[command(name = "linechat-client")]
#[command(about = "Terminal client for the linechat server", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    info!("Connected to {}", addr);

    let (read_half, mut write_half) = stream.into_split();
    let mut server_lines = BufReader::new(read_half).lines();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = server_lines.next_line() => match line? {
                Some(line) => {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                None => {
                    debug!("Server closed the connection");
                    break;
                }
            },
            line = input.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                write_half.write_all(line.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
                if line.trim_end() == QUIT_TOKEN {
                    break;
                }
            }
        }
    }

    write_half.shutdown().await.ok();
    Ok(())
}
