use std::path::PathBuf;

use clap::Parser;

use linechat::Config;

#[derive(Parser, Debug)]
#[command(name = "linechat-server")]
#[command(about = "Line-oriented multi-room chat server", long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "linechat.toml")]
    pub config: PathBuf,

    /// Address to bind, overrides the config file
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to listen on, overrides the config file
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum connected clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Maximum concurrent rooms, lobby included
    #[arg(long)]
    pub max_rooms: Option<usize>,

    /// Default log filter when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print server events to stdout as JSON lines
    #[arg(long)]
    pub json_events: bool,
}

impl Args {
    /// Command-line values win over the file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(max_rooms) = self.max_rooms {
            config.max_rooms = max_rooms;
        }
    }
}
