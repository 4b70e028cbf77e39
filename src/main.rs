//! mcwire - memcached text-protocol server
//!
//! Serves the in-memory reference store over the memcached ASCII protocol.

use clap::Parser;
use mcwire::config::ServerConfig;
use mcwire::server::Server;
use mcwire::storage::{start_expiry_sweeper, MemoryStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "mcwire", version, about = "memcached text-protocol server")]
struct Args {
    /// Address to listen on; a leading ':' means all interfaces
    #[arg(short, long, default_value = mcwire::DEFAULT_ADDR)]
    listen: String,

    /// Largest accepted value in bytes
    #[arg(long, default_value_t = ServerConfig::default().max_value_len)]
    max_value_len: usize,

    /// Longest accepted command line in bytes
    #[arg(long, default_value_t = ServerConfig::default().max_line_len)]
    max_line_len: usize,

    /// Pending updates each statistics counter buffers
    #[arg(long, default_value_t = ServerConfig::default().counter_queue_capacity)]
    counter_queue: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            addr: self.listen,
            max_value_len: self.max_value_len,
            max_line_len: self.max_line_len,
            counter_queue_capacity: self.counter_queue.max(1),
            ..ServerConfig::default()
        }
    }
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
mcwire v{} - memcached text-protocol server
──────────────────────────────────────────────
Listening on {}
Use Ctrl+C to shutdown gracefully.
"#,
        mcwire::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    print_banner(&config);

    let store = Arc::new(MemoryStore::new());
    info!("Memory store initialized with 64 shards");
    let _sweeper = start_expiry_sweeper(Arc::clone(&store));

    let server = Server::new(config, store);

    tokio::select! {
        result = server.listen_and_serve() => result?,
        signal = signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received, stopping server...");
            server.shutdown();
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
