//! Pagecast relay server.
//!
//! Serves `ws://<bind>:<port>/ws?pageId=<page>` and keeps the last snapshot
//! of every page under the storage directory.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::info;

use pagecast_relay::queue::{OverflowPolicy, QueueConfig};
use pagecast_relay::server::{RelayServer, ServerConfig};

/// Relay command line arguments.
#[derive(Parser, Debug)]
#[command(name = "pagecast-server")]
#[command(about = "Relay full-document snapshots between clients editing the same page")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Host address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Directory holding one snapshot file per page
    #[arg(long, value_name = "DIR", default_value = "./pages")]
    storage_dir: PathBuf,

    /// Keep snapshots in memory only
    #[arg(long, conflicts_with = "storage_dir")]
    in_memory: bool,

    /// Snapshots buffered per client before the overflow policy applies
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,

    /// What to do with a client whose queue is full
    #[arg(long, value_enum, default_value_t = Overflow::Disconnect)]
    overflow: Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Overflow {
    /// Drop the slow client
    Disconnect,
    /// Hold the sender until the client catches up
    Wait,
}

impl From<Overflow> for OverflowPolicy {
    fn from(overflow: Overflow) -> Self {
        match overflow {
            Overflow::Disconnect => OverflowPolicy::Disconnect,
            Overflow::Wait => OverflowPolicy::Wait,
        }
    }
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.bind, self.port),
            storage_root: (!self.in_memory).then(|| self.storage_dir.clone()),
            queue: QueueConfig {
                capacity: self.queue_capacity,
                overflow: self.overflow.into(),
            },
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = args.server_config();
    info!("Starting pagecast-server on {}", config.bind_addr);

    let server = RelayServer::new(config)?;
    server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_config() {
        let args = Args::parse_from(["pagecast-server"]);
        let config = args.server_config();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.storage_root, Some(PathBuf::from("./pages")));
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::parse_from([
            "pagecast-server",
            "--port",
            "9000",
            "--bind",
            "127.0.0.1",
            "--in-memory",
            "--queue-capacity",
            "8",
            "--overflow",
            "wait",
        ]);
        let config = args.server_config();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert!(config.storage_root.is_none());
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.queue.overflow, OverflowPolicy::Wait);
    }

    #[test]
    fn test_in_memory_conflicts_with_storage_dir() {
        let parsed = Args::try_parse_from([
            "pagecast-server",
            "--in-memory",
            "--storage-dir",
            "/tmp/pages",
        ]);
        assert!(parsed.is_err());
    }
}
