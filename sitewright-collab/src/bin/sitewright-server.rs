//! Sitewright collaboration server.
//!
//! Serves the collaboration protocol on a single WebSocket endpoint until
//! interrupted. Log verbosity follows `RUST_LOG` (default `info`).

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;

use sitewright_collab::{ServerConfig, SessionConfig, SyncServer};

#[derive(Parser, Debug)]
#[command(name = "sitewright-server")]
#[command(about = "Real-time collaboration server for Sitewright documents")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "SITEWRIGHT_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// Frames buffered per connection before new ones are dropped
    #[arg(long, env = "SITEWRIGHT_OUTBOX_CAPACITY", default_value_t = 256)]
    outbox_capacity: usize,

    /// Operations replayed to a joining user
    #[arg(long, env = "SITEWRIGHT_BACKLOG_LIMIT", default_value_t = 100)]
    backlog_limit: usize,

    /// Seconds between sweeps for empty sessions
    #[arg(long, env = "SITEWRIGHT_REAP_INTERVAL", default_value_t = 60)]
    reap_interval_secs: u64,

    /// Seconds of silence after which a member counts as idle
    #[arg(long, env = "SITEWRIGHT_IDLE_THRESHOLD", default_value_t = 300)]
    idle_threshold_secs: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            outbox_capacity: self.outbox_capacity.max(1),
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
            session: SessionConfig {
                backlog_limit: self.backlog_limit,
                ..SessionConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let bind_addr = config.bind_addr.clone();
    let server = SyncServer::new(config);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Interrupt received");
        })
        .await
        .with_context(|| format!("collaboration server on {bind_addr} failed"))?;

    let stats = server.stats().await;
    info!(
        "Served {} connection(s), {} message(s), {} malformed",
        stats.total_connections, stats.total_messages, stats.malformed_messages
    );
    Ok(())
}
