// Relay binary.
//
// Loads the optional TOML configuration, applies command-line overrides, installs logging and
// serves until Ctrl+C is received.

use clap::Parser;
use fanout_relay::config::RelayConfig;
use fanout_relay::logging::{init_logging, LogFormat};
use fanout_relay::Relay;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;

/// Command-line options. Each flag overrides the matching configuration field.
#[derive(Debug, Parser)]
#[command(name = "fanout-relay", version, about = "Line-chat fan-out relay")]
struct CliOptions {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (default 0.0.0.0:52000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Messages buffered per connection before new ones are dropped for it
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Messages buffered between connections and the distributor
    #[arg(long)]
    inbound_capacity: Option<usize>,

    /// Milliseconds between dead-connection sweeps
    #[arg(long)]
    reap_interval_ms: Option<u64>,

    /// Line buffers to allocate at startup
    #[arg(long)]
    preallocate: Option<usize>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl CliOptions {
    fn into_config(self) -> fanout_relay::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queues.endpoint_capacity = capacity;
        }
        if let Some(capacity) = self.inbound_capacity {
            config.queues.inbound_capacity = capacity;
        }
        if let Some(interval) = self.reap_interval_ms {
            config.reaper.interval_ms = interval;
        }
        if let Some(count) = self.preallocate {
            config.pool.preallocate = count;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliOptions::parse().into_config()?;
    init_logging(&config.logging)?;

    let relay = Relay::bind(config)?;
    let running = relay.running();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    })?;

    let snapshot = relay.run()?;
    info!(
        accepted = snapshot.accepted,
        delivered = snapshot.delivered,
        dropped = snapshot.dropped,
        allocated = snapshot.pool.allocated,
        returned = snapshot.pool.returned,
        "shutdown complete"
    );
    Ok(())
}
