//! Room Relay
//!
//! Binds the UDP transport and runs the relay dispatcher at a fixed tick
//! rate until Ctrl+C.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use clap::Parser;
use relay_config::RelayConfig;
use relay_logging::init_logging;
use room_relay::{Dispatcher, UdpTransport};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

/// Interval between periodic statistics lines
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "room-relay")]
#[command(about = "Room relay server for NAT traversal", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (JSON or TOML). Missing files fall back to defaults.
    #[arg(short, long, default_value = "relay.json")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init_config {
        RelayConfig::write_default(&cli.config)
            .map_err(|e| anyhow::anyhow!("Failed to write default configuration: {}", e))?;
        println!("Default configuration written to {}", cli.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = RelayConfig::load(Some(cli.config.as_path()))
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    // Initialize logging
    init_logging("room-relay", config.log_level(), config.log_format);

    info!(
        listen_addr = %config.listen_addr(),
        buffer_size = config.buffer_size,
        bandwidth_limit = config.bandwidth_limit,
        grace_period_bandwidth_limit = config.grace_period_bandwidth_limit,
        ticks_per_second = config.ticks_per_second,
        "Configuration loaded"
    );

    let transport = UdpTransport::new(&config);
    let mut dispatcher = Dispatcher::new(transport, config.clone());
    if let Err(e) = dispatcher.start() {
        error!(error = %e, "Failed to start transport");
        return Err(e.into());
    }

    info!(
        local_addr = ?dispatcher.transport().local_addr().ok(),
        "Room Relay running. Press Ctrl+C to stop."
    );

    let mut ticker = time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats_ticker = time::interval(STATS_INTERVAL);
    stats_ticker.tick().await;

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                dispatcher.run_tick();
            }
            _ = stats_ticker.tick() => {
                let stats = dispatcher.stats();
                debug!(rooms = stats.rooms, peers = stats.peers, "Relay statistics");
            }
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
                }
                break;
            }
        }
    }

    dispatcher.shutdown();
    match serde_json::to_string(&dispatcher.stats()) {
        Ok(stats) => info!(stats = %stats, "Room Relay stopped"),
        Err(e) => error!(error = %e, "Failed to serialize final statistics"),
    }

    Ok(())
}
