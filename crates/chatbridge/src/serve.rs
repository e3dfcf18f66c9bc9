// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `chatbridge serve` command implementation.
//!
//! Wires the AMQP connector, the bridge, the optional media client and the
//! HTTP gateway together, then runs until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use chatbridge_amqp::AmqpConnector;
use chatbridge_bridge::Bridge;
use chatbridge_config::model::ChatbridgeConfig;
use chatbridge_core::error::BridgeError;
use chatbridge_gateway::{GatewayError, GatewayState, MediaClient, MediaError, ServerConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::shutdown;

/// Longest pause between idle sweeps.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Failures that stop `serve`.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("bridge setup failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("media client setup failed: {0}")]
    Media(#[from] MediaError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Runs the `chatbridge serve` command.
pub async fn run_serve(config: ChatbridgeConfig) -> Result<(), ServeError> {
    init_tracing(&config.logging.level);

    info!(
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        outbound = %config.broker.outbound_exchange,
        inbound = %config.broker.inbound_exchange,
        "starting chatbridge"
    );

    let connector = Arc::new(AmqpConnector::from_config(&config.broker));
    let bridge = Arc::new(Bridge::from_chatbridge_config(connector, &config)?);

    // The publisher reconnects on first use, so an unreachable broker at
    // startup is not fatal.
    if let Err(e) = bridge.connect().await {
        warn!(error = %e, "broker not reachable at startup, will retry on first send");
    }

    let media = MediaClient::from_config(&config.media)?;
    if media.is_none() {
        info!("media api key not set, image upload disabled");
    }

    let cancel = shutdown::install_signal_handler();
    let reaper = bridge
        .settings()
        .idle_timeout
        .map(|ttl| spawn_idle_reaper(Arc::clone(&bridge), ttl, cancel.clone()));

    let state = GatewayState::new(Arc::clone(&bridge), media);
    let server_config = ServerConfig::from(&config.gateway);
    let served = chatbridge_gateway::start_server(&server_config, state, cancel.clone()).await;

    // Stop the reaper even when the server failed to start.
    cancel.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }

    info!("tearing down open sessions");
    bridge.shutdown().await;
    info!("chatbridge stopped");

    served.map_err(ServeError::from)
}

/// Periodically removes sessions idle for longer than `ttl`.
pub fn spawn_idle_reaper(
    bridge: Arc<Bridge>,
    ttl: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = (ttl / 2).clamp(Duration::from_millis(10), MAX_REAP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = bridge.reap_idle().await;
                    if !reaped.is_empty() {
                        info!(count = reaped.len(), "reaped idle sessions");
                    }
                }
            }
        }
        debug!("idle reaper stopped");
    })
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chatbridge={log_level},warn")));

    // A second init (tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
