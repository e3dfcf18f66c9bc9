// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! chatbridge - HTTP request/poll bridge to agents behind an AMQP exchange.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;

use std::path::PathBuf;

use chatbridge_config::{ChatbridgeConfig, ConfigError};
use clap::{Parser, Subcommand};

/// chatbridge - HTTP request/poll bridge to agents behind an AMQP exchange.
#[derive(Parser, Debug)]
#[command(name = "chatbridge", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Start the HTTP gateway and broker bridge (default).
    Serve,
    /// Load and validate configuration, then print a summary.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            chatbridge_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::CheckConfig => {
            println!("{}", config_summary(&config));
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<ChatbridgeConfig, Vec<ConfigError>> {
    match path {
        Some(path) => chatbridge_config::load_and_validate_path(path),
        None => chatbridge_config::load_and_validate(),
    }
}

/// Human-readable config summary with secrets redacted.
fn config_summary(config: &ChatbridgeConfig) -> String {
    let broker = &config.broker;
    let bridge = &config.bridge;
    let kinds = bridge
        .accepted_kinds
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let idle = match bridge.idle_timeout() {
        Some(ttl) => format!("{}s", ttl.as_secs()),
        None => "off".to_string(),
    };
    let media = if config.media.api_key.is_some() {
        format!("enabled ({})", config.media.upload_url)
    } else {
        "disabled".to_string()
    };

    [
        "chatbridge: config OK".to_string(),
        format!(
            "  broker:    amqp://{}:[redacted]@{}:{}/{}",
            broker.username,
            broker.host,
            broker.port,
            broker.vhost.trim_start_matches('/')
        ),
        format!(
            "  exchanges: out={} in={}",
            broker.outbound_exchange, broker.inbound_exchange
        ),
        format!(
            "  sessions:  max={} buffer={} prefetch={} idle={idle}",
            bridge.max_sessions, bridge.buffer_capacity, bridge.prefetch
        ),
        format!(
            "  queues:    {}",
            bridge
                .durable_queue_prefix
                .as_deref()
                .map(|p| format!("durable ({p}.*)"))
                .unwrap_or_else(|| "ephemeral".to_string())
        ),
        format!("  kinds:     {kinds}"),
        format!(
            "  gateway:   {}:{}",
            config.gateway.host, config.gateway.port
        ),
        format!("  media:     {media}"),
    ]
    .join("\n")
}
