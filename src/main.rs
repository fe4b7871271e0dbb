//! mqtt-rx command line entry point
//!
//! Streams messages from the broker named in a config file until Ctrl-C.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use mqtt_rx::config::ServiceConfig;
use mqtt_rx::observability::init_default_logging;
use mqtt_rx::protocol::NormalizedMessage;
use mqtt_rx::service::MqttService;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Stream MQTT messages as a shared, lazily-connected stream
#[derive(Parser)]
#[command(name = "mqtt-rx")]
#[command(about = "Stream MQTT messages from a broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_RX_CONFIG", default_value = "mqtt-rx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and print messages until interrupted
    Stream {
        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-rx v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", cli.config.display());

    let config = match ServiceConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Stream { json } => run_stream(config, json).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_stream(config: ServiceConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.connection_options()?;
    let topic_filters = config.topic_filters()?;
    let will = config.will_message()?;

    info!(
        "Streaming from {} with {} subscription(s)",
        options.uri,
        topic_filters.len()
    );

    let (stream, _handle) = MqttService::create_stream(options, topic_filters, will);
    let mut messages = stream.subscribe();

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl-C, shutting down gracefully...");
                break Ok(());
            }
            item = messages.next() => match item {
                Some(Ok(message)) => print_message(&message, json)?,
                Some(Err(e)) => break Err(e),
                None => {
                    warn!("Broker closed the connection");
                    break Ok(());
                }
            },
        }
    };

    // Last observer gone: the session disconnects within the cleanup bound
    drop(messages);
    stream.wait_for_teardown().await;
    outcome.map_err(Into::into)
}

fn print_message(message: &NormalizedMessage, json: bool) -> Result<(), serde_json::Error> {
    let received_at = chrono::Utc::now();
    if json {
        let line = serde_json::json!({
            "received_at": received_at.to_rfc3339(),
            "topic": message.topic,
            "payload": message.payload_str(),
            "qos": message.qos.as_u8(),
            "retain": message.retain,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!(
            "{} [{}{}] {}: {}",
            received_at.format("%H:%M:%S%.3f"),
            message.qos,
            if message.retain { ", retained" } else { "" },
            message.topic,
            message.payload_str()
        );
    }
    Ok(())
}

fn handle_config_command(
    config: ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
