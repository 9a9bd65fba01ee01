//! mqterm agent daemon
//!
//! Runs a shell on a pseudo-terminal and exposes it on two MQTT topics:
//! keystrokes and resizes arrive on `/shell/{name}/input`, output leaves on
//! `/shell/{name}/output`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mt_agent::pty::{Bridge, BridgeOptions, CloseOutcome};
use mt_agent::relay;
use mt_agent::tunnel::{ClientOptions, MessagingClient, SubscriptionTable};
use mt_core::config::{self, AgentConfig};

/// How long the output forwarder gets to publish what is left after the
/// bridge stops
const FORWARDER_GRACE: Duration = Duration::from_secs(2);

/// How long the runtime waits for blocking threads still stuck in a
/// terminal read
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "mt-agent")]
#[command(about = "mqterm agent - exposes a local shell over MQTT")]
#[command(version)]
struct Args {
    /// Broker URL: mqtt://, mqtts://, ws:// or wss://host:port
    #[arg(short, long, env = "MQTERM_BROKER")]
    broker: Option<String>,

    /// Broker username
    #[arg(short, long, env = "MQTERM_USERNAME")]
    username: Option<String>,

    /// Broker password
    #[arg(short, long, env = "MQTERM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Device name; topics are /shell/{name}/input and /shell/{name}/output
    /// (defaults to hostname)
    #[arg(short, long)]
    name: Option<String>,

    /// Shell command line (defaults to $SHELL)
    #[arg(long)]
    command: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let result = runtime.block_on(run(args));

    // A terminal read that ignored shutdown must not hold the process.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> Result<()> {
    tracing::info!("mqterm agent starting...");

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        })
    } else {
        AgentConfig::default()
    };

    // Apply command-line overrides
    if let Some(broker) = args.broker {
        config.broker = broker;
    }
    if let Some(username) = args.username {
        config.username = username;
    }
    if let Some(password) = args.password {
        config.password = password;
    }
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(command) = args.command {
        config.command = Some(command);
    }

    config.validate().context("parameter error")?;
    let topics = config.topics();
    tracing::info!("Device {} on {}", config.device_name(), topics);

    let mut bridge =
        Bridge::spawn(BridgeOptions::from_config(&config)).context("Failed to start shell")?;
    let output = bridge
        .take_output()
        .context("Bridge output already taken")?;

    // Registered before connecting; the first ConnAck subscribes it.
    let table = SubscriptionTable::new();
    relay::register_input(&table, &topics.input, bridge.input());

    let options = ClientOptions::from_config(&config)?;
    let client = match MessagingClient::connect(options, table).await {
        Ok(client) => client,
        Err(e) => {
            bridge.close().await;
            return Err(e).context("Failed to connect to broker");
        }
    };

    let mut forwarder = tokio::spawn(relay::forward_output(
        output,
        client.clone(),
        topics.output.clone(),
    ));

    tracing::info!("mqterm agent running. Press Ctrl+C to stop.");
    shutdown_signal().await;

    tracing::info!("stopping...");
    if bridge.close().await == CloseOutcome::TimedOut {
        tracing::warn!("Shell did not stop cleanly");
    }

    match tokio::time::timeout(FORWARDER_GRACE, &mut forwarder).await {
        Ok(Ok(count)) => tracing::debug!("Forwarded {} output messages", count),
        Ok(Err(e)) => tracing::error!("Output forwarder failed: {}", e),
        Err(_) => {
            tracing::warn!("Output forwarder did not finish, aborting");
            forwarder.abort();
        }
    }

    client.disconnect().await;
    tracing::info!("mqterm agent stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
