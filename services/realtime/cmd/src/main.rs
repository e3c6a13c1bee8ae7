//! Realtime client node.
//!
//! Keeps a connection to a realtime broker open, reports every state change,
//! publishes messages given on the command line and pings on an interval.
//! Prints the recovery key on exit so a later run can pick up with `--recover`.

use clap::Parser;
use realtime_connection::{
    Connection, ConnectionState, NetworkStateRegistry, StaticTokenAuth, TcpTransportFactory, Token,
};
use realtime_wire::ProtocolMessage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::RealtimeConfig;
use logging::RealtimeLogFormatter;

/// Realtime pub/sub client node
#[derive(Parser, Debug)]
#[command(name = "redb-realtime", version, about = "Realtime pub/sub client node")]
struct Args {
    /// Broker host; overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Broker port; overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// Fallback host (repeatable); replaces the configured list
    #[arg(long = "fallback-host")]
    fallback_hosts: Vec<String>,

    /// Access token presented on connect
    #[arg(long)]
    token: Option<String>,

    /// Client id to request
    #[arg(long)]
    client_id: Option<String>,

    /// Recovery key printed by a previous run
    #[arg(long)]
    recover: Option<String>,

    /// Open, close and ping timeout, e.g. 10s
    #[arg(long)]
    request_timeout: Option<humantime::Duration>,

    /// Channel for --publish
    #[arg(long, default_value = "default")]
    channel: String,

    /// JSON payload to publish once (repeatable); plain text is sent as a string
    #[arg(long)]
    publish: Vec<String>,

    /// Ping the broker on this interval, e.g. 30s
    #[arg(long)]
    ping_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

impl Args {
    fn apply(&self, config: &mut RealtimeConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.fallback_hosts.is_empty() {
            config.fallback_hosts = self.fallback_hosts.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(client_id) = &self.client_id {
            config.client_id = Some(client_id.clone());
        }
        if let Some(recover) = &self.recover {
            config.recover = Some(recover.clone());
        }
        if let Some(timeout) = &self.request_timeout {
            config.request_timeout = **timeout;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("redb_realtime={}", args.log_level).parse()?)
        .add_directive(format!("realtime_connection={}", args.log_level).parse()?)
        .add_directive(format!("realtime_wire={}", args.log_level).parse()?);

    let color = logging::color_supported();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(color)
        .event_format(RealtimeLogFormatter::new("realtime", color))
        .init();

    info!("Starting reDB Realtime client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = RealtimeConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    let auth = Arc::new(StaticTokenAuth::new(config.token.clone().map(Token::new)));
    let network = NetworkStateRegistry::new();
    let connection = Connection::new(
        config.connection_options(),
        Arc::new(TcpTransportFactory),
        auth,
        &network,
    );
    let mut changes = connection.subscribe();
    let mut messages = connection.messages();

    // Queued until the connection is up.
    for payload in &args.publish {
        let data = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.clone()));
        let channel = args.channel.clone();
        connection
            .send(
                ProtocolMessage::publish(channel.clone(), data),
                Some(Box::new(move |result| match result {
                    Ok(()) => component_info!("publish", "Message on {} acknowledged", channel),
                    Err(e) => component_warn!("publish", "Message on {} rejected: {}", channel, e),
                })),
            )
            .await?;
    }

    let mut ping_timer = args.ping_interval.as_ref().map(|every| {
        let every = **every;
        tokio::time::interval_at(tokio::time::Instant::now() + every, every)
    });

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    match (&change.reason, change.retry_in) {
                        (Some(reason), Some(retry)) => component_info!(
                            "connection",
                            "{} -> {} ({}), retrying in {:?}",
                            change.previous, change.current, reason, retry
                        ),
                        (Some(reason), None) => component_info!(
                            "connection",
                            "{} -> {} ({})",
                            change.previous, change.current, reason
                        ),
                        (None, _) => component_info!(
                            "connection",
                            "{} -> {}",
                            change.previous, change.current
                        ),
                    }
                    if change.current == ConnectionState::Connected {
                        let snapshot = connection.snapshot();
                        component_info!(
                            "connection",
                            "Connected to {} as {:?}",
                            snapshot.host,
                            snapshot.connection_id
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} state changes", skipped);
                }
                Err(RecvError::Closed) => break,
            },

            message = messages.recv() => match message {
                Ok(message) => component_debug!(
                    "channel",
                    "Message on {:?}: {}",
                    message.channel,
                    message.data.map(|d| d.to_string()).unwrap_or_default()
                ),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} channel messages", skipped),
                Err(RecvError::Closed) => break,
            },

            _ = async {
                match ping_timer.as_mut() {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                match connection.ping().await {
                    Ok(rtt) => component_info!("ping", "Round trip {:?}", rtt),
                    Err(e) => component_warn!("ping", "Ping failed: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, closing connection");
                break;
            }
        }
    }

    match connection.recovery_key() {
        Some(key) => info!("Recovery key: {}", key),
        None => info!("No recovery key; the next run starts a new connection"),
    }
    if let Err(e) = connection.dispose().await {
        warn!("Failed to close connection cleanly: {}", e);
    }

    info!("Realtime client shutdown complete");
    Ok(())
}
