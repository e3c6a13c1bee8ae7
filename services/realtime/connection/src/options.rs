//! Connection options and recovery key parsing.

use realtime_wire::Format;
use std::time::Duration;

/// Options controlling connection behaviour
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Primary realtime host
    pub host: String,
    /// Port used for every host
    pub port: u16,
    /// Alternate hosts tried after repeated failures
    pub fallback_hosts: Vec<String>,
    /// Seed for the fallback shuffle; random when unset
    pub fallback_seed: Option<u64>,
    /// Move to a fallback once this many fallback-eligible disconnects happened
    pub fallback_threshold: usize,
    /// Suspend once this many disconnects happened, in addition to the TTL rule
    pub suspend_threshold: Option<usize>,
    /// Retry delay while Disconnected
    pub disconnected_retry_timeout: Duration,
    /// Retry delay while Suspended
    pub suspended_retry_timeout: Duration,
    /// Assumed broker state TTL until the broker advertises one
    pub connection_state_ttl: Duration,
    /// Open, close and ping timeout
    pub realtime_request_timeout: Duration,
    /// How long callers wait for a command to be processed
    pub command_timeout: Duration,
    /// Bound on follow-up transitions for a single command
    pub max_transition_steps: usize,
    /// Queue messages sent while not connected
    pub queue_messages: bool,
    /// Connect as soon as the connection is created
    pub auto_connect: bool,
    /// Body format on the wire
    pub format: Format,
    /// Recovery key of a previous connection (`key:serial:msgSerial`)
    pub recover: Option<String>,
    /// Client id to request
    pub client_id: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7700,
            fallback_hosts: Vec::new(),
            fallback_seed: None,
            fallback_threshold: 1,
            suspend_threshold: None,
            disconnected_retry_timeout: Duration::from_secs(15),
            suspended_retry_timeout: Duration::from_secs(30),
            connection_state_ttl: Duration::from_secs(120),
            realtime_request_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            max_transition_steps: 16,
            queue_messages: true,
            auto_connect: true,
            format: Format::Json,
            recover: None,
            client_id: None,
        }
    }
}

/// Parsed recovery key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryKey {
    /// Connection key to recover
    pub key: String,
    /// Last connection serial seen
    pub serial: i64,
    /// Next outbound message serial
    pub message_serial: i64,
}

impl RecoveryKey {
    /// Parse `key:serial:msgSerial`; the key may itself contain `!` and `-`
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.rsplitn(3, ':');
        let message_serial = parts.next()?.parse().ok()?;
        let serial = parts.next()?.parse().ok()?;
        let key = parts.next()?;
        let valid_key = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '!' | '-'));
        if !valid_key {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            serial,
            message_serial,
        })
    }
}

impl std::fmt::Display for RecoveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.key, self.serial, self.message_serial)
    }
}
