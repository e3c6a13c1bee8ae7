//! Protocol messages exchanged with the broker.
//!
//! Field names follow the broker's camelCase JSON representation; the same
//! serde model is used for the CBOR body format.

use crate::error::WireError;
use crate::error_info::ErrorInfo;
use serde::{Deserialize, Serialize};

/// Protocol action carried by every message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    /// Keepalive and ping probe
    Heartbeat = 0,
    /// Broker acknowledged published messages
    Ack = 1,
    /// Broker rejected published messages
    Nack = 2,
    /// Client connect request
    Connect = 3,
    /// Broker confirmed the connection
    Connected = 4,
    /// Client disconnect request
    Disconnect = 5,
    /// Broker disconnected the client
    Disconnected = 6,
    /// Client close request
    Close = 7,
    /// Broker confirmed the close
    Closed = 8,
    /// Connection or channel level error
    Error = 9,
    /// Channel attach request
    Attach = 10,
    /// Channel attached
    Attached = 11,
    /// Channel detach request
    Detach = 12,
    /// Channel detached
    Detached = 13,
    /// Presence update
    Presence = 14,
    /// Published message
    Message = 15,
    /// Presence sync
    Sync = 16,
    /// In-band reauthentication
    Auth = 17,
}

impl TryFrom<u8> for Action {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Action::Heartbeat),
            1 => Ok(Action::Ack),
            2 => Ok(Action::Nack),
            3 => Ok(Action::Connect),
            4 => Ok(Action::Connected),
            5 => Ok(Action::Disconnect),
            6 => Ok(Action::Disconnected),
            7 => Ok(Action::Close),
            8 => Ok(Action::Closed),
            9 => Ok(Action::Error),
            10 => Ok(Action::Attach),
            11 => Ok(Action::Attached),
            12 => Ok(Action::Detach),
            13 => Ok(Action::Detached),
            14 => Ok(Action::Presence),
            15 => Ok(Action::Message),
            16 => Ok(Action::Sync),
            17 => Ok(Action::Auth),
            _ => Err(WireError::Action(value)),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action as u8
    }
}

impl Action {
    /// Whether a message with this action is tracked until the broker acks it
    pub fn requires_ack(self) -> bool {
        matches!(self, Action::Message | Action::Presence)
    }
}

/// Connection details supplied by the broker in a CONNECTED message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// Key used to resume this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,
    /// Client id bound to the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// How long the broker keeps connection state after a disconnect (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state_ttl: Option<u64>,
    /// Longest silence the broker allows before heartbeats stop arriving (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_interval: Option<u64>,
}

/// A protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    /// Message action
    pub action: Action,
    /// Message id (heartbeat correlation id for pings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel name for channel-level messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Connection id assigned by the broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Serial of this message within the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_serial: Option<i64>,
    /// Outbound message serial (or first serial of an ACK/NACK range)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_serial: Option<i64>,
    /// Number of serials covered by an ACK/NACK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Connection details on CONNECTED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_details: Option<ConnectionDetails>,
    /// Opaque application payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Payload encoding applied to `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl ProtocolMessage {
    /// Create an empty message with the given action
    pub fn new(action: Action) -> Self {
        Self {
            action,
            id: None,
            channel: None,
            connection_id: None,
            connection_serial: None,
            msg_serial: None,
            count: None,
            error: None,
            connection_details: None,
            data: None,
            encoding: None,
        }
    }

    /// Heartbeat probe with a correlation id
    pub fn heartbeat(id: impl Into<String>) -> Self {
        let mut message = Self::new(Action::Heartbeat);
        message.id = Some(id.into());
        message
    }

    /// Published message on a channel
    pub fn publish(channel: impl Into<String>, data: serde_json::Value) -> Self {
        let mut message = Self::new(Action::Message);
        message.channel = Some(channel.into());
        message.data = Some(data);
        message
    }

    /// Connection key from the connection details, if present
    pub fn connection_key(&self) -> Option<&str> {
        self.connection_details
            .as_ref()
            .and_then(|details| details.connection_key.as_deref())
    }

    /// Whether this message carries an error in the token range
    pub fn has_token_error(&self) -> bool {
        self.error.as_ref().map(|e| e.is_token_error()).unwrap_or(false)
    }

    /// Connection-level messages have no channel
    pub fn is_connection_level(&self) -> bool {
        self.channel.is_none()
    }
}
