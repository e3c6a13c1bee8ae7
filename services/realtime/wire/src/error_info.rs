//! Broker-facing error value carried by protocol messages and state changes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generic client-side failure
pub const CLIENT_ERROR: u32 = 40000;
/// Token expired or otherwise rejected; the start of the token error range
pub const TOKEN_ERROR: u32 = 40140;
/// Last code of the token error range
pub const TOKEN_ERROR_END: u32 = 40149;
/// Token renewal is not possible with the configured credentials
pub const TOKEN_NOT_RENEWABLE: u32 = 40171;
/// Internal broker error
pub const INTERNAL_ERROR: u32 = 50000;
/// Request timed out
pub const TIMEOUT: u32 = 50003;
/// Connection failed
pub const CONNECTION_FAILED: u32 = 80000;
/// Connection suspended after prolonged reconnection failure
pub const CONNECTION_SUSPENDED: u32 = 80002;
/// Connection disconnected
pub const DISCONNECTED: u32 = 80003;
/// Connection closed
pub const CONNECTION_CLOSED: u32 = 80017;
/// Connection was not resumed and its state was lost
pub const UNABLE_TO_RECOVER: u32 = 80008;

/// Error information as reported by the broker or produced locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Broker error code
    pub code: u32,
    /// HTTP-equivalent status code, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Human readable message
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    /// Create an error with code, status and message
    pub fn new(code: u32, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
        }
    }

    /// Connection failed
    pub fn reason_failed() -> Self {
        Self::new(CONNECTION_FAILED, Some(400), "Connection failed")
    }

    /// Connection closed
    pub fn reason_closed() -> Self {
        Self::new(CONNECTION_CLOSED, Some(400), "Connection closed")
    }

    /// Connection disconnected
    pub fn reason_disconnected() -> Self {
        Self::new(DISCONNECTED, Some(503), "Connection disconnected")
    }

    /// Connection suspended
    pub fn reason_suspended() -> Self {
        Self::new(CONNECTION_SUSPENDED, Some(503), "Connection suspended")
    }

    /// Request timed out
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TIMEOUT, Some(504), message)
    }

    /// Whether this is a token error that may be cured by renewing the token
    pub fn is_token_error(&self) -> bool {
        (TOKEN_ERROR..=TOKEN_ERROR_END).contains(&self.code)
    }

    /// Whether a failure carrying this error should push the client to a fallback host.
    ///
    /// Only broker-side (5xx) errors qualify; client errors such as expired
    /// tokens would fail the same way everywhere.
    pub fn should_use_fallback(&self) -> bool {
        matches!(self.status_code, Some(s) if (500..=504).contains(&s))
    }

    /// Whether the broker reported a 4xx status for this error
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code, Some(s) if (400..500).contains(&s))
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "[{}/{}] {}", self.code, status, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ErrorInfo {}
