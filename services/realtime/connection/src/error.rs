//! Error types for the connection layer.

use crate::state::ConnectionState;
use realtime_wire::{error_info, ErrorInfo, WireError};
use thiserror::Error;

/// Errors raised by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket level failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded
    #[error("wire: {0}")]
    Wire(#[from] WireError),

    /// Operation on a transport that is not open
    #[error("transport not open")]
    NotOpen,

    /// Could not reach the host in time
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
}

impl TransportError {
    /// Broker-style error describing this failure; transport failures are
    /// reported as a retryable disconnect.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(error_info::DISCONNECTED, Some(503), self.to_string())
    }
}

/// Errors returned to callers of the connection API
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The operation is not possible in the current state
    #[error("cannot {operation} while connection is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State at the time of the attempt
        state: ConnectionState,
    },

    /// A bounded wait expired
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The command worker has stopped
    #[error("connection workflow has shut down")]
    WorkflowClosed,

    /// Follow-up events kept producing transitions
    #[error("transition did not settle after {steps} steps (state {state})")]
    TransitionLoop {
        /// Steps taken before giving up
        steps: usize,
        /// State when the loop was cut
        state: ConnectionState,
    },

    /// Transport failure surfaced to a caller
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Operation failed with a broker or state error
    #[error("{0}")]
    Protocol(ErrorInfo),

    /// The connection was disposed
    #[error("connection has been disposed")]
    Disposed,
}

impl From<ErrorInfo> for ConnectionError {
    fn from(error: ErrorInfo) -> Self {
        ConnectionError::Protocol(error)
    }
}
