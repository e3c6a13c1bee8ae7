//! Connection state machine and transport resilience for the realtime client.
//!
//! This crate keeps a logical connection to the broker alive across transport
//! failures:
//! - Lifecycle states with pure transition rules
//! - Serialized command processing on a single worker task
//! - Resume and recovery of connection state after a transport drop
//! - Fallback host rotation and suspension after repeated failures
//! - ACK/NACK tracking of outbound messages
//! - Token renewal on authentication errors
//!
//! ## Architecture
//!
//! ```text
//! Connection (façade) ──commands──▶ Workflow worker ──▶ ConnectionManager
//!        ▲                                                │    │
//!        └──── watch snapshot / broadcast state changes ◀─┘    ▼
//!                                              Transport (TCP), Auth, timers
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ack;
pub mod auth;
pub mod connection;
pub mod error;
pub mod hosts;
pub mod keepalive;
pub mod ledger;
pub mod manager;
pub mod network;
pub mod options;
pub mod state;
pub mod transport;
pub mod workflow;

// Re-export main types
pub use ack::{AckCallback, AckQueue, AckResult};
pub use auth::{Auth, StaticTokenAuth, Token};
pub use connection::{Connection, ConnectionEvent, ConnectionSnapshot, ConnectionStateChange};
pub use error::{ConnectionError, TransportError};
pub use hosts::HostSelector;
pub use ledger::AttemptLedger;
pub use manager::ConnectionManager;
pub use network::{NetworkState, NetworkStateRegistry, NetworkSubscription};
pub use options::{ConnectionOptions, RecoveryKey};
pub use state::{ConnectionState, DecisionContext, State, StateEvent, Transition};
pub use transport::{
    TcpTransport, TcpTransportFactory, Transport, TransportFactory, TransportListener,
    TransportParams,
};
pub use workflow::{Command, CommandQueue, Workflow};
