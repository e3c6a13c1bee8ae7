//! Protocol messages, error info, framing and payload encoders for the realtime client.
//!
//! This crate provides the data model shared by the connection layer and the
//! broker: protocol messages and their actions, the broker's error value,
//! a length-prefixed frame codec for stream transports, and the reversible
//! payload encoder chain.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u8 format            | 0 = JSON, 1 = CBOR         |
//! +----------------------+----------------------------+
//! | body                 | serialized ProtocolMessage |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod error;
pub mod error_info;
pub mod frame;
pub mod message;

// Re-export main types
pub use encoding::{EncoderChain, EncodingOptions, JsonEncoder, PayloadEncoder};
pub use error::WireError;
pub use error_info::ErrorInfo;
pub use frame::{decode_body, encode_body, encode_frame, Format, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
pub use message::{Action, ConnectionDetails, ProtocolMessage};

/// Protocol version announced to the broker
pub const PROTOCOL_VERSION: &str = "1.2";
