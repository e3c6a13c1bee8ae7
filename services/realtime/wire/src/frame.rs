//! Message framing for stream transports.
//!
//! Each protocol message travels as one length-prefixed frame:
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

use crate::error::WireError;
use crate::message::ProtocolMessage;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Maximum frame size (16 MiB default)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Body serialization format
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Text protocol
    #[default]
    Json = 0,
    /// Binary protocol
    Cbor = 1,
}

impl TryFrom<u8> for Format {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Format::Json),
            1 => Ok(Format::Cbor),
            _ => Err(WireError::Format(value)),
        }
    }
}

impl Format {
    /// Query parameter value announcing this format to the broker
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Cbor => "cbor",
        }
    }
}

/// Serialize a message body in the given format
pub fn encode_body(message: &ProtocolMessage, format: Format) -> Result<Vec<u8>, WireError> {
    match format {
        Format::Json => Ok(serde_json::to_vec(message)?),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(message, &mut buf).map_err(|e| WireError::Cbor(e.to_string()))?;
            Ok(buf)
        }
    }
}

/// Deserialize a message body in the given format
pub fn decode_body(body: &[u8], format: Format) -> Result<ProtocolMessage, WireError> {
    match format {
        Format::Json => Ok(serde_json::from_slice(body)?),
        Format::Cbor => ciborium::from_reader(body).map_err(|e| WireError::Cbor(e.to_string())),
    }
}

/// Encode a message into a complete frame
pub fn encode_frame(
    message: &ProtocolMessage,
    format: Format,
    max_frame_size: usize,
) -> Result<Bytes, WireError> {
    let body = encode_body(message, format)?;
    let frame_len = body.len() + 1;
    if frame_len > max_frame_size {
        return Err(WireError::Size(frame_len));
    }

    let mut buf = BytesMut::with_capacity(4 + frame_len);
    buf.put_u32(frame_len as u32);
    buf.put_u8(format as u8);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Frame decoder for parsing incoming frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Decode one message from a buffer, or `None` if more bytes are needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ProtocolMessage>, WireError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if frame_len > self.max_frame_size {
            warn!(
                "Frame of {} bytes exceeds limit of {}",
                frame_len, self.max_frame_size
            );
            return Err(WireError::Size(frame_len));
        }
        if frame_len == 0 {
            return Err(WireError::Malformed);
        }
        if buf.len() < 4 + frame_len {
            trace!("Partial frame: {} of {} bytes", buf.len() - 4, frame_len);
            return Ok(None);
        }

        buf.advance(4);
        let mut frame_buf = buf.split_to(frame_len).freeze();
        let format = Format::try_from(frame_buf.get_u8())?;
        decode_body(&frame_buf, format).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
