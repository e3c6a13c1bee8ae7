//! Payload encoder chain.
//!
//! Encoders run in registration order on the way out and in reverse order on
//! the way in. Each step appends its name to the slash-separated `encoding`
//! field so the receiving side knows which steps to undo.

use crate::error::WireError;
use crate::message::ProtocolMessage;
use serde_json::Value;

/// Options applied while encoding or decoding a payload
#[derive(Debug, Clone, Default)]
pub struct EncodingOptions {
    /// Reject encoded payloads larger than this many bytes
    pub max_payload_size: Option<usize>,
}

/// A single reversible payload transformation
pub trait PayloadEncoder: Send + Sync {
    /// Name recorded in the `encoding` field
    fn name(&self) -> &'static str;

    /// Apply the transformation; returns false if it did not apply
    fn encode(&self, data: &mut Value, options: &EncodingOptions) -> Result<bool, WireError>;

    /// Undo the transformation
    fn decode(&self, data: &mut Value, options: &EncodingOptions) -> Result<(), WireError>;
}

/// Structured data (objects and arrays) is sent as a JSON string
#[derive(Debug, Default)]
pub struct JsonEncoder;

impl PayloadEncoder for JsonEncoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, data: &mut Value, _options: &EncodingOptions) -> Result<bool, WireError> {
        if !(data.is_object() || data.is_array()) {
            return Ok(false);
        }
        *data = Value::String(serde_json::to_string(data)?);
        Ok(true)
    }

    fn decode(&self, data: &mut Value, _options: &EncodingOptions) -> Result<(), WireError> {
        let text = data.as_str().ok_or_else(|| WireError::Encoding {
            encoding: self.name().to_string(),
            reason: "expected a string payload".to_string(),
        })?;
        *data = serde_json::from_str(text)?;
        Ok(())
    }
}

/// Ordered chain of payload encoders
pub struct EncoderChain {
    encoders: Vec<Box<dyn PayloadEncoder>>,
}

impl EncoderChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            encoders: Vec::new(),
        }
    }

    /// Append an encoder to the chain
    pub fn with(mut self, encoder: impl PayloadEncoder + 'static) -> Self {
        self.encoders.push(Box::new(encoder));
        self
    }

    /// Encode the message payload in place
    pub fn encode(
        &self,
        message: &mut ProtocolMessage,
        options: &EncodingOptions,
    ) -> Result<(), WireError> {
        let Some(data) = message.data.as_mut() else {
            return Ok(());
        };

        let mut steps: Vec<String> = message
            .encoding
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|e| e.split('/').map(str::to_string).collect())
            .unwrap_or_default();

        for encoder in &self.encoders {
            if encoder.encode(data, options)? {
                steps.push(encoder.name().to_string());
            }
        }

        if let Some(limit) = options.max_payload_size {
            let size = serde_json::to_vec(data)?.len();
            if size > limit {
                return Err(WireError::Size(size));
            }
        }

        message.encoding = if steps.is_empty() {
            None
        } else {
            Some(steps.join("/"))
        };
        Ok(())
    }

    /// Decode the message payload in place, undoing steps last to first
    pub fn decode(
        &self,
        message: &mut ProtocolMessage,
        options: &EncodingOptions,
    ) -> Result<(), WireError> {
        if message.data.is_none() {
            return Ok(());
        }
        let (Some(data), Some(encoding)) = (message.data.as_mut(), message.encoding.take()) else {
            return Ok(());
        };

        let mut steps: Vec<&str> = encoding.split('/').filter(|s| !s.is_empty()).collect();
        while let Some(step) = steps.last().copied() {
            let Some(encoder) = self.encoders.iter().rev().find(|e| e.name() == step) else {
                break;
            };
            encoder.decode(data, options)?;
            steps.pop();
        }

        // Steps without a matching encoder stay recorded for the caller.
        if !steps.is_empty() {
            message.encoding = Some(steps.join("/"));
        }
        Ok(())
    }
}

impl Default for EncoderChain {
    fn default() -> Self {
        Self::new().with(JsonEncoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_payload_becomes_json_string() {
        let chain = EncoderChain::default();
        let mut message = ProtocolMessage::publish("chan", json!({"a": 1}));
        chain.encode(&mut message, &EncodingOptions::default()).unwrap();

        assert_eq!(message.encoding.as_deref(), Some("json"));
        assert_eq!(message.data, Some(json!(r#"{"a":1}"#)));

        chain.decode(&mut message, &EncodingOptions::default()).unwrap();
        assert_eq!(message.data, Some(json!({"a": 1})));
        assert_eq!(message.encoding, None);
    }

    #[test]
    fn test_plain_string_untouched() {
        let chain = EncoderChain::default();
        let mut message = ProtocolMessage::publish("chan", json!("hello"));
        chain.encode(&mut message, &EncodingOptions::default()).unwrap();
        assert_eq!(message.encoding, None);
        assert_eq!(message.data, Some(json!("hello")));
    }

    #[test]
    fn test_unknown_step_is_left_in_place() {
        let chain = EncoderChain::default();
        let mut message = ProtocolMessage::publish("chan", json!(r#"[1,2]"#));
        message.encoding = Some("cipher+aes-128-cbc/json".to_string());
        chain.decode(&mut message, &EncodingOptions::default()).unwrap();

        assert_eq!(message.data, Some(json!([1, 2])));
        assert_eq!(message.encoding.as_deref(), Some("cipher+aes-128-cbc"));
    }

    #[test]
    fn test_payload_size_limit() {
        let chain = EncoderChain::default();
        let mut message = ProtocolMessage::publish("chan", json!({"k": "v".repeat(32)}));
        let options = EncodingOptions {
            max_payload_size: Some(8),
        };
        assert!(matches!(chain.encode(&mut message, &options), Err(WireError::Size(_))));
    }
}
