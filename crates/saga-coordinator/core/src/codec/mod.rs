//! Wire codec traits and implementations.
//!
//! This module provides the [`MessageCodec`] trait used to turn
//! [`CompensationMessage`]s and [`PropagationToken`]s into bytes and back.
//! Consumers hold an `Arc<dyn MessageCodec>` so the format can be swapped
//! without touching the coordinator:
//!
//! ```ignore
//! let bytes = codec.encode_message(&message)?;
//! let decoded = codec.decode_message(&bytes)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::model::{CompensationMessage, PropagationToken};

/// Version stamped into every encoded envelope.
pub const CURRENT_WIRE_VERSION: u32 = 1;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON serialization/deserialization error")]
    Json(#[from] serde_json::Error),

    #[error("Invalid wire version: expected {expected}, got {actual}")]
    InvalidVersion { expected: u32, actual: u32 },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CodecError {
    /// Create a version mismatch error.
    pub fn version_mismatch(expected: u32, actual: u32) -> Self {
        Self::InvalidVersion { expected, actual }
    }

    /// Create a parse error.
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

/// Trait for encoding and decoding coordinator payloads.
pub trait MessageCodec: Send + Sync + 'static {
    /// Encode a compensation message to bytes.
    fn encode_message(&self, message: &CompensationMessage) -> Result<Vec<u8>, CodecError>;

    /// Decode a compensation message from bytes.
    fn decode_message(&self, data: &[u8]) -> Result<CompensationMessage, CodecError>;

    /// Encode a propagation token into a header-safe string.
    fn encode_token(&self, token: &PropagationToken) -> Result<String, CodecError>;

    /// Decode a propagation token from a header value.
    fn decode_token(&self, value: &str) -> Result<PropagationToken, CodecError>;

    /// Return a unique identifier for this codec.
    fn codec_id(&self) -> &'static str;
}

/// Supported codec types for factory creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecType {
    /// JSON codec - human-readable, debuggable
    #[default]
    Json,
}

impl CodecType {
    /// Create a codec instance from this type.
    pub fn create_codec(&self) -> Box<dyn MessageCodec> {
        match self {
            Self::Json => Box::new(JsonCodec::new()),
        }
    }
}

impl std::str::FromStr for CodecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" | "text" => Ok(Self::Json),
            _ => Err(format!("Unknown codec type: {}", s)),
        }
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
        }
    }
}

// ============================================================================
// JSON Codec
// ============================================================================

/// JSON-based codec.
///
/// Messages are wrapped in a versioned envelope so a consumer can reject
/// payloads produced by an incompatible producer instead of misreading them.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    body: T,
}

impl MessageCodec for JsonCodec {
    fn encode_message(&self, message: &CompensationMessage) -> Result<Vec<u8>, CodecError> {
        let envelope = Envelope {
            version: CURRENT_WIRE_VERSION,
            body: message,
        };
        serde_json::to_vec(&envelope).map_err(CodecError::Json)
    }

    fn decode_message(&self, data: &[u8]) -> Result<CompensationMessage, CodecError> {
        let envelope: Envelope<CompensationMessage> = serde_json::from_slice(data)?;
        if envelope.version != CURRENT_WIRE_VERSION {
            return Err(CodecError::version_mismatch(
                CURRENT_WIRE_VERSION,
                envelope.version,
            ));
        }
        Ok(envelope.body)
    }

    fn encode_token(&self, token: &PropagationToken) -> Result<String, CodecError> {
        serde_json::to_string(token).map_err(CodecError::Json)
    }

    fn decode_token(&self, value: &str) -> Result<PropagationToken, CodecError> {
        if value.trim().is_empty() {
            return Err(CodecError::parse_error("empty propagation token"));
        }
        serde_json::from_str(value).map_err(CodecError::Json)
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }
}
