//! Embedding storage codec
//!
//! Stored embeddings arrive in one of three legacy representations:
//! - JSON numeric array text: `[0.12, -0.4, ...]`
//! - binary buffer: little-endian f32 sequence (or, in old rows, the
//!   UTF-8 bytes of a JSON array)
//! - hex-escaped byte string: `\x` followed by hex digits, whose bytes are
//!   then read like a binary buffer
//!
//! All new writes use the little-endian f32 buffer ([`encode_embedding`]).

use thiserror::Error;

const HEX_ESCAPE_PREFIX: &str = "\\x";

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Embedding value is empty")]
    Empty,

    #[error("Invalid JSON embedding: {0}")]
    InvalidJson(String),

    #[error("Invalid hex embedding: {0}")]
    InvalidHex(String),

    #[error("Binary embedding length {0} is not a multiple of 4")]
    MisalignedBuffer(usize),

    #[error("Unrecognized text embedding format")]
    UnrecognizedText,
}

/// Column value as read from SQLite (`typeof(embedding)` + raw bytes)
#[derive(Debug, Clone, PartialEq)]
pub enum RawEmbedding {
    Text(String),
    Blob(Vec<u8>),
}

impl RawEmbedding {
    /// Build from a `typeof()` name and the column cast to BLOB.
    ///
    /// Returns None for NULL columns.
    pub fn from_sql(kind: &str, bytes: Option<Vec<u8>>) -> Option<Self> {
        let bytes = bytes?;
        match kind {
            "text" => Some(RawEmbedding::Text(String::from_utf8_lossy(&bytes).into_owned())),
            "null" => None,
            _ => Some(RawEmbedding::Blob(bytes)),
        }
    }
}

/// Detected storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    Array,
    Buffer,
    HexEscaped,
}

/// Identify which legacy representation a raw value uses
pub fn detect_format(raw: &RawEmbedding) -> Result<VectorFormat, DecodeError> {
    match raw {
        RawEmbedding::Blob(bytes) if bytes.is_empty() => Err(DecodeError::Empty),
        RawEmbedding::Blob(_) => Ok(VectorFormat::Buffer),
        RawEmbedding::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Err(DecodeError::Empty)
            } else if trimmed.starts_with(HEX_ESCAPE_PREFIX) {
                Ok(VectorFormat::HexEscaped)
            } else if trimmed.starts_with('[') {
                Ok(VectorFormat::Array)
            } else {
                Err(DecodeError::UnrecognizedText)
            }
        }
    }
}

/// Decode any supported representation into a vector
pub fn decode_embedding(raw: &RawEmbedding) -> Result<Vec<f32>, DecodeError> {
    match (detect_format(raw)?, raw) {
        (VectorFormat::Array, RawEmbedding::Text(text)) => parse_json_array(text.trim()),
        (VectorFormat::HexEscaped, RawEmbedding::Text(text)) => {
            let digits = &text.trim()[HEX_ESCAPE_PREFIX.len()..];
            let bytes = hex::decode(digits).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
            decode_buffer(&bytes)
        }
        (_, RawEmbedding::Blob(bytes)) => decode_buffer(bytes),
        (_, RawEmbedding::Text(_)) => Err(DecodeError::UnrecognizedText),
    }
}

/// Encode for storage (little-endian f32)
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_buffer(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    // Legacy rows stored the JSON text itself as bytes
    if bytes.first() == Some(&b'[') && bytes.last() == Some(&b']') {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if let Ok(vector) = parse_json_array(text) {
                return Ok(vector);
            }
        }
    }

    if bytes.len() % 4 != 0 {
        return Err(DecodeError::MisalignedBuffer(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn parse_json_array(text: &str) -> Result<Vec<f32>, DecodeError> {
    let vector: Vec<f32> =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    if vector.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(vector)
}
