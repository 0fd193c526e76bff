//! Opaque cursor tokens.
//!
//! A token is URL-safe base64 (no padding) over a small JSON document holding
//! the seek direction, the ordering keys and the boundary row's values for
//! those keys. The format is an implementation detail and is not versioned.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{FaylError, FaylResult};

/// Which side of the boundary row to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Seek {
    #[serde(rename = "next")]
    Next,
    #[serde(rename = "prev")]
    Prev,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Cursor {
    #[serde(rename = "d")]
    pub seek: Seek,
    #[serde(rename = "k")]
    pub keys: Vec<String>,
    #[serde(rename = "v")]
    pub values: Vec<JsonValue>,
}

impl Cursor {
    pub(crate) fn encode(&self) -> String {
        // Serializing plain strings and JSON values cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub(crate) fn decode(token: &str) -> FaylResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| FaylError::compile("", format!("malformed cursor: {}", e)))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| FaylError::compile("", format!("malformed cursor: {}", e)))?;

        if cursor.keys.len() != cursor.values.len() {
            return Err(FaylError::compile("", "malformed cursor: key/value count mismatch"));
        }
        Ok(cursor)
    }
}
