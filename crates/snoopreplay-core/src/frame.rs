use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Characters stripped from a rendered frame value.
const DECORATION: &[char] = &['[', ']', '\'', '"', ',', ' '];

/// Collapse a rendered byte list (`"[00, A4, 04, 00]"`) into a dense token (`00A40400`).
///
/// Total and idempotent: it only ever removes characters.
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(|c| !DECORATION.contains(c)).collect()
}

/// One protocol message in normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Frame(String);

impl Frame {
    /// Normalize `raw` and wrap it.
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// Render inbound bytes the way a live handler sees them: uppercase hex, no separators.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(bytes))
    }

    /// Decode the normalized token back into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Frame::from)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Frame {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Frame {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

/// A single observed command/response turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub command: Frame,
    pub response: Frame,
}

impl Exchange {
    pub fn new(command: impl Into<Frame>, response: impl Into<Frame>) -> Self {
        Self {
            command: command.into(),
            response: response.into(),
        }
    }
}
