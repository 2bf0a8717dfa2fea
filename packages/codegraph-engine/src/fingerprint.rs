//! Content fingerprint (Blake3)
//!
//! Used only to answer "is this content byte-identical to what produced the
//! cached result". Blake3 is picked for speed; its cryptographic strength is
//! incidental and nothing relies on it. Never used for integrity or security
//! decisions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    /// Compute fingerprint from raw content (SIMD-accelerated)
    pub fn compute(content: &[u8]) -> Self {
        Self(blake3::hash(content))
    }

    /// Fingerprint of a file record's content, `None` for unreadable files
    pub fn of_content(content: Option<&str>) -> Option<Self> {
        content.map(|c| Self::compute(c.as_bytes()))
    }

    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.0 == other.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Result<Self, blake3::HexError> {
        Ok(Self(blake3::Hash::from_hex(hex)?))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form for log lines
        write!(f, "{}", &self.to_hex()[..12])
    }
}

// Serialized as hex (blake3::Hash has no serde impl)
impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        Self::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}
