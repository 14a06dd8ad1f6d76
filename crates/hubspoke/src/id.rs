//! Hub and spoke identities: 16 random bytes, rendered as lowercase hex.
//!
//! Uniqueness is assumed from the size of the token space and never checked.
use std::fmt;
use std::str::FromStr;

use crate::HubError;

/// Size of an identity in raw bytes.
pub const ID_SIZE: usize = 16;

/// Opaque random identity of a hub or a spoke.
///
/// Displayed and parsed as a 32-character hex string; sent on the wire as
/// the raw 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([u8; ID_SIZE]);

/// Identity of a hub.
pub type HubId = Id;

/// Identity of a spoke.
pub type SpokeId = Id;

impl Id {
    /// Generate a fresh identity from the thread-local CSPRNG.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Wrap an existing 16-byte array.
    pub const fn from_array(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build an identity from a raw byte slice, which must be exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HubError> {
        <[u8; ID_SIZE]>::try_from(bytes)
            .map(Self)
            .map_err(|_| {
                HubError::InvalidId(format!("expected {ID_SIZE} bytes, got {}", bytes.len()))
            })
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// True if `s` is exactly 32 hex digits (either case).
    pub fn is_valid_str(s: &str) -> bool {
        s.len() == ID_SIZE * 2 && s.bytes().all(|c| c.is_ascii_hexdigit())
    }

    /// True if `bytes` has the length of an identity.
    pub fn is_valid_bytes(bytes: &[u8]) -> bool {
        bytes.len() == ID_SIZE
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0[..4]);
        write!(f, "Id({hex}...)")
    }
}

impl FromStr for Id {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid_str(s) {
            return Err(HubError::InvalidId(s.to_string()));
        }
        let mut bytes = [0u8; ID_SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| HubError::InvalidId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for Id {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
