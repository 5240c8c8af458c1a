//! Canonical 20-byte account addresses.
//!
//! Addresses are accepted as 40 hex characters with an optional `0x` prefix.
//! All-lowercase and all-uppercase spellings are taken as-is; a mixed-case
//! spelling is treated as an EIP-55 checksum and must match it exactly. The
//! textual form produced by this module is always the checksummed one.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::common::keccak256;
use crate::error::{Error, Result};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    #[inline]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Parses and canonicalizes an address string.
    ///
    /// # Errors
    /// Returns `InvalidAddress` if the text is not 40 hex characters after the
    /// optional prefix, or if a mixed-case spelling fails the checksum.
    pub fn normalize(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let cleaned = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if cleaned.len() != 40 {
            return Err(Error::InvalidAddress(format!(
                "expected 40 hex chars, got {}",
                cleaned.len()
            )));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(cleaned, &mut bytes)
            .map_err(|e| Error::InvalidAddress(format!("invalid hex encoding: {e}")))?;
        let address = Address(bytes);

        let has_lower = cleaned.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = cleaned.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper && address.checksum_hex() != cleaned {
            return Err(Error::InvalidAddress(format!("bad checksum for 0x{cleaned}")));
        }

        Ok(address)
    }

    /// Mixed-case checksum spelling without the `0x` prefix.
    fn checksum_hex(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = keccak256(lower.as_bytes());
        lower
            .char_indices()
            .map(|(i, c)| {
                let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
                if c.is_ascii_alphabetic() && nibble >= 8 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    }

    /// The unique checksummed textual form, `0x`-prefixed.
    pub fn to_checksum(&self) -> String {
        format!("0x{}", self.checksum_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::normalize(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::normalize(&text).map_err(D::Error::custom)
    }
}
