//! Domain models representing indexed chain data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

mod account;
mod block;
mod contract;
mod transaction;
mod validator;

pub use account::*;
pub use block::*;
pub use contract::*;
pub use transaction::*;
pub use validator::*;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Fixed-size Byte Types
// =============================================================================

/// Macro to generate fixed-size byte newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `from_slice()` - Build from a byte slice of the exact length
/// - `Display`/`Debug` as hex, `FromStr`, `From<[u8; N]>`
/// - serde as a 0x-prefixed hex string
macro_rules! fixed_bytes_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LEN: usize = $len;

            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Build from a slice, `None` if the length doesn't match.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(Self)
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes_newtype!(
    /// 32-byte hash (block hash, transaction hash, roots).
    H256,
    32
);

fixed_bytes_newtype!(
    /// 20-byte account or contract address.
    Address,
    20
);

/// Block hash alias kept for readability at call sites.
pub type BlockHash = H256;

/// Transaction hash alias kept for readability at call sites.
pub type TxHash = H256;

// =============================================================================
// Variable-length Bytes
// =============================================================================

/// Arbitrary byte payload (calldata, extra data, bloom), hex on the wire.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() % 2 == 1 {
            // Some nodes drop the leading zero nibble of odd-length values
            return hex::decode(format!("0{s}")).map(Self);
        }
        hex::decode(s).map(Self)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bytes({})", self.to_hex())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Numeric helpers
// =============================================================================

/// Parse a node quantity: `0x`-prefixed hex, or a plain decimal string.
///
/// The `0x` prefix is stripped and the remainder parsed base-16.
pub fn parse_quantity(s: &str) -> Option<u128> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(0),
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// serde helper: `u128` wei amounts as decimal strings.
///
/// Accepts strings (decimal or `0x` hex) and plain JSON integers.
pub mod wei_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(u128::from(n)),
            Raw::Str(s) => super::parse_quantity(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {s}"))),
        }
    }
}

/// serde helper: optional `u128` amounts as decimal strings.
pub mod opt_wei_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u128>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            super::parse_quantity(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {s}")))
        })
        .transpose()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h256_hex_roundtrip() {
        let hex = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let hash = H256::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn address_without_prefix() {
        let hex = "d43593c715fdd31c61141abd04a99fd6822c8558";
        let address = Address::from_hex(hex).unwrap();
        assert_eq!(address.to_hex(), format!("0x{}", hex));
    }

    #[test]
    fn address_is_case_insensitive() {
        let lower = Address::from_hex("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd").unwrap();
        let upper = Address::from_hex("0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn fixed_bytes_invalid_length() {
        assert!(H256::from_hex("0x1234").is_err());
        assert!(Address::from_slice(&[0u8; 19]).is_none());
    }

    #[test]
    fn fixed_bytes_serde_as_hex_string() {
        let address = Address([0x11; 20]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "11".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    // Test critique: les quantités hexadécimales du node (0x strip + base 16)
    #[test]
    fn parse_quantity_hex_and_decimal() {
        assert_eq!(parse_quantity("0x64"), Some(100));
        assert_eq!(parse_quantity("0x"), Some(0));
        assert_eq!(parse_quantity("100"), Some(100));
        assert_eq!(
            parse_quantity("0xde0b6b3a7640000"),
            Some(1_000_000_000_000_000_000)
        );
        assert_eq!(parse_quantity("0xzz"), None);
    }

    #[test]
    fn bytes_odd_length_hex() {
        let bytes = Bytes::from_hex("0xabc").unwrap();
        assert_eq!(bytes.0, vec![0x0a, 0xbc]);
    }
}
