//! Shared utilities for queue payload parsing.
//!
//! Upstream publishers are loosely typed: numbers arrive as JSON numbers,
//! decimal strings or `0x` hex strings, and field names vary between
//! producers. These helpers accept every form seen in practice.

use chrono::{DateTime, Utc};
use serde_json::Value;

use chainlens_core::models::{Address, H256, parse_quantity};

// =============================================================================
// Field extraction
// =============================================================================

/// Extract a field from a payload object, trying multiple key names in order.
///
/// # Example
///
/// ```ignore
/// let kind = extract_field(data, &["type", "account_type"], parse_string);
/// ```
pub fn extract_field<T>(
    data: &Value,
    keys: &[&str],
    parser: fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter()
        .find_map(|key| data.get(*key).filter(|v| !v.is_null()))
        .and_then(parser)
}

// =============================================================================
// Numeric parsing
// =============================================================================

/// Parse an unsigned quantity from a JSON number, decimal string or `0x` hex string.
pub fn parse_u128(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => parse_quantity(s),
        _ => None,
    }
}

pub fn parse_u64(value: &Value) -> Option<u64> {
    parse_u128(value).and_then(|v| v.try_into().ok())
}

pub fn parse_u32(value: &Value) -> Option<u32> {
    parse_u128(value).and_then(|v| v.try_into().ok())
}

pub fn parse_u8(value: &Value) -> Option<u8> {
    parse_u128(value).and_then(|v| v.try_into().ok())
}

// =============================================================================
// Hash/address parsing
// =============================================================================

/// Parse a 32-byte hash from a hex string.
pub fn parse_h256(value: &Value) -> Option<H256> {
    value.as_str().and_then(|s| H256::from_hex(s).ok())
}

/// Parse a 20-byte address from a hex string.
pub fn parse_address(value: &Value) -> Option<Address> {
    value.as_str().and_then(|s| Address::from_hex(s).ok())
}

// =============================================================================
// Misc
// =============================================================================

/// Parse a timestamp: unix seconds (number or string) or RFC 3339.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = parse_u64(value) {
        return DateTime::from_timestamp(i64::try_from(secs).ok()?, 0);
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a non-empty trimmed string.
pub fn parse_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a list of strings, skipping anything that isn't one.
pub fn parse_string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(parse_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quantity_forms() {
        assert_eq!(parse_u64(&json!(100)), Some(100));
        assert_eq!(parse_u64(&json!("100")), Some(100));
        assert_eq!(parse_u64(&json!("0x64")), Some(100));
        assert_eq!(parse_u64(&json!(-1)), None);
        assert_eq!(parse_u8(&json!(300)), None);
        assert_eq!(
            parse_u128(&json!("1000000000000000000000")),
            Some(1_000_000_000_000_000_000_000)
        );
    }

    #[test]
    fn test_extract_field_tries_keys_in_order() {
        let data = json!({ "account_type": "EOA", "type": null });
        assert_eq!(
            extract_field(&data, &["type", "account_type"], parse_string),
            Some("EOA".to_string())
        );
        assert_eq!(extract_field(&data, &["missing"], parse_string), None);
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(parse_timestamp(&json!(1_700_000_000)), Some(expected));
        assert_eq!(parse_timestamp(&json!("0x6553f100")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!("2023-11-14T22:13:20Z")),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn test_hash_requires_full_length() {
        assert!(parse_h256(&json!(format!("0x{}", "ab".repeat(32)))).is_some());
        assert!(parse_h256(&json!("0xabc")).is_none());
        assert!(parse_address(&json!(format!("0x{}", "11".repeat(20)))).is_some());
    }
}
