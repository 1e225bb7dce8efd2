//! Shared helper functions for PostgreSQL row conversion.

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{Address, H256};

/// Map a sqlx error to a query error, surfacing unique violations.
pub fn query_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return StorageError::ConstraintViolation(db.message().to_string());
    }
    StorageError::QueryError(err.to_string())
}

/// Convert a `Vec<u8>` to an [`H256`].
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_h256(bytes: Vec<u8>, field_name: &str) -> StorageResult<H256> {
    H256::from_slice(&bytes).ok_or_else(|| invalid_length(field_name, 32, bytes.len()))
}

/// Convert a `Vec<u8>` to an [`H256`], rejecting all-zero values as corrupt.
///
/// Used for block hashes where all-zeros indicates data corruption.
pub fn bytes_to_h256_strict(bytes: Vec<u8>, field_name: &str) -> StorageResult<H256> {
    let hash = bytes_to_h256(bytes, field_name)?;
    if hash.is_zero() {
        return Err(StorageError::SerializationError(format!(
            "{} is all zeros, which indicates data corruption",
            field_name
        )));
    }
    Ok(hash)
}

pub fn bytes_to_optional_h256(
    bytes: Option<Vec<u8>>,
    field_name: &str,
) -> StorageResult<Option<H256>> {
    bytes.map(|b| bytes_to_h256(b, field_name)).transpose()
}

/// Convert a `Vec<u8>` to an [`Address`].
pub fn bytes_to_address(bytes: Vec<u8>, field_name: &str) -> StorageResult<Address> {
    Address::from_slice(&bytes).ok_or_else(|| invalid_length(field_name, 20, bytes.len()))
}

pub fn bytes_to_optional_address(
    bytes: Option<Vec<u8>>,
    field_name: &str,
) -> StorageResult<Option<Address>> {
    bytes.map(|b| bytes_to_address(b, field_name)).transpose()
}

/// Parse a `NUMERIC` column selected as `TEXT`.
pub fn numeric_to_u128(value: &str, field_name: &str) -> StorageResult<u128> {
    // NUMERIC(39,0) renders without a fractional part, but be lenient
    let integral = value.split('.').next().unwrap_or(value);
    integral.parse().map_err(|_| {
        StorageError::SerializationError(format!("{} is not a valid u128: {}", field_name, value))
    })
}

pub fn optional_numeric_to_u128(
    value: Option<String>,
    field_name: &str,
) -> StorageResult<Option<u128>> {
    value
        .as_deref()
        .map(|v| numeric_to_u128(v, field_name))
        .transpose()
}

/// Parse a text column through `FromStr`.
pub fn parse_text<T: std::str::FromStr<Err = String>>(
    value: &str,
    field_name: &str,
) -> StorageResult<T> {
    value
        .parse()
        .map_err(|e: String| StorageError::SerializationError(format!("{}: {}", field_name, e)))
}

fn invalid_length(field_name: &str, expected: usize, got: usize) -> StorageError {
    StorageError::SerializationError(format!(
        "{} has invalid length: expected {}, got {}",
        field_name, expected, got
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: détecte les données corrompues (all zeros = hash invalide)
    #[test]
    fn test_strict_rejects_zero_hash() {
        let zeros = vec![0u8; 32];
        let result = bytes_to_h256_strict(zeros, "block.hash");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("corruption"));
    }

    // Test critique: erreurs incluent le nom du champ pour debug
    #[test]
    fn test_error_includes_field_name() {
        let result = bytes_to_address(vec![1u8; 16], "accounts.address");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("accounts.address"));
        assert!(err.contains("expected 20"));
    }

    #[test]
    fn test_numeric_parsing() {
        assert_eq!(numeric_to_u128("1000000000000000000", "v").unwrap(), 10u128.pow(18));
        assert_eq!(numeric_to_u128("42.0", "v").unwrap(), 42);
        assert!(numeric_to_u128("-1", "v").is_err());
        assert_eq!(optional_numeric_to_u128(None, "v").unwrap(), None);
    }
}
