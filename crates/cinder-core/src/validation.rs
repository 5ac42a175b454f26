//! Identifier validation.
//!
//! Txids and content hashes are exactly 64 hex characters. Vout indices are
//! non-negative and fit in 32 bits. Nothing here infers a missing value.

use crate::error::ValidationError;

/// Parse a 64-character hex string into 32 bytes.
///
/// Upper- and lower-case digits are accepted. Any other length or any
/// non-hex character is rejected.
pub fn parse_hex32(field: &'static str, s: &str) -> Result<[u8; 32], ValidationError> {
    if s.len() != 64 {
        return Err(ValidationError::HexLength {
            field,
            len: s.chars().count(),
        });
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::NonHex { field });
    }

    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out).map_err(|_| ValidationError::NonHex { field })?;
    Ok(out)
}

/// Validate a transaction id.
pub fn validate_txid_hex(s: &str) -> Result<[u8; 32], ValidationError> {
    parse_hex32("txid", s)
}

/// Validate a content hash digest.
pub fn validate_hash_hex(s: &str) -> Result<[u8; 32], ValidationError> {
    parse_hex32("hash", s)
}

/// Validate an output index coming from an untyped source (JSON, SQL).
pub fn validate_vout(vout: i64) -> Result<u32, ValidationError> {
    u32::try_from(vout).map_err(|_| ValidationError::InvalidVout(vout))
}

/// Reject empty byte fields such as wrapped keys.
pub fn require_non_empty(field: &'static str, bytes: &[u8]) -> Result<(), ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_lower_and_upper_hex() {
        let lower = "ab".repeat(32);
        let upper = "AB".repeat(32);
        assert_eq!(validate_txid_hex(&lower).unwrap(), [0xab; 32]);
        assert_eq!(validate_txid_hex(&upper).unwrap(), [0xab; 32]);
    }

    #[test]
    fn test_rejects_short_and_long() {
        assert!(matches!(
            validate_txid_hex(&"a".repeat(63)),
            Err(ValidationError::HexLength { len: 63, .. })
        ));
        assert!(matches!(
            validate_hash_hex(&"a".repeat(65)),
            Err(ValidationError::HexLength { len: 65, .. })
        ));
        assert!(validate_txid_hex("").is_err());
    }

    #[test]
    fn test_rejects_non_hex() {
        let mut s = "0".repeat(63);
        s.push('g');
        assert!(matches!(
            validate_txid_hex(&s),
            Err(ValidationError::NonHex { field: "txid" })
        ));
    }

    #[test]
    fn test_multibyte_input_rejected() {
        // 64 bytes but only 32 chars
        let s = "é".repeat(32);
        assert!(validate_txid_hex(&s).is_err());
    }

    #[test]
    fn test_vout_bounds() {
        assert_eq!(validate_vout(0).unwrap(), 0);
        assert_eq!(validate_vout(u32::MAX as i64).unwrap(), u32::MAX);
        assert!(validate_vout(-1).is_err());
        assert!(validate_vout(u32::MAX as i64 + 1).is_err());
    }

    proptest! {
        #[test]
        fn valid_hex_always_accepted(bytes in any::<[u8; 32]>(), upper in any::<bool>()) {
            let mut s = hex::encode(bytes);
            if upper {
                s = s.to_uppercase();
            }
            prop_assert_eq!(validate_txid_hex(&s).unwrap(), bytes);
        }

        #[test]
        fn wrong_length_always_rejected(s in "[0-9a-f]{0,128}") {
            prop_assume!(s.len() != 64);
            prop_assert!(validate_hash_hex(&s).is_err());
        }

        #[test]
        fn non_hex_always_rejected(prefix in "[0-9a-f]{0,63}", bad in "[g-zG-Z_ :-]") {
            let mut s = prefix.clone();
            s.push_str(&bad);
            while s.len() < 64 {
                s.push('0');
            }
            prop_assert!(validate_txid_hex(&s).is_err());
        }
    }
}
