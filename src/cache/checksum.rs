//! Content checksums for cache integrity.
//!
//! A 32-bit XXH32 hash over the serialized value. Good enough to catch
//! accidental corruption (truncated writes, bit rot in the local store),
//! not a cryptographic guarantee and not meant to be one.

use serde::Serialize;
use xxhash_rust::xxh32::xxh32;

/// Seed folded into every checksum so a plain XXH32 of the payload computed
/// elsewhere never accidentally matches.
const CHECKSUM_SEED: u32 = 0x4841_4249; // "HABI"

/// Checksum over raw serialized bytes.
#[must_use]
pub fn checksum_bytes(bytes: &[u8]) -> u32 {
    xxh32(bytes, CHECKSUM_SEED)
}

/// Checksum over the canonical (serde_json) serialization of a value.
///
/// Struct fields serialize in declaration order, so the same value always
/// produces the same bytes and the same checksum.
pub fn checksum_value<T: Serialize>(value: &T) -> Result<u32, serde_json::Error> {
    Ok(checksum_bytes(&serde_json::to_vec(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let a = checksum_bytes(b"hello");
        let b = checksum_bytes(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn test_checksum_differs_on_content_change() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"hellp"));
        assert_ne!(checksum_bytes(b""), checksum_bytes(b" "));
    }

    #[test]
    fn test_checksum_value_matches_bytes_of_serialization() {
        #[derive(serde::Serialize)]
        struct S {
            a: u32,
            b: String,
        }
        let s = S { a: 7, b: "x".into() };
        let direct = checksum_bytes(&serde_json::to_vec(&s).unwrap());
        assert_eq!(checksum_value(&s).unwrap(), direct);
    }
}
