use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Errors that can occur when parsing an account address string.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("address must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("address payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Number of raw bytes contained in an address.
pub const ADDRESS_BYTES: usize = 20;
/// Expected string length of a hex-encoded address.
pub const ADDRESS_STRING_LENGTH: usize = ADDRESS_BYTES * 2;

/// Encode a 20-byte account identifier as lowercase hex.
pub fn encode_address(bytes: &[u8; ADDRESS_BYTES]) -> String {
    hex::encode(bytes)
}

/// Attempt to decode a hex address string into the raw bytes.
pub fn decode_address(address: &str) -> Result<[u8; ADDRESS_BYTES], AddressError> {
    if address.len() != ADDRESS_STRING_LENGTH {
        return Err(AddressError::InvalidLength {
            expected: ADDRESS_STRING_LENGTH,
            actual: address.len(),
        });
    }
    let decoded = hex::decode(address)?;
    let mut bytes = [0u8; ADDRESS_BYTES];
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

/// Fixed-length account address, ordered by unsigned byte-wise
/// lexicographic comparison. Serialised as a hex string in JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encode_address(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", encode_address(&self.0))
    }
}

impl From<[u8; ADDRESS_BYTES]> for Address {
    fn from(value: [u8; ADDRESS_BYTES]) -> Self {
        Address(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        encode_address(&value.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_address(&value).map(Address)
    }
}

/// Unsigned byte-wise lexicographic comparison of raw keys; on a shared
/// prefix the shorter slice sorts first. This is the order bulk storage
/// eviction walks addresses in.
pub fn compare_unsigned(a: &[u8], b: &[u8]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let bytes = [0xABu8; ADDRESS_BYTES];
        let encoded = encode_address(&bytes);
        assert_eq!(encoded.len(), ADDRESS_STRING_LENGTH);
        let decoded = decode_address(&encoded).expect("address should decode");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(matches!(
            decode_address("abcd"),
            Err(AddressError::InvalidLength { .. })
        ));
    }

    #[test]
    fn unsigned_order_shorter_first() {
        assert_eq!(compare_unsigned(&[1, 2], &[1, 2, 0]), Ordering::Less);
        assert_eq!(compare_unsigned(&[0xff], &[0x01, 0x00]), Ordering::Greater);
        assert_eq!(compare_unsigned(&[7, 7], &[7, 7]), Ordering::Equal);
    }

    #[test]
    fn address_ord_matches_unsigned_compare() {
        let a = Address([0x01; ADDRESS_BYTES]);
        let b = Address([0xfe; ADDRESS_BYTES]);
        assert!(a < b);
        assert_eq!(compare_unsigned(a.as_bytes(), b.as_bytes()), Ordering::Less);
    }
}
