use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of raw bytes in a state hash.
pub const HASH_BYTES: usize = 32;

/// All-zero hash, used where a commitment is absent.
pub const NULL_HASH: Hash = Hash([0u8; HASH_BYTES]);

/// A 32-byte blake3 digest. Serialised as a hex string in JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash(pub [u8; HASH_BYTES]);

impl Hash {
    /// Hash arbitrary bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Hash(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_HASH
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

impl From<[u8; HASH_BYTES]> for Hash {
    fn from(value: [u8; HASH_BYTES]) -> Self {
        Hash(value)
    }
}

impl From<Hash> for String {
    fn from(value: Hash) -> Self {
        hex::encode(value.0)
    }
}

impl TryFrom<String> for Hash {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let decoded = hex::decode(&value)?;
        let bytes: [u8; HASH_BYTES] = decoded
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        let a = Hash::of(b"arbor");
        let b = Hash::of(b"arbor");
        assert_eq!(a, b);
        assert_ne!(a, Hash::of(b"arbour"));
    }

    #[test]
    fn hex_roundtrip() {
        let h = Hash::of(b"state root");
        let s: String = h.into();
        let back = Hash::try_from(s).expect("hex should decode");
        assert_eq!(h, back);
    }
}
