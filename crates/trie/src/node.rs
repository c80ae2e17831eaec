use crate::nibbles::Nibbles;
use crate::TrieError;
use arbor_types::{Hash, HASH_BYTES};

const TAG_LEAF: u8 = 1;
const TAG_EXTENSION: u8 = 2;
const TAG_BRANCH: u8 = 3;

/// Node types of the secure trie.
///
/// Keys are hashed to a fixed length before traversal, so values only
/// ever live in leaves; branches carry children alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    /// Remaining key path plus the stored value.
    Leaf { path: Nibbles, value: Vec<u8> },
    /// Shared prefix pointing at a single child.
    Extension { path: Nibbles, child: Hash },
    /// Sixteen-way fan-out, one slot per nibble.
    Branch { children: Box<[Option<Hash>; 16]> },
}

impl TrieNode {
    pub fn branch() -> Self {
        TrieNode::Branch {
            children: Box::new([None; 16]),
        }
    }

    /// Binary encoding used for hashing and storage.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TrieNode::Leaf { path, value } => {
                let packed = path.pack();
                let mut out = Vec::with_capacity(2 + packed.len() + 2 + value.len());
                out.push(TAG_LEAF);
                out.push(packed.len() as u8);
                out.extend_from_slice(&packed);
                out.extend_from_slice(&(value.len() as u16).to_be_bytes());
                out.extend_from_slice(value);
                out
            }
            TrieNode::Extension { path, child } => {
                let packed = path.pack();
                let mut out = Vec::with_capacity(2 + packed.len() + HASH_BYTES);
                out.push(TAG_EXTENSION);
                out.push(packed.len() as u8);
                out.extend_from_slice(&packed);
                out.extend_from_slice(child.as_bytes());
                out
            }
            TrieNode::Branch { children } => {
                let mut bitmap = 0u16;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                let mut out = Vec::with_capacity(3 + HASH_BYTES * 16);
                out.push(TAG_BRANCH);
                out.extend_from_slice(&bitmap.to_be_bytes());
                for child in children.iter().flatten() {
                    out.extend_from_slice(child.as_bytes());
                }
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TrieError> {
        let corrupt = |what: &str| TrieError::Corrupt(what.to_string());
        let (&tag, rest) = bytes.split_first().ok_or_else(|| corrupt("empty node"))?;
        match tag {
            TAG_LEAF => {
                let (&plen, rest) = rest.split_first().ok_or_else(|| corrupt("leaf header"))?;
                let plen = plen as usize;
                if rest.len() < plen + 2 {
                    return Err(corrupt("leaf path"));
                }
                let path =
                    Nibbles::unpack(&rest[..plen]).ok_or_else(|| corrupt("leaf path parity"))?;
                let vlen = u16::from_be_bytes(rest[plen..plen + 2].try_into().unwrap()) as usize;
                let value = rest[plen + 2..].to_vec();
                if value.len() != vlen {
                    return Err(corrupt("leaf value length"));
                }
                Ok(TrieNode::Leaf { path, value })
            }
            TAG_EXTENSION => {
                let (&plen, rest) = rest
                    .split_first()
                    .ok_or_else(|| corrupt("extension header"))?;
                let plen = plen as usize;
                if rest.len() != plen + HASH_BYTES {
                    return Err(corrupt("extension length"));
                }
                let path = Nibbles::unpack(&rest[..plen])
                    .ok_or_else(|| corrupt("extension path parity"))?;
                let mut child = [0u8; HASH_BYTES];
                child.copy_from_slice(&rest[plen..]);
                Ok(TrieNode::Extension {
                    path,
                    child: Hash(child),
                })
            }
            TAG_BRANCH => {
                if rest.len() < 2 {
                    return Err(corrupt("branch header"));
                }
                let bitmap = u16::from_be_bytes(rest[..2].try_into().unwrap());
                let hashes = &rest[2..];
                if hashes.len() != bitmap.count_ones() as usize * HASH_BYTES {
                    return Err(corrupt("branch length"));
                }
                let mut children = Box::new([None; 16]);
                let mut offset = 0;
                for (i, slot) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        let mut h = [0u8; HASH_BYTES];
                        h.copy_from_slice(&hashes[offset..offset + HASH_BYTES]);
                        *slot = Some(Hash(h));
                        offset += HASH_BYTES;
                    }
                }
                Ok(TrieNode::Branch { children })
            }
            _ => Err(corrupt("unknown node tag")),
        }
    }

    /// Content address of this node.
    pub fn hash(&self) -> Hash {
        Hash::of(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let node = TrieNode::Leaf {
            path: Nibbles::from_raw(vec![1, 2, 3]),
            value: vec![9u8; 32],
        };
        assert_eq!(TrieNode::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn extension_roundtrip() {
        let node = TrieNode::Extension {
            path: Nibbles::from_raw(vec![0xA, 0xB]),
            child: Hash::of(b"child"),
        };
        assert_eq!(TrieNode::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn branch_roundtrip() {
        let mut children = Box::new([None; 16]);
        children[0] = Some(Hash::of(b"left"));
        children[15] = Some(Hash::of(b"right"));
        let node = TrieNode::Branch { children };
        assert_eq!(TrieNode::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn distinct_nodes_hash_differently() {
        let a = TrieNode::Leaf {
            path: Nibbles::from_raw(vec![1]),
            value: vec![1],
        };
        let b = TrieNode::Leaf {
            path: Nibbles::from_raw(vec![1]),
            value: vec![2],
        };
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(TrieNode::decode(&[]).is_err());
        assert!(TrieNode::decode(&[9, 9, 9]).is_err());
    }
}
