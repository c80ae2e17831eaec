//! Secure keyed-hash trie over pluggable node storage.
//!
//! Keys are pre-hashed before traversal, so the root hash commits
//! cryptographically to every key/value pair. Nodes are content
//! addressed: each is stored under the hash of its encoding and never
//! overwritten, which makes any previously flushed root hash a valid
//! entry point into an older version of the tree.

pub mod nibbles;
pub mod node;
pub mod store;
pub mod trie;

pub use nibbles::Nibbles;
pub use node::TrieNode;
pub use store::{MemNodeSource, NodeCache, NodeSource, VirtualNodeSource};
pub use trie::SecureTrie;

use arbor_types::Hash;

/// Errors raised by the trie layer.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// A node referenced from the tree is missing from storage.
    #[error("missing trie node {0}")]
    MissingNode(Hash),
    /// A stored node failed to decode.
    #[error("corrupt trie node: {0}")]
    Corrupt(String),
    /// Failure in a virtual-map-backed node source.
    #[error(transparent)]
    Store(#[from] arbor_vmap::VmapError),
}

pub type Result<T> = std::result::Result<T, TrieError>;
