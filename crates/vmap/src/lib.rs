//! Path-addressed backing store for virtual Merkle trees.
//!
//! A virtual tree keeps billions of nodes addressable in O(1) by storing
//! them in fixed-record-size slot stores: one for node records (hash +
//! pointer to leaf payload) and one for leaf payloads (key + value),
//! plus a key-to-path index for point lookups. Everything is available
//! in-memory or as segmented memory-mapped files.

pub mod data_source;
pub mod long_index;
pub mod slot_store;

pub use data_source::{VirtualDataSource, INVALID_PATH, NULL_DATA_INDEX};
pub use long_index::{FileLongIndex, LongIndex, MemLongIndex};
pub use slot_store::{FileSlotStore, MemSlotStore, SlotStore};

/// Errors raised by the virtual map storage layer.
#[derive(Debug, thiserror::Error)]
pub enum VmapError {
    /// Caller misuse: negative paths, wrong key/value widths, moving a
    /// leaf that does not exist. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The long index ran out of bucket space for its capacity estimate.
    #[error("index capacity exceeded")]
    CapacityExceeded,
    /// Underlying store read/write failure. Fatal to the operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VmapError>;
