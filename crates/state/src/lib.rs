//! World-state layer: copy-on-write caches, per-account storage tries
//! with cold-storage eviction, and the transactional repository that
//! exposes a single state-root hash.

pub mod cache;
pub mod persistence;
pub mod repository;
pub mod storage_cache;

pub use cache::{EmptySource, Source, WriteCache};
pub use persistence::{
    deserialize_cache_map, serialize_cache_map, MemoryPersistence, SledPersistence,
    StoragePersistence,
};
pub use repository::{CodeSource, NullCodeSource, Repository};
pub use storage_cache::{StorageCache, StorageCacheLayer};
