use anyhow::{Context, Result};
use arbor_types::{
    Address, StorageKey, StorageValue, SLOT_KEY_BYTES, SLOT_RECORD_BYTES, SLOT_VALUE_BYTES,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Cold storage for evicted per-account storage caches.
///
/// The blob handed to `persist` is opaque here; only the storage layer
/// reads it back, via [`deserialize_cache_map`].
pub trait StoragePersistence: Send + Sync {
    fn storage_exist(&self, address: &Address) -> bool;
    fn get(&self, address: &Address) -> Result<Option<Vec<u8>>>;
    fn persist(
        &self,
        address: &Address,
        blob: &[u8],
        expiration_time: i64,
        create_time_ms: i64,
    ) -> Result<()>;
}

/// Flatten a slot map into the eviction blob: 64-byte records of
/// key then value, ascending key order, no header. Deleted slots
/// (`None` values) are omitted rather than zero-filled.
pub fn serialize_cache_map(map: &HashMap<StorageKey, Option<StorageValue>>) -> Vec<u8> {
    let mut entries: Vec<(&StorageKey, &StorageValue)> = map
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
        .collect();
    entries.sort_by_key(|(k, _)| **k);

    let mut out = Vec::with_capacity(entries.len() * SLOT_RECORD_BYTES);
    for (key, value) in entries {
        out.extend_from_slice(key);
        out.extend_from_slice(value);
    }
    out
}

/// Inverse of [`serialize_cache_map`]. Record count is implied by the
/// blob length; every round-tripped slot carries a present value.
pub fn deserialize_cache_map(bytes: &[u8]) -> Result<HashMap<StorageKey, Option<StorageValue>>> {
    if bytes.len() % SLOT_RECORD_BYTES != 0 {
        anyhow::bail!(
            "storage blob length {} is not a multiple of {}",
            bytes.len(),
            SLOT_RECORD_BYTES
        );
    }
    let mut map = HashMap::with_capacity(bytes.len() / SLOT_RECORD_BYTES);
    for record in bytes.chunks_exact(SLOT_RECORD_BYTES) {
        let mut key = [0u8; SLOT_KEY_BYTES];
        key.copy_from_slice(&record[..SLOT_KEY_BYTES]);
        let mut value = [0u8; SLOT_VALUE_BYTES];
        value.copy_from_slice(&record[SLOT_KEY_BYTES..]);
        map.insert(key, Some(value));
    }
    Ok(map)
}

#[derive(Serialize, Deserialize)]
struct StorageMeta {
    expiration_time: i64,
    create_time_ms: i64,
}

/// Sled-backed cold storage: blobs in one tree, JSON metadata records
/// in another, both keyed by the raw address bytes.
pub struct SledPersistence {
    blobs: sled::Tree,
    meta: sled::Tree,
    _db: sled::Db,
}

impl SledPersistence {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .with_context(|| format!("opening cold storage at {:?}", path.as_ref()))?;
        let blobs = db.open_tree("storage_blobs")?;
        let meta = db.open_tree("storage_meta")?;
        info!(path = ?path.as_ref(), "cold storage opened");
        Ok(Self {
            blobs,
            meta,
            _db: db,
        })
    }
}

impl StoragePersistence for SledPersistence {
    fn storage_exist(&self, address: &Address) -> bool {
        self.blobs
            .contains_key(address.as_bytes())
            .unwrap_or(false)
    }

    fn get(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .get(address.as_bytes())?
            .map(|ivec| ivec.to_vec()))
    }

    fn persist(
        &self,
        address: &Address,
        blob: &[u8],
        expiration_time: i64,
        create_time_ms: i64,
    ) -> Result<()> {
        let meta = serde_json::to_vec(&StorageMeta {
            expiration_time,
            create_time_ms,
        })?;
        self.blobs.insert(address.as_bytes(), blob)?;
        self.meta.insert(address.as_bytes(), meta)?;
        self.blobs.flush()?;
        Ok(())
    }
}

/// Heap-backed cold storage for tests; counts `persist` calls so the
/// all-or-nothing eviction contract can be asserted.
#[derive(Default)]
pub struct MemoryPersistence {
    entries: RwLock<HashMap<Address, (Vec<u8>, i64, i64)>>,
    persist_calls: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_count(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

impl StoragePersistence for MemoryPersistence {
    fn storage_exist(&self, address: &Address) -> bool {
        self.entries.read().contains_key(address)
    }

    fn get(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(address).map(|(b, _, _)| b.clone()))
    }

    fn persist(
        &self,
        address: &Address,
        blob: &[u8],
        expiration_time: i64,
        create_time_ms: i64,
    ) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.entries.write().insert(
            *address,
            (blob.to_vec(), expiration_time, create_time_ms),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::ADDRESS_BYTES;

    fn slot(b: u8) -> StorageKey {
        [b; SLOT_KEY_BYTES]
    }

    #[test]
    fn cache_map_roundtrip() {
        let mut map = HashMap::new();
        map.insert(slot(3), Some(slot(0x33)));
        map.insert(slot(1), Some(slot(0x11)));

        let blob = serialize_cache_map(&map);
        assert_eq!(blob.len(), 2 * SLOT_RECORD_BYTES);
        // Ascending key order.
        assert_eq!(&blob[..SLOT_KEY_BYTES], &slot(1));

        assert_eq!(deserialize_cache_map(&blob).unwrap(), map);
    }

    #[test]
    fn deleted_slots_are_omitted() {
        let mut map = HashMap::new();
        map.insert(slot(1), Some(slot(0x11)));
        map.insert(slot(2), None);

        let blob = serialize_cache_map(&map);
        assert_eq!(blob.len(), SLOT_RECORD_BYTES);

        let back = deserialize_cache_map(&blob).unwrap();
        assert_eq!(back.len(), 1);
        assert!(!back.contains_key(&slot(2)));
    }

    #[test]
    fn ragged_blob_is_rejected() {
        assert!(deserialize_cache_map(&[0u8; 63]).is_err());
        assert!(deserialize_cache_map(&[]).unwrap().is_empty());
    }

    #[test]
    fn sled_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cold = SledPersistence::open(dir.path()).unwrap();
        let addr = Address([9u8; ADDRESS_BYTES]);

        assert!(!cold.storage_exist(&addr));
        assert_eq!(cold.get(&addr).unwrap(), None);

        cold.persist(&addr, &[1, 2, 3], 100, 200).unwrap();
        assert!(cold.storage_exist(&addr));
        assert_eq!(cold.get(&addr).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn memory_persistence_counts_calls() {
        let cold = MemoryPersistence::new();
        let addr = Address([1u8; ADDRESS_BYTES]);
        assert_eq!(cold.persist_count(), 0);
        cold.persist(&addr, &[0u8; 64], 0, 0).unwrap();
        assert_eq!(cold.persist_count(), 1);
        assert!(cold.storage_exist(&addr));
    }
}
