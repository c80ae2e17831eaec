use crate::Result;
use arbor_types::{Hash, HASH_BYTES};
use arbor_vmap::{VirtualDataSource, VmapError, INVALID_PATH};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Content-addressed storage for encoded trie nodes.
///
/// Nodes are immutable once written: `put` under an existing hash is a
/// no-op, and nothing is ever deleted, so old root hashes stay live.
pub trait NodeSource: Send + Sync {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>>;
    fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<()>;
}

/// Heap-backed node source.
#[derive(Default)]
pub struct MemNodeSource {
    nodes: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemNodeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeSource for MemNodeSource {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.read().get(hash).cloned())
    }

    fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<()> {
        self.nodes.write().entry(*hash).or_insert(bytes);
        Ok(())
    }
}

/// Copy-on-write overlay of dirty nodes over a shared base source.
///
/// Tries write into the overlay as they restructure; `flush` pushes the
/// accumulated nodes down into the base and clears the overlay. A
/// `NodeCache` is itself a [`NodeSource`], so caches stack.
pub struct NodeCache {
    dirty: RwLock<HashMap<Hash, Vec<u8>>>,
    base: Arc<dyn NodeSource>,
}

impl NodeCache {
    pub fn new(base: Arc<dyn NodeSource>) -> Self {
        Self {
            dirty: RwLock::new(HashMap::new()),
            base,
        }
    }

    pub fn is_modified(&self) -> bool {
        !self.dirty.read().is_empty()
    }

    /// Push every dirty node into the base and clear the overlay.
    pub fn flush(&self) -> Result<()> {
        let drained: Vec<(Hash, Vec<u8>)> = self.dirty.write().drain().collect();
        for (hash, bytes) in drained {
            self.base.put(&hash, bytes)?;
        }
        Ok(())
    }

    /// Drop buffered nodes without applying them.
    pub fn clear(&self) {
        self.dirty.write().clear();
    }
}

impl NodeSource for NodeCache {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.dirty.read().get(hash) {
            return Ok(Some(bytes.clone()));
        }
        self.base.get(hash)
    }

    fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<()> {
        self.dirty.write().entry(*hash).or_insert(bytes);
        Ok(())
    }
}

/// Node source persisting through a [`VirtualDataSource`].
///
/// Each node becomes one leaf in the virtual map: the leaf key is the
/// node's content hash (found again through the long index) and the
/// leaf value is the node encoding, length-prefixed and padded to the
/// source's fixed value width. Leaf paths are allocated sequentially
/// and recorded as the source's last leaf path, so a reopened store
/// resumes where it left off.
pub struct VirtualNodeSource {
    ds: Mutex<VirtualDataSource>,
    value_size: usize,
}

impl VirtualNodeSource {
    /// Wrap a data source whose key width is the hash width and whose
    /// value width leaves room for a length prefix plus the node.
    pub fn new(ds: VirtualDataSource) -> Result<Self> {
        if ds.key_size() != HASH_BYTES {
            return Err(VmapError::InvalidArgument(format!(
                "node source needs {}-byte keys, data source has {}",
                HASH_BYTES,
                ds.key_size()
            ))
            .into());
        }
        if ds.value_size() < 4 + 64 {
            return Err(VmapError::InvalidArgument(
                "data source value width too small for trie nodes".into(),
            )
            .into());
        }
        let value_size = ds.value_size();
        Ok(Self {
            ds: Mutex::new(ds),
            value_size,
        })
    }

    /// Comfortable fixed value width for branch nodes plus payload.
    pub const RECOMMENDED_VALUE_SIZE: usize = 1024;

    pub fn close(&self) -> Result<()> {
        self.ds.lock().close()?;
        Ok(())
    }

    fn pad(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() + 4 > self.value_size {
            return Err(VmapError::InvalidArgument(format!(
                "trie node of {} bytes exceeds value width {}",
                bytes.len(),
                self.value_size
            ))
            .into());
        }
        let mut out = vec![0u8; self.value_size];
        out[..4].copy_from_slice(&(bytes.len() as u32).to_be_bytes());
        out[4..4 + bytes.len()].copy_from_slice(bytes);
        Ok(out)
    }

    fn unpad(padded: Vec<u8>) -> Result<Vec<u8>> {
        if padded.len() < 4 {
            return Err(VmapError::InvalidArgument("short node record".into()).into());
        }
        let len = u32::from_be_bytes(padded[..4].try_into().unwrap()) as usize;
        if 4 + len > padded.len() {
            return Err(VmapError::InvalidArgument("bad node record length".into()).into());
        }
        Ok(padded[4..4 + len].to_vec())
    }
}

impl NodeSource for VirtualNodeSource {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let ds = self.ds.lock();
        match ds.load_leaf_value_by_key(hash.as_bytes())? {
            Some(padded) => Ok(Some(Self::unpad(padded)?)),
            None => Ok(None),
        }
    }

    fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<()> {
        let mut ds = self.ds.lock();
        // Content addressed: an existing record is already this node.
        if ds.load_leaf_path(hash.as_bytes())? != INVALID_PATH {
            return Ok(());
        }
        let path = ds.last_leaf_path() + 1;
        let padded = self.pad(&bytes)?;
        ds.add_leaf(path, hash.as_bytes(), &padded, hash)?;
        if ds.first_leaf_path() == INVALID_PATH {
            ds.write_first_leaf_path(path)?;
        }
        ds.write_last_leaf_path(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_overlays_base() {
        let base = Arc::new(MemNodeSource::new());
        let cache = NodeCache::new(base.clone());

        let h = Hash::of(b"node");
        cache.put(&h, vec![1, 2, 3]).unwrap();
        assert!(cache.is_modified());
        assert_eq!(cache.get(&h).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(base.get(&h).unwrap(), None);

        cache.flush().unwrap();
        assert!(!cache.is_modified());
        assert_eq!(base.get(&h).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn cache_clear_discards() {
        let base = Arc::new(MemNodeSource::new());
        let cache = NodeCache::new(base.clone());
        let h = Hash::of(b"gone");
        cache.put(&h, vec![7]).unwrap();
        cache.clear();
        cache.flush().unwrap();
        assert_eq!(base.get(&h).unwrap(), None);
    }

    #[test]
    fn virtual_source_roundtrip() {
        let ds = VirtualDataSource::in_memory(HASH_BYTES, VirtualNodeSource::RECOMMENDED_VALUE_SIZE);
        let source = VirtualNodeSource::new(ds).unwrap();

        let bytes = vec![5u8; 100];
        let h = Hash::of(&bytes);
        source.put(&h, bytes.clone()).unwrap();
        assert_eq!(source.get(&h).unwrap(), Some(bytes.clone()));

        // Re-putting the same node is a no-op, not an error.
        source.put(&h, bytes.clone()).unwrap();
        assert_eq!(source.get(&h).unwrap(), Some(bytes));
        assert_eq!(source.get(&Hash::of(b"other")).unwrap(), None);
    }

    #[test]
    fn virtual_source_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = vec![9u8; 50];
        let h = Hash::of(&bytes);
        {
            let ds = VirtualDataSource::on_disk(dir.path(), 256, HASH_BYTES, 256).unwrap();
            let source = VirtualNodeSource::new(ds).unwrap();
            source.put(&h, bytes.clone()).unwrap();
            source.close().unwrap();
        }
        let ds = VirtualDataSource::on_disk(dir.path(), 256, HASH_BYTES, 256).unwrap();
        let source = VirtualNodeSource::new(ds).unwrap();
        assert_eq!(source.get(&h).unwrap(), Some(bytes));
        source.close().unwrap();
    }

    #[test]
    fn virtual_source_rejects_narrow_values() {
        let ds = VirtualDataSource::in_memory(HASH_BYTES, 16);
        assert!(VirtualNodeSource::new(ds).is_err());
    }
}
