use crate::long_index::{FileLongIndex, LongIndex, MemLongIndex};
use crate::slot_store::{FileSlotStore, MemSlotStore, SlotStore};
use crate::{Result, VmapError};
use arbor_types::{Hash, HASH_BYTES};
use std::path::{Path, PathBuf};

/// Sentinel data index meaning "internal node, no leaf payload".
pub const NULL_DATA_INDEX: i64 = -1;
/// Sentinel path meaning "no such leaf".
pub const INVALID_PATH: i64 = -1;

/// Serialization version tag written ahead of leaf keys and values.
const LEAF_SERIALIZATION_VERSION: u16 = 1;

/// Node record: presence flag, hash, pointer into the leaf-data store.
const NODE_FLAG_HAS_HASH: u8 = 1;
const NODE_RECORD_BYTES: usize = 1 + HASH_BYTES + 8;

/// Virtual Merkle tree backing store.
///
/// Combines a node slot store (per-path hash plus pointer to an optional
/// leaf payload), a leaf-data slot store (version-tagged key and value)
/// and a key-to-path index. Every operation is O(1) random access by
/// path or index lookup, independent of the logical tree's shape, which
/// is what lets the full state tree exceed memory.
///
/// Performs no locking of its own: all tries opened against one data
/// source must be serialized externally.
pub struct VirtualDataSource {
    node_store: Box<dyn SlotStore>,
    leaf_store: Box<dyn SlotStore>,
    index: Box<dyn LongIndex>,
    key_size: usize,
    value_size: usize,
    first_leaf_path: i64,
    last_leaf_path: i64,
    meta_path: Option<PathBuf>,
}

impl VirtualDataSource {
    /// In-memory preset for small or ephemeral trees.
    pub fn in_memory(key_size: usize, value_size: usize) -> Self {
        Self {
            node_store: Box::new(MemSlotStore::new(NODE_RECORD_BYTES)),
            leaf_store: Box::new(MemSlotStore::new(Self::leaf_record_bytes(
                key_size, value_size,
            ))),
            index: Box::new(MemLongIndex::new(key_size)),
            key_size,
            value_size,
            first_leaf_path: INVALID_PATH,
            last_leaf_path: INVALID_PATH,
            meta_path: None,
        }
    }

    /// Disk-backed preset: segmented memory-mapped stores plus a
    /// capacity-estimated bucketed index, all under `dir`.
    pub fn on_disk(
        dir: impl AsRef<Path>,
        capacity: u64,
        key_size: usize,
        value_size: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let node_store = FileSlotStore::open(dir.join("nodes"), NODE_RECORD_BYTES)?;
        let leaf_store =
            FileSlotStore::open(dir.join("leaves"), Self::leaf_record_bytes(key_size, value_size))?;
        let index = FileLongIndex::open(dir.join("index"), key_size, capacity)?;

        let meta_path = dir.join("paths.meta");
        let (first_leaf_path, last_leaf_path) = match std::fs::read(&meta_path) {
            Ok(bytes) if bytes.len() == 16 => (
                i64::from_be_bytes(bytes[..8].try_into().unwrap()),
                i64::from_be_bytes(bytes[8..].try_into().unwrap()),
            ),
            _ => (INVALID_PATH, INVALID_PATH),
        };

        tracing::info!(dir = %dir.display(), capacity, "opened on-disk virtual data source");
        Ok(Self {
            node_store: Box::new(node_store),
            leaf_store: Box::new(leaf_store),
            index: Box::new(index),
            key_size,
            value_size,
            first_leaf_path,
            last_leaf_path,
            meta_path: Some(meta_path),
        })
    }

    fn leaf_record_bytes(key_size: usize, value_size: usize) -> usize {
        2 + key_size + 2 + value_size
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    fn check_path(path: i64) -> Result<()> {
        if path < 0 {
            return Err(VmapError::InvalidArgument(format!(
                "path must be non-negative, got {path}"
            )));
        }
        Ok(())
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(VmapError::InvalidArgument(format!(
                "key must be {} bytes, got {}",
                self.key_size,
                key.len()
            )));
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.value_size {
            return Err(VmapError::InvalidArgument(format!(
                "value must be {} bytes, got {}",
                self.value_size,
                value.len()
            )));
        }
        Ok(())
    }

    fn read_node(&self, path: i64) -> Result<Option<(Option<Hash>, i64)>> {
        Self::check_path(path)?;
        let mut buf = vec![0u8; NODE_RECORD_BYTES];
        if !self.node_store.read_record(path as u64, &mut buf)? {
            return Ok(None);
        }
        let hash = if buf[0] & NODE_FLAG_HAS_HASH != 0 {
            let mut h = [0u8; HASH_BYTES];
            h.copy_from_slice(&buf[1..1 + HASH_BYTES]);
            Some(Hash(h))
        } else {
            None
        };
        let data_index = i64::from_be_bytes(buf[1 + HASH_BYTES..].try_into().unwrap());
        Ok(Some((hash, data_index)))
    }

    fn write_node(&mut self, path: i64, hash: Option<&Hash>, data_index: i64) -> Result<()> {
        let mut buf = vec![0u8; NODE_RECORD_BYTES];
        if let Some(hash) = hash {
            buf[0] = NODE_FLAG_HAS_HASH;
            buf[1..1 + HASH_BYTES].copy_from_slice(hash.as_bytes());
        }
        buf[1 + HASH_BYTES..].copy_from_slice(&data_index.to_be_bytes());
        self.node_store.write_record(path as u64, &buf)
    }

    fn read_leaf_data(&self, data_index: i64) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut buf = vec![0u8; Self::leaf_record_bytes(self.key_size, self.value_size)];
        if !self.leaf_store.read_record(data_index as u64, &mut buf)? {
            return Err(VmapError::InvalidArgument(format!(
                "no leaf data record at index {data_index}"
            )));
        }
        let key = buf[2..2 + self.key_size].to_vec();
        let value_off = 2 + self.key_size + 2;
        let value = buf[value_off..value_off + self.value_size].to_vec();
        Ok((key, value))
    }

    fn write_leaf_data(&mut self, data_index: i64, key: &[u8], value: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(Self::leaf_record_bytes(self.key_size, self.value_size));
        buf.extend_from_slice(&LEAF_SERIALIZATION_VERSION.to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&LEAF_SERIALIZATION_VERSION.to_be_bytes());
        buf.extend_from_slice(value);
        self.leaf_store.write_record(data_index as u64, &buf)
    }

    /// Hash of the leaf node at `path`, if present and hashed.
    pub fn load_leaf_hash(&self, path: i64) -> Result<Option<Hash>> {
        Ok(match self.read_node(path)? {
            Some((hash, data_index)) if data_index != NULL_DATA_INDEX => hash,
            _ => None,
        })
    }

    /// Hash of the internal node at `path`, if present and hashed.
    pub fn load_internal_hash(&self, path: i64) -> Result<Option<Hash>> {
        Ok(match self.read_node(path)? {
            Some((hash, data_index)) if data_index == NULL_DATA_INDEX => hash,
            _ => None,
        })
    }

    /// Value of the leaf at `path`, or `None` if no leaf lives there.
    pub fn load_leaf_value(&self, path: i64) -> Result<Option<Vec<u8>>> {
        match self.read_node(path)? {
            Some((_, data_index)) if data_index != NULL_DATA_INDEX => {
                let (_, value) = self.read_leaf_data(data_index)?;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    /// Value of the leaf with `key`, located through the index.
    pub fn load_leaf_value_by_key(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = self.load_leaf_path(key)?;
        if path == INVALID_PATH {
            return Ok(None);
        }
        self.load_leaf_value(path)
    }

    /// Key of the leaf at `path`, or `None` if no leaf lives there.
    pub fn load_leaf_key(&self, path: i64) -> Result<Option<Vec<u8>>> {
        match self.read_node(path)? {
            Some((_, data_index)) if data_index != NULL_DATA_INDEX => {
                let (key, _) = self.read_leaf_data(data_index)?;
                Ok(Some(key))
            }
            _ => Ok(None),
        }
    }

    /// Path of the leaf with `key`, or [`INVALID_PATH`] when absent.
    pub fn load_leaf_path(&self, key: &[u8]) -> Result<i64> {
        self.check_key(key)?;
        Ok(self
            .index
            .get(key)?
            .map(|p| p as i64)
            .unwrap_or(INVALID_PATH))
    }

    /// Write or create an internal node's hash. Any existing leaf-data
    /// pointer at that path is preserved.
    pub fn save_internal(&mut self, path: i64, hash: &Hash) -> Result<()> {
        Self::check_path(path)?;
        let data_index = match self.read_node(path)? {
            Some((_, idx)) => idx,
            None => NULL_DATA_INDEX,
        };
        self.write_node(path, Some(hash), data_index)
    }

    /// Relocate an existing leaf from `old_path` to `new_path`.
    ///
    /// Any leaf-data record already pointed to from `new_path` is
    /// displaced and released; the key-to-path index follows the move.
    /// The node record at `old_path` is cleared.
    pub fn update_leaf_path(
        &mut self,
        old_path: i64,
        new_path: i64,
        key: &[u8],
        hash: &Hash,
    ) -> Result<()> {
        Self::check_path(old_path)?;
        Self::check_path(new_path)?;
        self.check_key(key)?;
        let (_, data_index) = self
            .read_node(old_path)?
            .filter(|(_, idx)| *idx != NULL_DATA_INDEX)
            .ok_or_else(|| {
                VmapError::InvalidArgument(format!("no leaf to move at path {old_path}"))
            })?;

        if let Some((_, displaced)) = self.read_node(new_path)? {
            if displaced != NULL_DATA_INDEX && displaced != data_index {
                self.leaf_store.release(displaced as u64)?;
            }
        }

        self.write_node(new_path, Some(hash), data_index)?;
        self.write_node(old_path, None, NULL_DATA_INDEX)?;
        self.index.put(key, new_path as u64)
    }

    /// Rewrite the value and hash of the existing leaf at `path`.
    pub fn update_leaf(&mut self, path: i64, key: &[u8], value: &[u8], hash: &Hash) -> Result<()> {
        Self::check_path(path)?;
        self.check_key(key)?;
        self.check_value(value)?;
        let (_, data_index) = self
            .read_node(path)?
            .filter(|(_, idx)| *idx != NULL_DATA_INDEX)
            .ok_or_else(|| {
                VmapError::InvalidArgument(format!("no leaf data record at path {path}"))
            })?;
        self.write_leaf_data(data_index, key, value)?;
        self.write_node(path, Some(hash), data_index)
    }

    /// Insert a new leaf: allocate a leaf-data slot, write the node
    /// record pointing at it, register the key in the index.
    ///
    /// The index is mutated last, so a failed insert leaves it clean.
    pub fn add_leaf(&mut self, path: i64, key: &[u8], value: &[u8], hash: &Hash) -> Result<()> {
        Self::check_path(path)?;
        self.check_key(key)?;
        self.check_value(value)?;
        if self.index.get(key)?.is_some() {
            return Err(VmapError::InvalidArgument(
                "a leaf already exists for this key".into(),
            ));
        }

        let data_index = self.leaf_store.allocate()? as i64;
        if let Err(e) = self
            .write_leaf_data(data_index, key, value)
            .and_then(|_| self.write_node(path, Some(hash), data_index))
        {
            self.leaf_store.release(data_index as u64)?;
            return Err(e);
        }
        self.index.put(key, path as u64)
    }

    /// Path of the first (left-most) leaf, [`INVALID_PATH`] when empty.
    pub fn first_leaf_path(&self) -> i64 {
        self.first_leaf_path
    }

    /// Path of the last (right-most) leaf, [`INVALID_PATH`] when empty.
    pub fn last_leaf_path(&self) -> i64 {
        self.last_leaf_path
    }

    pub fn write_first_leaf_path(&mut self, path: i64) -> Result<()> {
        self.first_leaf_path = path;
        self.write_paths_meta()
    }

    pub fn write_last_leaf_path(&mut self, path: i64) -> Result<()> {
        self.last_leaf_path = path;
        self.write_paths_meta()
    }

    fn write_paths_meta(&self) -> Result<()> {
        if let Some(meta_path) = &self.meta_path {
            let mut bytes = Vec::with_capacity(16);
            bytes.extend_from_slice(&self.first_leaf_path.to_be_bytes());
            bytes.extend_from_slice(&self.last_leaf_path.to_be_bytes());
            std::fs::write(meta_path, bytes)?;
        }
        Ok(())
    }

    /// Flush and release all underlying stores.
    pub fn close(&mut self) -> Result<()> {
        self.node_store.close()?;
        self.leaf_store.close()?;
        self.index.close()?;
        tracing::debug!("closed virtual data source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> Vec<u8> {
        vec![b; 32]
    }

    fn value(b: u8) -> Vec<u8> {
        vec![b; 32]
    }

    fn hash(b: u8) -> Hash {
        Hash([b; HASH_BYTES])
    }

    fn new_source() -> VirtualDataSource {
        VirtualDataSource::in_memory(32, 32)
    }

    #[test]
    fn add_leaf_roundtrip_by_path_and_key() {
        let mut ds = new_source();
        ds.add_leaf(1, &key(0xAA), &value(0xBB), &hash(1)).unwrap();

        assert_eq!(ds.load_leaf_value(1).unwrap(), Some(value(0xBB)));
        assert_eq!(ds.load_leaf_value_by_key(&key(0xAA)).unwrap(), Some(value(0xBB)));
        assert_eq!(ds.load_leaf_key(1).unwrap(), Some(key(0xAA)));
        assert_eq!(ds.load_leaf_path(&key(0xAA)).unwrap(), 1);
        assert_eq!(ds.load_leaf_hash(1).unwrap(), Some(hash(1)));
    }

    #[test]
    fn missing_leaves_read_as_absent() {
        let ds = new_source();
        assert_eq!(ds.load_leaf_value(5).unwrap(), None);
        assert_eq!(ds.load_leaf_key(5).unwrap(), None);
        assert_eq!(ds.load_leaf_hash(5).unwrap(), None);
        assert_eq!(ds.load_leaf_path(&key(9)).unwrap(), INVALID_PATH);
    }

    #[test]
    fn internal_and_leaf_hashes_are_distinct_reads() {
        let mut ds = new_source();
        ds.save_internal(0, &hash(7)).unwrap();
        assert_eq!(ds.load_internal_hash(0).unwrap(), Some(hash(7)));
        assert_eq!(ds.load_leaf_hash(0).unwrap(), None);

        ds.add_leaf(1, &key(1), &value(1), &hash(8)).unwrap();
        assert_eq!(ds.load_leaf_hash(1).unwrap(), Some(hash(8)));
        assert_eq!(ds.load_internal_hash(1).unwrap(), None);
    }

    #[test]
    fn update_leaf_rewrites_value_in_place() {
        let mut ds = new_source();
        ds.add_leaf(2, &key(1), &value(1), &hash(1)).unwrap();
        ds.update_leaf(2, &key(1), &value(9), &hash(2)).unwrap();
        assert_eq!(ds.load_leaf_value(2).unwrap(), Some(value(9)));
        assert_eq!(ds.load_leaf_hash(2).unwrap(), Some(hash(2)));
    }

    #[test]
    fn update_leaf_without_record_fails() {
        let mut ds = new_source();
        assert!(matches!(
            ds.update_leaf(3, &key(1), &value(1), &hash(1)),
            Err(VmapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn move_invariant_holds() {
        let mut ds = new_source();
        ds.add_leaf(4, &key(1), &value(1), &hash(1)).unwrap();
        ds.update_leaf_path(4, 6, &key(1), &hash(2)).unwrap();

        assert_eq!(ds.load_leaf_path(&key(1)).unwrap(), 6);
        assert_eq!(ds.load_leaf_value(6).unwrap(), Some(value(1)));
        // The vacated path no longer carries the moved leaf's hash.
        assert_eq!(ds.load_leaf_hash(4).unwrap(), None);
    }

    #[test]
    fn moving_onto_a_leaf_releases_the_displaced_record() {
        let mut ds = new_source();
        ds.add_leaf(1, &key(1), &value(1), &hash(1)).unwrap();
        ds.add_leaf(2, &key(2), &value(2), &hash(2)).unwrap();
        ds.update_leaf_path(1, 2, &key(1), &hash(3)).unwrap();

        assert_eq!(ds.load_leaf_value(2).unwrap(), Some(value(1)));
        assert_eq!(ds.load_leaf_path(&key(1)).unwrap(), 2);
    }

    #[test]
    fn moving_a_nonexistent_leaf_fails() {
        let mut ds = new_source();
        assert!(matches!(
            ds.update_leaf_path(0, 1, &key(1), &hash(1)),
            Err(VmapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn negative_paths_are_rejected() {
        let mut ds = new_source();
        assert!(matches!(
            ds.save_internal(-1, &hash(1)),
            Err(VmapError::InvalidArgument(_))
        ));
        assert!(ds.load_leaf_value(-3).is_err());
    }

    #[test]
    fn duplicate_add_leaf_is_rejected_and_index_untouched() {
        let mut ds = new_source();
        ds.add_leaf(1, &key(1), &value(1), &hash(1)).unwrap();
        assert!(ds.add_leaf(2, &key(1), &value(2), &hash(2)).is_err());
        assert_eq!(ds.load_leaf_path(&key(1)).unwrap(), 1);
    }

    #[test]
    fn on_disk_source_reopens_with_leaf_paths() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ds = VirtualDataSource::on_disk(dir.path(), 1024, 32, 32).unwrap();
            ds.add_leaf(1, &key(1), &value(1), &hash(1)).unwrap();
            ds.write_first_leaf_path(1).unwrap();
            ds.write_last_leaf_path(1).unwrap();
            ds.close().unwrap();
        }
        let mut ds = VirtualDataSource::on_disk(dir.path(), 1024, 32, 32).unwrap();
        assert_eq!(ds.first_leaf_path(), 1);
        assert_eq!(ds.last_leaf_path(), 1);
        assert_eq!(ds.load_leaf_value_by_key(&key(1)).unwrap(), Some(value(1)));
        ds.close().unwrap();
    }
}
