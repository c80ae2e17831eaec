use crate::cache::WriteCache;
use crate::persistence::{deserialize_cache_map, serialize_cache_map, StoragePersistence};
use anyhow::{Context, Result};
use arbor_trie::{NodeSource, SecureTrie};
use arbor_types::{AccountState, Address, FieldUpdate, Hash, StorageKey, StorageValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One contract's storage slots: a write cache of pending slot changes
/// over that account's private storage trie.
///
/// A cache opened inside a tracking child additionally carries the
/// parent's pending slots as a read-through `inherited` map; those are
/// never flushed or serialized here, the parent still owns them.
pub struct StorageCache {
    trie: SecureTrie,
    dirty: HashMap<StorageKey, Option<StorageValue>>,
    inherited: HashMap<StorageKey, Option<StorageValue>>,
}

impl StorageCache {
    pub fn new(trie: SecureTrie) -> Self {
        Self::with_inherited(trie, HashMap::new())
    }

    /// Cache whose reads see `inherited` slots between its own pending
    /// writes and the trie.
    pub fn with_inherited(
        trie: SecureTrie,
        inherited: HashMap<StorageKey, Option<StorageValue>>,
    ) -> Self {
        Self {
            trie,
            dirty: HashMap::new(),
            inherited,
        }
    }

    /// Rebuild a cache from an eviction blob, with its pending slots
    /// restored and a freshly opened trie attached.
    pub fn from_serialized(bytes: &[u8], trie: SecureTrie) -> Result<Self> {
        Ok(Self {
            trie,
            dirty: deserialize_cache_map(bytes)?,
            inherited: HashMap::new(),
        })
    }

    pub fn get(&self, key: &StorageKey) -> Result<Option<StorageValue>> {
        if let Some(entry) = self.dirty.get(key) {
            return Ok(*entry);
        }
        if let Some(entry) = self.inherited.get(key) {
            return Ok(*entry);
        }
        match self.trie.get(key)? {
            Some(bytes) => {
                let value: StorageValue = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("storage value has wrong width"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn put(&mut self, key: StorageKey, value: StorageValue) {
        self.dirty.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: StorageKey) {
        self.dirty.insert(key, None);
    }

    pub fn is_modified(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn has_inherited(&self) -> bool {
        !self.inherited.is_empty()
    }

    /// Root of the attached trie, `None` while it is empty.
    pub fn root(&self) -> Option<Hash> {
        self.trie.root()
    }

    /// Everything pending from this cache's point of view: inherited
    /// slots with its own writes layered on top.
    pub fn pending(&self) -> HashMap<StorageKey, Option<StorageValue>> {
        let mut merged = self.inherited.clone();
        merged.extend(self.dirty.iter().map(|(k, v)| (*k, *v)));
        merged
    }

    /// Take this cache's own pending writes, leaving it clean.
    pub fn drain_dirty(&mut self) -> Vec<(StorageKey, Option<StorageValue>)> {
        self.dirty.drain().collect()
    }

    /// Push pending slots into the trie and flush it. Returns whether
    /// anything was dirty; a cache with no pending writes is a no-op.
    pub fn flush(&mut self) -> Result<bool> {
        if self.dirty.is_empty() {
            return Ok(false);
        }
        let mut entries: Vec<(StorageKey, Option<StorageValue>)> =
            self.dirty.drain().collect();
        entries.sort_by_key(|(k, _)| *k);
        for (key, value) in entries {
            match value {
                Some(value) => self.trie.put(&key, value.to_vec())?,
                None => self.trie.delete(&key)?,
            }
        }
        self.trie.flush()?;
        Ok(true)
    }

    /// Eviction blob of the pending slots (§ cold-storage format).
    pub fn serialize(&self) -> Vec<u8> {
        serialize_cache_map(&self.dirty)
    }
}

/// Address-keyed, lazily materialized map of live [`StorageCache`]s,
/// with optional cold-storage warm-up for previously evicted caches.
/// At most one live cache exists per address.
///
/// A layer opened for a tracking child chains to its parent's layer:
/// reads see the parent's pending slots, and [`fold_into_parent`]
/// pushes the child's writes up at commit.
///
/// [`fold_into_parent`]: StorageCacheLayer::fold_into_parent
pub struct StorageCacheLayer {
    caches: HashMap<Address, StorageCache>,
    nodes: Arc<dyn NodeSource>,
    cold: Option<Arc<dyn StoragePersistence>>,
    parent: Option<Arc<Mutex<StorageCacheLayer>>>,
}

impl StorageCacheLayer {
    pub fn new(nodes: Arc<dyn NodeSource>, cold: Option<Arc<dyn StoragePersistence>>) -> Self {
        Self {
            caches: HashMap::new(),
            nodes,
            cold,
            parent: None,
        }
    }

    /// Overlay layer for a tracking child. Cold storage stays with the
    /// root layer.
    pub fn child_of(parent: Arc<Mutex<StorageCacheLayer>>, nodes: Arc<dyn NodeSource>) -> Self {
        Self {
            caches: HashMap::new(),
            nodes,
            cold: None,
            parent: Some(parent),
        }
    }

    /// The live cache for `address`, materializing one if needed: from
    /// a cold-storage blob when one exists, otherwise fresh over a trie
    /// rooted at the account's current storage root, carrying any slots
    /// still pending in the parent layer. An untouched live cache whose
    /// trie no longer matches the account's root is re-opened at the
    /// current root.
    pub fn get(&mut self, address: &Address, storage_root: Option<Hash>) -> Result<&mut StorageCache> {
        if let Some(cache) = self.caches.get(address) {
            if !cache.is_modified() && !cache.has_inherited() && cache.root() != storage_root {
                self.caches.remove(address);
            }
        }
        if !self.caches.contains_key(address) {
            let trie = SecureTrie::with_root(self.nodes.clone(), storage_root);
            let cache = match self.cold_blob(address)? {
                Some(blob) => {
                    info!(%address, "warming storage cache from cold storage");
                    StorageCache::from_serialized(&blob, trie)
                        .with_context(|| format!("cold blob for {address}"))?
                }
                None => {
                    let inherited = match &self.parent {
                        Some(parent) => parent.lock().get(address, storage_root)?.pending(),
                        None => HashMap::new(),
                    };
                    StorageCache::with_inherited(trie, inherited)
                }
            };
            self.caches.insert(*address, cache);
        }
        Ok(self.caches.get_mut(address).expect("just inserted"))
    }

    fn cold_blob(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        match &self.cold {
            Some(cold) if cold.storage_exist(address) => cold.get(address),
            _ => Ok(None),
        }
    }

    /// Flush one address's cache and write the resulting root back into
    /// the owning account. The only path by which a contract's storage
    /// commitment reaches the global trie.
    pub fn flush_child(
        &mut self,
        address: &Address,
        accounts: &WriteCache<Address, AccountState>,
    ) -> Result<()> {
        let cache = match self.caches.get_mut(address) {
            Some(cache) => cache,
            None => return Ok(()),
        };
        if !cache.flush()? {
            return Ok(());
        }
        let root = cache.root();
        debug!(%address, root = ?root, "storage trie flushed");
        let state = accounts
            .get(address)?
            .ok_or_else(|| anyhow::anyhow!("storage flush for unknown account {address}"))?;
        accounts.put(*address, state.apply(FieldUpdate::StorageRoot(root)));
        Ok(())
    }

    /// Flush every live cache, writing roots back into their accounts.
    pub fn flush_all(&mut self, accounts: &WriteCache<Address, AccountState>) -> Result<()> {
        let addresses: Vec<Address> = self.caches.keys().copied().collect();
        for address in addresses {
            self.flush_child(&address, accounts)?;
        }
        Ok(())
    }

    /// Push every cache's pending writes up into the parent layer,
    /// leaving this layer clean. Roots stay uncomputed; the root
    /// repository hashes them when it flushes. `root_of` supplies the
    /// storage root for materializing a parent cache that does not
    /// exist yet.
    pub fn fold_into_parent<F>(&mut self, root_of: F) -> Result<()>
    where
        F: Fn(&Address) -> Result<Option<Hash>>,
    {
        let parent = match &self.parent {
            Some(parent) => parent.clone(),
            None => anyhow::bail!("cannot fold a root storage layer"),
        };
        for (address, cache) in self.caches.iter_mut() {
            let dirty = cache.drain_dirty();
            if dirty.is_empty() {
                continue;
            }
            let root = root_of(address)?;
            let mut parent = parent.lock();
            let target = parent.get(address, root)?;
            for (key, value) in dirty {
                match value {
                    Some(value) => target.put(key, value),
                    None => target.delete(key),
                }
            }
        }
        Ok(())
    }

    /// Eviction blobs for every modified cache; untouched caches are
    /// skipped so persistence cost is bounded by the working set.
    pub fn serialized_caches(&self) -> Vec<(Address, Vec<u8>)> {
        self.caches
            .iter()
            .filter(|(_, cache)| cache.is_modified())
            .map(|(address, cache)| (*address, cache.serialize()))
            .collect()
    }
}
