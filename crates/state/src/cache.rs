use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash as StdHash;
use std::sync::Arc;

/// Read side of a keyed value store. Absent keys are `Ok(None)`.
pub trait Source<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>>;
}

/// Copy-on-write overlay over a shared base source.
///
/// Writes and deletions land in the `dirty` map (`None` marks a
/// deletion) and shadow the base on reads. A `WriteCache` is itself a
/// [`Source`], so tracking layers chain: child overlay over parent
/// overlay over the durable store.
pub struct WriteCache<K, V> {
    dirty: RwLock<HashMap<K, Option<V>>>,
    base: Arc<dyn Source<K, V>>,
}

impl<K, V> WriteCache<K, V>
where
    K: Eq + StdHash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(base: Arc<dyn Source<K, V>>) -> Self {
        Self {
            dirty: RwLock::new(HashMap::new()),
            base,
        }
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        if let Some(entry) = self.dirty.read().get(key) {
            return Ok(entry.clone());
        }
        self.base.get(key)
    }

    pub fn put(&self, key: K, value: V) {
        self.dirty.write().insert(key, Some(value));
    }

    pub fn delete(&self, key: K) {
        self.dirty.write().insert(key, None);
    }

    pub fn is_modified(&self) -> bool {
        !self.dirty.read().is_empty()
    }

    /// Take every pending entry, leaving the cache clean.
    pub fn drain_dirty(&self) -> Vec<(K, Option<V>)> {
        self.dirty.write().drain().collect()
    }

    /// Drop pending entries without applying them.
    pub fn clear(&self) {
        self.dirty.write().clear();
    }
}

impl<K, V> Source<K, V> for WriteCache<K, V>
where
    K: Eq + StdHash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        WriteCache::get(self, key)
    }
}

/// Source with no entries, for caches that start from nothing.
pub struct EmptySource;

impl<K: Send + Sync, V: Send + Sync> Source<K, V> for EmptySource {
    fn get(&self, _key: &K) -> Result<Option<V>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Arc<dyn Source<u32, String>> {
        Arc::new(EmptySource)
    }

    #[test]
    fn overlay_shadows_base() {
        let parent = Arc::new(WriteCache::new(empty()));
        parent.put(1, "parent".to_string());

        let child = WriteCache::new(parent.clone() as Arc<dyn Source<u32, String>>);
        assert_eq!(child.get(&1).unwrap(), Some("parent".to_string()));

        child.put(1, "child".to_string());
        assert_eq!(child.get(&1).unwrap(), Some("child".to_string()));
        assert_eq!(parent.get(&1).unwrap(), Some("parent".to_string()));
    }

    #[test]
    fn delete_shadows_base_entry() {
        let parent = Arc::new(WriteCache::new(empty()));
        parent.put(7, "kept".to_string());
        let child = WriteCache::new(parent.clone() as Arc<dyn Source<u32, String>>);
        child.delete(7);
        assert_eq!(child.get(&7).unwrap(), None);
        assert_eq!(parent.get(&7).unwrap(), Some("kept".to_string()));
    }

    #[test]
    fn drain_leaves_cache_clean() {
        let cache = WriteCache::new(empty());
        cache.put(1, "a".to_string());
        cache.delete(2);
        assert!(cache.is_modified());

        let mut drained = cache.drain_dirty();
        drained.sort_by_key(|(k, _)| *k);
        assert_eq!(
            drained,
            vec![(1, Some("a".to_string())), (2, None)]
        );
        assert!(!cache.is_modified());
        assert_eq!(cache.get(&1).unwrap(), None);
    }
}
