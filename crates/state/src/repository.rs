use crate::cache::{Source, WriteCache};
use crate::persistence::StoragePersistence;
use crate::storage_cache::StorageCacheLayer;
use anyhow::{Context, Result};
use arbor_trie::{MemNodeSource, NodeCache, NodeSource, SecureTrie};
use arbor_types::{AccountState, Address, FieldUpdate, Hash, StorageKey, StorageValue, NULL_HASH};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only seam to the bytecode store; its physical format lives
/// outside this layer.
pub trait CodeSource: Send + Sync {
    fn code(&self, address: &Address) -> Result<Option<Vec<u8>>>;
}

/// Code source with no backing store.
#[derive(Default)]
pub struct NullCodeSource;

impl CodeSource for NullCodeSource {
    fn code(&self, _address: &Address) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

struct CodeBase(Arc<dyn CodeSource>);

impl Source<Address, Vec<u8>> for CodeBase {
    fn get(&self, key: &Address) -> Result<Option<Vec<u8>>> {
        self.0.code(key)
    }
}

/// Account reads that miss every cache fall through to the global trie.
struct TrieAccountSource {
    trie: Arc<RwLock<SecureTrie>>,
}

impl Source<Address, AccountState> for TrieAccountSource {
    fn get(&self, key: &Address) -> Result<Option<AccountState>> {
        match self.trie.read().get(key.as_bytes())? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).context("decoding account leaf")?,
            )),
            None => Ok(None),
        }
    }
}

/// Caches of the parent a tracking child commits into.
struct ParentLink {
    accounts: Arc<WriteCache<Address, AccountState>>,
    code: Arc<WriteCache<Address, Vec<u8>>>,
}

struct Inner {
    trie: Arc<RwLock<SecureTrie>>,
    /// Node overlay shared by the global trie and every storage trie;
    /// flushed into the durable source as the last commit stage.
    backing: Arc<NodeCache>,
    accounts: Arc<WriteCache<Address, AccountState>>,
    code: Arc<WriteCache<Address, Vec<u8>>>,
    /// Shared so a tracking child's layer can chain to it: child reads
    /// see slots still pending here, and a child commit folds its slot
    /// writes back in.
    storage: Arc<Mutex<StorageCacheLayer>>,
    cold: Option<Arc<dyn StoragePersistence>>,
    parent: Option<ParentLink>,
}

/// World-state repository: account CRUD, per-contract storage, nested
/// tracking transactions, and the global state-root hash.
///
/// One logical writer per instance; every mutating call holds the
/// instance lock for its duration and all I/O is synchronous. A parent
/// must not be mutated while a tracking child derived from it is live.
pub struct Repository {
    inner: Mutex<Inner>,
}

impl Repository {
    pub fn new(
        nodes: Arc<dyn NodeSource>,
        cold: Option<Arc<dyn StoragePersistence>>,
        code: Arc<dyn CodeSource>,
    ) -> Self {
        let backing = Arc::new(NodeCache::new(nodes));
        let trie = Arc::new(RwLock::new(SecureTrie::new(
            backing.clone() as Arc<dyn NodeSource>
        )));
        let accounts = Arc::new(WriteCache::new(Arc::new(TrieAccountSource {
            trie: trie.clone(),
        }) as Arc<dyn Source<Address, AccountState>>));
        let code = Arc::new(WriteCache::new(
            Arc::new(CodeBase(code)) as Arc<dyn Source<Address, Vec<u8>>>
        ));
        let storage = Arc::new(Mutex::new(StorageCacheLayer::new(
            backing.clone() as Arc<dyn NodeSource>,
            cold.clone(),
        )));
        Self {
            inner: Mutex::new(Inner {
                trie,
                backing,
                accounts,
                code,
                storage,
                cold,
                parent: None,
            }),
        }
    }

    /// Repository over heap-backed node storage, without cold storage
    /// or a code store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemNodeSource::new()), None, Arc::new(NullCodeSource))
    }

    /// Insert a zero-value account, overwriting any prior state.
    pub fn create_account(&self, address: Address) {
        let inner = self.inner.lock();
        inner.accounts.put(address, AccountState::zero(address));
    }

    pub fn account_exists(&self, address: &Address) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(inner.accounts.get(address)?.is_some())
    }

    pub fn get_account(&self, address: &Address) -> Result<Option<AccountState>> {
        let inner = self.inner.lock();
        inner.accounts.get(address)
    }

    pub fn get_balance(&self, address: &Address) -> Result<BigUint> {
        let inner = self.inner.lock();
        Ok(inner
            .accounts
            .get(address)?
            .map(|a| a.balance)
            .unwrap_or_default())
    }

    pub fn set_balance(&self, address: Address, balance: BigUint) -> Result<()> {
        self.update_field(address, FieldUpdate::Balance(balance))
    }

    /// Credit the account and return the new balance.
    pub fn add_balance(&self, address: Address, amount: &BigUint) -> Result<BigUint> {
        let inner = self.inner.lock();
        let state = Self::account_or_zero(&inner, &address)?;
        let balance = state.balance.clone() + amount;
        inner
            .accounts
            .put(address, state.apply(FieldUpdate::Balance(balance.clone())));
        Ok(balance)
    }

    pub fn get_expiration_time(&self, address: &Address) -> Result<i64> {
        let inner = self.inner.lock();
        Ok(inner
            .accounts
            .get(address)?
            .map(|a| a.expiration_time)
            .unwrap_or(0))
    }

    pub fn set_expiration_time(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::ExpirationTime(value))
    }

    pub fn set_sender_threshold(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::SenderThreshold(value))
    }

    /// Long-standing quirk kept for compatibility: this writes the
    /// sender threshold, not the receiver threshold.
    pub fn set_receiver_threshold(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::SenderThreshold(value))
    }

    pub fn set_receiver_sig_required(&self, address: Address, value: bool) -> Result<()> {
        self.update_field(address, FieldUpdate::ReceiverSigRequired(value))
    }

    pub fn set_account_num(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::AccountNum(value))
    }

    pub fn set_realm_id(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::RealmId(value))
    }

    pub fn set_shard_id(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::ShardId(value))
    }

    pub fn set_auto_renew_period(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::AutoRenewPeriod(value))
    }

    pub fn set_create_time_ms(&self, address: Address, value: i64) -> Result<()> {
        self.update_field(address, FieldUpdate::CreateTimeMs(value))
    }

    pub fn set_deleted(&self, address: Address, value: bool) -> Result<()> {
        self.update_field(address, FieldUpdate::Deleted(value))
    }

    pub fn set_smart_contract(&self, address: Address, value: bool) -> Result<()> {
        self.update_field(address, FieldUpdate::SmartContract(value))
    }

    pub fn get_code(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock();
        inner.code.get(address)
    }

    pub fn set_code(&self, address: Address, code: Vec<u8>) {
        let inner = self.inner.lock();
        inner.code.put(address, code);
    }

    pub fn get_storage(&self, address: &Address, key: &StorageKey) -> Result<Option<StorageValue>> {
        let inner = self.inner.lock();
        let root = Self::account_or_zero(&inner, address)?.storage_root;
        let mut layer = inner.storage.lock();
        let value = layer.get(address, root)?.get(key)?;
        Ok(value)
    }

    pub fn set_storage(&self, address: Address, key: StorageKey, value: StorageValue) -> Result<()> {
        let inner = self.inner.lock();
        let state = Self::account_or_zero(&inner, &address)?;
        let root = state.storage_root;
        inner.accounts.put(address, state);
        inner.storage.lock().get(&address, root)?.put(key, value);
        Ok(())
    }

    pub fn delete_storage(&self, address: Address, key: StorageKey) -> Result<()> {
        let inner = self.inner.lock();
        let root = Self::account_or_zero(&inner, &address)?.storage_root;
        inner.storage.lock().get(&address, root)?.delete(key);
        Ok(())
    }

    /// New tracking child whose caches overlay this repository's. Until
    /// the child commits or is dropped, this instance must not be
    /// mutated. Dropping the child without committing rolls it back.
    pub fn start_tracking(&self) -> Repository {
        let inner = self.inner.lock();
        let accounts = Arc::new(WriteCache::new(
            inner.accounts.clone() as Arc<dyn Source<Address, AccountState>>
        ));
        let code = Arc::new(WriteCache::new(
            inner.code.clone() as Arc<dyn Source<Address, Vec<u8>>>
        ));
        let storage = Arc::new(Mutex::new(StorageCacheLayer::child_of(
            inner.storage.clone(),
            inner.backing.clone() as Arc<dyn NodeSource>,
        )));
        Repository {
            inner: Mutex::new(Inner {
                trie: inner.trie.clone(),
                backing: inner.backing.clone(),
                accounts,
                code,
                storage,
                cold: None,
                parent: Some(ParentLink {
                    accounts: inner.accounts.clone(),
                    code: inner.code.clone(),
                }),
            }),
        }
    }

    /// Apply pending changes. A tracking child folds its overlays into
    /// the parent's caches, slot writes included, without hashing any
    /// storage trie; a root repository flushes all the way down:
    /// storage caches, then the account cache into the global trie,
    /// then the trie, then the trie's backing node cache. Storage flush
    /// must come first because it dirties account entries the account
    /// flush still has to see.
    pub fn commit(&self) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(parent) = &inner.parent {
            inner.storage.lock().fold_into_parent(|address| {
                Ok(Self::account_or_zero(&inner, address)?.storage_root)
            })?;
            for (address, entry) in inner.accounts.drain_dirty() {
                match entry {
                    Some(state) => parent.accounts.put(address, state),
                    None => parent.accounts.delete(address),
                }
            }
            for (address, entry) in inner.code.drain_dirty() {
                match entry {
                    Some(code) => parent.code.put(address, code),
                    None => parent.code.delete(address),
                }
            }
            debug!("tracking child committed into parent");
            return Ok(());
        }
        inner.storage.lock().flush_all(&inner.accounts)?;
        Self::flush_accounts_into_trie(&inner)?;
        inner.trie.write().flush()?;
        inner.backing.flush()?;
        let root = inner.trie.read().root_hash();
        debug!(%root, "state committed");
        Ok(())
    }

    /// Flush storage and account caches and return the global trie's
    /// root hash. Root repositories only.
    pub fn get_root(&self) -> Result<Hash> {
        let inner = self.inner.lock();
        if inner.parent.is_some() {
            anyhow::bail!("root hash is only defined on a root repository");
        }
        inner.storage.lock().flush_all(&inner.accounts)?;
        Self::flush_accounts_into_trie(&inner)?;
        let root = inner.trie.read().root_hash();
        Ok(root)
    }

    /// Reposition the world state at a previously committed root,
    /// dropping all cached working state.
    pub fn sync_to_root(&self, root: Hash) -> Result<()> {
        let inner = self.inner.lock();
        if inner.parent.is_some() {
            anyhow::bail!("cannot sync a tracking child to a root");
        }
        let target = if root == NULL_HASH { None } else { Some(root) };
        inner.trie.write().set_root(target);
        inner.accounts.clear();
        *inner.storage.lock() = StorageCacheLayer::new(
            inner.backing.clone() as Arc<dyn NodeSource>,
            inner.cold.clone(),
        );
        info!(%root, "state synced to root");
        Ok(())
    }

    /// Evict every dirty storage cache to cold storage, all or nothing.
    /// Returns `Ok(false)` without writing anything when the combined
    /// blob size exceeds `max_storage_kb` kibibytes; on success the
    /// live cache layer is replaced with an empty one.
    pub fn persist_storage_cache(&self, max_storage_kb: u64) -> Result<bool> {
        let inner = self.inner.lock();
        let cold = inner
            .cold
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no cold storage configured"))?;

        let mut layer = inner.storage.lock();
        let mut blobs = layer.serialized_caches();
        let total: u64 = blobs.iter().map(|(_, b)| b.len() as u64).sum();
        if total > max_storage_kb * 1024 {
            info!(total, budget = max_storage_kb * 1024, "storage eviction over budget");
            return Ok(false);
        }

        blobs.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (address, blob) in &blobs {
            let state = Self::account_or_zero(&inner, address)?;
            cold.persist(address, blob, state.expiration_time, state.create_time_ms)?;
        }
        info!(caches = blobs.len(), bytes = total, "storage caches evicted");
        *layer = StorageCacheLayer::new(
            inner.backing.clone() as Arc<dyn NodeSource>,
            Some(cold),
        );
        Ok(true)
    }

    fn update_field(&self, address: Address, update: FieldUpdate) -> Result<()> {
        let inner = self.inner.lock();
        let state = Self::account_or_zero(&inner, &address)?;
        inner.accounts.put(address, state.apply(update));
        Ok(())
    }

    fn account_or_zero(inner: &Inner, address: &Address) -> Result<AccountState> {
        Ok(inner
            .accounts
            .get(address)?
            .unwrap_or_else(|| AccountState::zero(*address)))
    }

    fn flush_accounts_into_trie(inner: &Inner) -> Result<()> {
        let dirty = inner.accounts.drain_dirty();
        if dirty.is_empty() {
            return Ok(());
        }
        let mut trie = inner.trie.write();
        for (address, entry) in dirty {
            match entry {
                Some(state) => {
                    let bytes = bincode::serialize(&state).context("encoding account leaf")?;
                    trie.put(address.as_bytes(), bytes)?;
                }
                None => trie.delete(address.as_bytes())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use arbor_types::{ADDRESS_BYTES, SLOT_KEY_BYTES};

    fn addr(b: u8) -> Address {
        Address([b; ADDRESS_BYTES])
    }

    fn slot(b: u8) -> StorageKey {
        [b; SLOT_KEY_BYTES]
    }

    #[test]
    fn create_account_overwrites() {
        let repo = Repository::in_memory();
        repo.set_balance(addr(1), BigUint::from(50u32)).unwrap();
        repo.create_account(addr(1));
        assert_eq!(repo.get_balance(&addr(1)).unwrap(), BigUint::default());
        assert!(repo.account_exists(&addr(1)).unwrap());
    }

    #[test]
    fn balance_arithmetic() {
        let repo = Repository::in_memory();
        repo.create_account(addr(1));
        let after = repo.add_balance(addr(1), &BigUint::from(30u32)).unwrap();
        assert_eq!(after, BigUint::from(30u32));
        repo.add_balance(addr(1), &BigUint::from(12u32)).unwrap();
        assert_eq!(repo.get_balance(&addr(1)).unwrap(), BigUint::from(42u32));
    }

    #[test]
    fn commit_writes_storage_root_into_account() {
        let repo = Repository::in_memory();
        repo.create_account(addr(0xAA));
        repo.set_storage(addr(0xAA), slot(1), slot(2)).unwrap();
        repo.commit().unwrap();

        let state = repo.get_account(&addr(0xAA)).unwrap().unwrap();
        let root = state.storage_root.expect("storage root set by commit");

        // Hash the same slot set independently.
        let mut check = SecureTrie::new(Arc::new(MemNodeSource::new()));
        check.put(&slot(1), slot(2).to_vec()).unwrap();
        assert_eq!(root, check.root_hash());
    }

    #[test]
    fn root_changes_with_state_and_sync_restores() {
        let repo = Repository::in_memory();
        repo.create_account(addr(0xAA));
        repo.set_storage(addr(0xAA), slot(0x01), slot(0x02)).unwrap();
        repo.commit().unwrap();
        let h1 = repo.get_root().unwrap();

        repo.set_storage(addr(0xAA), slot(0x01), slot(0x03)).unwrap();
        repo.commit().unwrap();
        let h2 = repo.get_root().unwrap();
        assert_ne!(h1, h2);

        repo.sync_to_root(h1).unwrap();
        assert_eq!(
            repo.get_storage(&addr(0xAA), &slot(0x01)).unwrap(),
            Some(slot(0x02))
        );

        repo.sync_to_root(h2).unwrap();
        assert_eq!(
            repo.get_storage(&addr(0xAA), &slot(0x01)).unwrap(),
            Some(slot(0x03))
        );
    }

    #[test]
    fn discarded_tracking_child_leaves_parent_untouched() {
        let repo = Repository::in_memory();
        repo.create_account(addr(5));
        repo.set_balance(addr(5), BigUint::from(100u32)).unwrap();

        {
            let child = repo.start_tracking();
            child.set_balance(addr(5), BigUint::from(999u32)).unwrap();
            assert_eq!(child.get_balance(&addr(5)).unwrap(), BigUint::from(999u32));
            // Dropped without commit.
        }
        assert_eq!(repo.get_balance(&addr(5)).unwrap(), BigUint::from(100u32));
    }

    #[test]
    fn committed_tracking_child_reaches_parent() {
        let repo = Repository::in_memory();
        repo.create_account(addr(6));

        let child = repo.start_tracking();
        child.set_balance(addr(6), BigUint::from(7u32)).unwrap();
        child.set_code(addr(6), vec![0x60, 0x00]);
        child.commit().unwrap();
        drop(child);

        assert_eq!(repo.get_balance(&addr(6)).unwrap(), BigUint::from(7u32));
        assert_eq!(repo.get_code(&addr(6)).unwrap(), Some(vec![0x60, 0x00]));
    }

    #[test]
    fn tracking_child_sees_parent_pending_storage() {
        let repo = Repository::in_memory();
        repo.create_account(addr(7));
        // Pending in the parent's cache, not yet committed to any trie.
        repo.set_storage(addr(7), slot(1), slot(2)).unwrap();

        let child = repo.start_tracking();
        assert_eq!(
            child.get_storage(&addr(7), &slot(1)).unwrap(),
            Some(slot(2))
        );
        // The child shadows it without disturbing the parent.
        child.set_storage(addr(7), slot(1), slot(9)).unwrap();
        assert_eq!(
            child.get_storage(&addr(7), &slot(1)).unwrap(),
            Some(slot(9))
        );
        drop(child);
        assert_eq!(
            repo.get_storage(&addr(7), &slot(1)).unwrap(),
            Some(slot(2))
        );
    }

    #[test]
    fn parent_serves_child_committed_storage() {
        let repo = Repository::in_memory();
        repo.create_account(addr(7));
        // Materialize the parent's cache before the child writes.
        assert_eq!(repo.get_storage(&addr(7), &slot(1)).unwrap(), None);

        let child = repo.start_tracking();
        child.set_storage(addr(7), slot(1), slot(9)).unwrap();
        child.commit().unwrap();
        drop(child);

        assert_eq!(
            repo.get_storage(&addr(7), &slot(1)).unwrap(),
            Some(slot(9))
        );

        // The slot survives a full commit and reaches the storage trie.
        repo.commit().unwrap();
        let root = repo
            .get_account(&addr(7))
            .unwrap()
            .unwrap()
            .storage_root
            .expect("storage root set by commit");
        let mut check = SecureTrie::new(Arc::new(MemNodeSource::new()));
        check.put(&slot(1), slot(9).to_vec()).unwrap();
        assert_eq!(root, check.root_hash());
    }

    #[test]
    fn discarded_child_storage_writes_vanish() {
        let repo = Repository::in_memory();
        repo.create_account(addr(7));
        {
            let child = repo.start_tracking();
            child.set_storage(addr(7), slot(1), slot(2)).unwrap();
            // Dropped without commit.
        }
        assert_eq!(repo.get_storage(&addr(7), &slot(1)).unwrap(), None);
        repo.commit().unwrap();
        assert_eq!(
            repo.get_account(&addr(7)).unwrap().unwrap().storage_root,
            None
        );
    }

    #[test]
    fn tracking_child_has_no_root() {
        let repo = Repository::in_memory();
        let child = repo.start_tracking();
        assert!(child.get_root().is_err());
    }

    #[test]
    fn over_budget_eviction_persists_nothing() {
        let cold = Arc::new(MemoryPersistence::new());
        let repo = Repository::new(
            Arc::new(MemNodeSource::new()),
            Some(cold.clone()),
            Arc::new(NullCodeSource),
        );
        repo.create_account(addr(1));
        repo.set_storage(addr(1), slot(1), slot(1)).unwrap();
        repo.set_storage(addr(1), slot(2), slot(2)).unwrap();

        // Two records are 128 bytes, over a zero-kibibyte budget.
        assert!(!repo.persist_storage_cache(0).unwrap());
        assert_eq!(cold.persist_count(), 0);

        // Still dirty, so a sufficient budget evicts them.
        assert!(repo.persist_storage_cache(1).unwrap());
        assert_eq!(cold.persist_count(), 1);
    }

    #[test]
    fn eviction_then_warm_up_preserves_slots() {
        let cold = Arc::new(MemoryPersistence::new());
        let repo = Repository::new(
            Arc::new(MemNodeSource::new()),
            Some(cold.clone()),
            Arc::new(NullCodeSource),
        );
        repo.create_account(addr(9));
        repo.set_storage(addr(9), slot(3), slot(4)).unwrap();
        assert!(repo.persist_storage_cache(64).unwrap());

        // The live layer was replaced; the read warms up from cold.
        assert_eq!(
            repo.get_storage(&addr(9), &slot(3)).unwrap(),
            Some(slot(4))
        );
    }

    #[test]
    fn receiver_threshold_writes_sender_threshold() {
        let repo = Repository::in_memory();
        repo.create_account(addr(2));
        repo.set_receiver_threshold(addr(2), 77).unwrap();
        let state = repo.get_account(&addr(2)).unwrap().unwrap();
        assert_eq!(state.sender_threshold, 77);
        assert_eq!(state.receiver_threshold, 0);
    }

    #[test]
    fn field_accessors_read_modify_write() {
        let repo = Repository::in_memory();
        let a = addr(3);
        repo.create_account(a);
        repo.set_expiration_time(a, 1000).unwrap();
        repo.set_auto_renew_period(a, 90).unwrap();
        repo.set_create_time_ms(a, 5).unwrap();
        repo.set_deleted(a, true).unwrap();
        repo.set_smart_contract(a, true).unwrap();
        repo.set_receiver_sig_required(a, true).unwrap();
        repo.set_sender_threshold(a, 11).unwrap();
        repo.set_shard_id(a, 1).unwrap();
        repo.set_realm_id(a, 2).unwrap();
        repo.set_account_num(a, 3).unwrap();

        let s = repo.get_account(&a).unwrap().unwrap();
        assert_eq!(repo.get_expiration_time(&a).unwrap(), 1000);
        assert_eq!(s.auto_renew_period, 90);
        assert_eq!(s.create_time_ms, 5);
        assert!(s.deleted && s.smart_contract && s.receiver_sig_required);
        assert_eq!(s.sender_threshold, 11);
        assert_eq!((s.shard_id, s.realm_id, s.account_num), (1, 2, 3));
    }

    #[test]
    fn repository_over_virtual_map_node_storage() {
        use arbor_trie::VirtualNodeSource;
        use arbor_vmap::VirtualDataSource;

        let ds = VirtualDataSource::in_memory(32, VirtualNodeSource::RECOMMENDED_VALUE_SIZE);
        let nodes = Arc::new(VirtualNodeSource::new(ds).unwrap());
        let repo = Repository::new(nodes, None, Arc::new(NullCodeSource));

        repo.create_account(addr(0xAA));
        repo.set_storage(addr(0xAA), slot(1), slot(2)).unwrap();
        repo.commit().unwrap();
        let h1 = repo.get_root().unwrap();

        repo.set_storage(addr(0xAA), slot(1), slot(3)).unwrap();
        repo.commit().unwrap();
        assert_ne!(h1, repo.get_root().unwrap());

        repo.sync_to_root(h1).unwrap();
        assert_eq!(
            repo.get_storage(&addr(0xAA), &slot(1)).unwrap(),
            Some(slot(2))
        );
    }

    #[test]
    fn accounts_survive_commit_through_the_trie() {
        let repo = Repository::in_memory();
        repo.create_account(addr(8));
        repo.set_balance(addr(8), BigUint::from(5u32)).unwrap();
        repo.commit().unwrap();
        // The account cache is clean; the read comes from the trie.
        assert_eq!(repo.get_balance(&addr(8)).unwrap(), BigUint::from(5u32));
    }
}
