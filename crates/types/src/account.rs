use crate::{Address, Hash};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// One ledger account as tracked by the world-state repository.
///
/// Instances are owned by the account-state cache and mutated only via
/// read-modify-write: load, [`AccountState::apply`] an update, put the
/// result back. No aliasing mutation is visible across commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub address: Address,
    pub balance: BigUint,
    /// Millisecond timestamp at which the account expires.
    pub expiration_time: i64,
    /// Seconds between automatic renewals.
    pub auto_renew_period: i64,
    pub create_time_ms: i64,
    pub deleted: bool,
    pub smart_contract: bool,
    pub receiver_sig_required: bool,
    pub sender_threshold: i64,
    pub receiver_threshold: i64,
    pub shard_id: i64,
    pub realm_id: i64,
    pub account_num: i64,
    /// Root hash of this contract's storage trie. `None` for accounts
    /// that are not contracts or have no storage yet.
    pub storage_root: Option<Hash>,
}

impl AccountState {
    /// A zero-value account at the given address.
    pub fn zero(address: Address) -> Self {
        Self {
            address,
            balance: BigUint::default(),
            expiration_time: 0,
            auto_renew_period: 0,
            create_time_ms: 0,
            deleted: false,
            smart_contract: false,
            receiver_sig_required: false,
            sender_threshold: 0,
            receiver_threshold: 0,
            shard_id: 0,
            realm_id: 0,
            account_num: 0,
            storage_root: None,
        }
    }

    /// Apply a single field update, returning the modified state for
    /// chaining into a cache `put`.
    pub fn apply(mut self, update: FieldUpdate) -> Self {
        match update {
            FieldUpdate::Balance(v) => self.balance = v,
            FieldUpdate::ExpirationTime(v) => self.expiration_time = v,
            FieldUpdate::AutoRenewPeriod(v) => self.auto_renew_period = v,
            FieldUpdate::CreateTimeMs(v) => self.create_time_ms = v,
            FieldUpdate::Deleted(v) => self.deleted = v,
            FieldUpdate::SmartContract(v) => self.smart_contract = v,
            FieldUpdate::ReceiverSigRequired(v) => self.receiver_sig_required = v,
            FieldUpdate::SenderThreshold(v) => self.sender_threshold = v,
            FieldUpdate::ReceiverThreshold(v) => self.receiver_threshold = v,
            FieldUpdate::ShardId(v) => self.shard_id = v,
            FieldUpdate::RealmId(v) => self.realm_id = v,
            FieldUpdate::AccountNum(v) => self.account_num = v,
            FieldUpdate::StorageRoot(v) => self.storage_root = v,
        }
        self
    }
}

/// Closed set of account field updates.
///
/// A generic changeset without runtime reflection: callers hand one of
/// these to [`AccountState::apply`] instead of naming a setter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldUpdate {
    Balance(BigUint),
    ExpirationTime(i64),
    AutoRenewPeriod(i64),
    CreateTimeMs(i64),
    Deleted(bool),
    SmartContract(bool),
    ReceiverSigRequired(bool),
    SenderThreshold(i64),
    ReceiverThreshold(i64),
    ShardId(i64),
    RealmId(i64),
    AccountNum(i64),
    StorageRoot(Option<Hash>),
}
