/// Width of one contract storage slot key.
pub const SLOT_KEY_BYTES: usize = 32;
/// Width of one contract storage slot value.
pub const SLOT_VALUE_BYTES: usize = 32;
/// One serialised slot record: key followed by value.
pub const SLOT_RECORD_BYTES: usize = SLOT_KEY_BYTES + SLOT_VALUE_BYTES;

/// A fixed 32-byte contract storage key.
pub type StorageKey = [u8; SLOT_KEY_BYTES];
/// A fixed 32-byte contract storage value.
pub type StorageValue = [u8; SLOT_VALUE_BYTES];
