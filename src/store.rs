//! Ordered key-value store with prefix-range iteration
//!
//! Every persisted structure in this crate lives in a prefix-isolated key
//! space of a single ordered map. The store is an in-memory `BTreeMap`
//! behind a shared handle; a host can swap in any sorted backend that
//! preserves byte-order iteration.
//!
//! Key layout:
//! - epoch number scalar: `EPOCH_NUMBER`
//! - epoch metadata: `EPOCH_INFO || epoch_number`
//! - message queue: `MSG_QUEUE || epoch_number || sequence`
//! - queue length: `QUEUE_LEN || epoch_number`
//! - validator snapshot: `VAL_SET || epoch_number || address`
//! - total voting power: `VOTING_POWER || epoch_number`
//! - per-block digest: `DIGEST || height`
//! - slashed validators: `SLASHED_SET || epoch_number || address`
//! - slashed voting power: `SLASHED_POWER || epoch_number`
//! - lifecycles: `VAL_LIFE || address`, `DEL_LIFE || address`,
//!   `EPOCH_LIFE || epoch_number`

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Prefix for the current epoch number scalar
pub const EPOCH_NUMBER: u8 = 0x01;
/// Prefix for epoch metadata keyed by epoch number
pub const EPOCH_INFO: u8 = 0x02;
/// Prefix for queued messages keyed by epoch number and sequence
pub const MSG_QUEUE: u8 = 0x03;
/// Prefix for the per-epoch queue length scalar
pub const QUEUE_LEN: u8 = 0x04;
/// Prefix for validator snapshots keyed by epoch number and address
pub const VAL_SET: u8 = 0x05;
/// Prefix for the per-epoch total voting power scalar
pub const VOTING_POWER: u8 = 0x06;
/// Prefix for per-block digests keyed by height
pub const DIGEST: u8 = 0x07;
/// Prefix for slashed validators keyed by epoch number and address
pub const SLASHED_SET: u8 = 0x08;
/// Prefix for the per-epoch slashed voting power scalar
pub const SLASHED_POWER: u8 = 0x09;
/// Prefix for validator lifecycles keyed by address
pub const VAL_LIFE: u8 = 0x0a;
/// Prefix for delegation lifecycles keyed by address
pub const DEL_LIFE: u8 = 0x0b;
/// Prefix for epoch lifecycles keyed by epoch number
pub const EPOCH_LIFE: u8 = 0x0c;

/// Encode a u64 as big-endian bytes so lexicographic key order matches
/// numeric order
pub fn u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a u64 from big-endian key bytes
pub fn u64_from_key(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// Build a key under a one-byte prefix
pub fn prefixed(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    key.push(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Shared handle to the ordered key-value store
#[derive(Clone, Default)]
pub struct KvStore {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl KvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value under a key
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    /// Set the value under a key, overwriting any previous value
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.write().insert(key, value);
    }

    /// Delete the value under a key
    pub fn delete(&self, key: &[u8]) {
        self.inner.write().remove(key);
    }

    /// Whether a key is present
    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.read().contains_key(key)
    }

    /// All entries whose key starts with `prefix`, in ascending key order
    pub fn prefix_scan(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let guard = self.inner.read();
        guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Delete every entry whose key starts with `prefix`, returning the
    /// number of removed entries
    pub fn clear_prefix(&self, prefix: &[u8]) -> usize {
        let mut guard = self.inner.write();
        let keys: Vec<Vec<u8>> = guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = keys.len();
        for key in keys {
            guard.remove(&key);
        }
        removed
    }
}
