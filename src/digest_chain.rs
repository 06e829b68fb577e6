//! Per-block digest chain
//!
//! One 32-byte digest is recorded per block height during finalization.
//! The ordered digest range of a finished epoch feeds the Merkle tree that
//! produces the epoch's committed digest root.

use crate::error::{Error, Result};
use crate::store::{self, KvStore};
use crate::types::DIGEST_LEN;
use tracing::debug;

/// Records and retrieves per-height block digests
#[derive(Clone)]
pub struct DigestChain {
    store: KvStore,
}

impl DigestChain {
    /// Create a digest chain over the shared store
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Record the digest for a height
    ///
    /// Idempotent: re-recording a height overwrites the previous value.
    pub fn record_digest(&self, height: u64, digest: [u8; DIGEST_LEN]) {
        let key = store::prefixed(store::DIGEST, &[&store::u64_key(height)]);
        self.store.set(key, digest.to_vec());
        debug!(height, digest = %hex::encode(digest), "recorded block digest");
    }

    /// Get the digest recorded for a height
    pub fn get_digest(&self, height: u64) -> Result<[u8; DIGEST_LEN]> {
        let key = store::prefixed(store::DIGEST, &[&store::u64_key(height)]);
        let bytes = self
            .store
            .get(&key)
            .ok_or_else(|| Error::InvalidHeight(format!("height {} is not known yet", height)))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Codec(format!("digest at height {} has invalid length", height)))
    }

    /// All digests for the contiguous height range `[first, last]`
    ///
    /// Errors if any height in the range has no recorded digest.
    pub fn digests_in_range(&self, first: u64, last: u64) -> Result<Vec<Vec<u8>>> {
        let mut digests = Vec::with_capacity((last.saturating_sub(first) + 1) as usize);
        for height in first..=last {
            digests.push(self.get_digest(height)?.to_vec());
        }
        Ok(digests)
    }
}
