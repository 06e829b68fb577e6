//! Lifecycle recording for validators, delegations, and epochs
//!
//! A pure append-only log per subject. Each record call reads the current
//! list (or starts empty), appends one height- and time-stamped entry, and
//! writes the whole list back. No compaction, no validation of transition
//! legality; the only job is faithful, ordered history for observability.
//!
//! Timestamps always come from the block header, never the wall clock, so
//! replay on every node produces identical records.

use crate::error::{Error, Result};
use crate::store::{self, KvStore};
use crate::types::{
    BondState, DelegationLifecycle, DelegationStateUpdate, DelegatorAddress, EpochLifecycle,
    EpochState, EpochStateUpdate, ValStateUpdate, ValidatorAddress, ValidatorLifecycle,
};
use tracing::debug;

/// Records lifecycle histories in the shared store
#[derive(Clone)]
pub struct LifecycleRecorder {
    store: KvStore,
}

impl LifecycleRecorder {
    /// Create a recorder over the shared store
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Append a bonding-state transition to a validator's history
    pub fn record_new_val_state(
        &self,
        val_addr: &ValidatorAddress,
        state: BondState,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        let mut lc = self.get_val_lifecycle(val_addr)?.unwrap_or(ValidatorLifecycle {
            val_addr: *val_addr,
            val_life: Vec::new(),
        });
        lc.val_life.push(ValStateUpdate {
            state,
            block_height,
            block_time,
        });

        let key = store::prefixed(store::VAL_LIFE, &[val_addr.as_bytes()]);
        let bytes = bincode::serialize(&lc).map_err(Error::codec)?;
        self.store.set(key, bytes);
        debug!(validator = %val_addr, %state, height = block_height, "recorded validator state");
        Ok(())
    }

    /// A validator's recorded history, if any
    pub fn get_val_lifecycle(&self, val_addr: &ValidatorAddress) -> Result<Option<ValidatorLifecycle>> {
        let key = store::prefixed(store::VAL_LIFE, &[val_addr.as_bytes()]);
        match self.store.get(&key) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(Error::codec)?)),
            None => Ok(None),
        }
    }

    /// Append a bonding-state transition to a delegator's history
    pub fn record_new_delegation_state(
        &self,
        del_addr: &DelegatorAddress,
        val_addr: &ValidatorAddress,
        amount: Option<u64>,
        state: BondState,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        let mut lc = self
            .get_delegation_lifecycle(del_addr)?
            .unwrap_or(DelegationLifecycle {
                del_addr: *del_addr,
                del_life: Vec::new(),
            });
        lc.del_life.push(DelegationStateUpdate {
            state,
            val_addr: *val_addr,
            amount,
            block_height,
            block_time,
        });

        let key = store::prefixed(store::DEL_LIFE, &[del_addr.as_bytes()]);
        let bytes = bincode::serialize(&lc).map_err(Error::codec)?;
        self.store.set(key, bytes);
        debug!(delegator = %del_addr, validator = %val_addr, %state, "recorded delegation state");
        Ok(())
    }

    /// A delegator's recorded history, if any
    pub fn get_delegation_lifecycle(
        &self,
        del_addr: &DelegatorAddress,
    ) -> Result<Option<DelegationLifecycle>> {
        let key = store::prefixed(store::DEL_LIFE, &[del_addr.as_bytes()]);
        match self.store.get(&key) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(Error::codec)?)),
            None => Ok(None),
        }
    }

    /// Append a checkpoint-lifecycle transition to an epoch's history
    pub fn record_new_epoch_state(
        &self,
        epoch_number: u64,
        state: EpochState,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        let mut lc = self.get_epoch_lifecycle(epoch_number)?.unwrap_or(EpochLifecycle {
            epoch_number,
            epoch_life: Vec::new(),
        });
        lc.epoch_life.push(EpochStateUpdate {
            state,
            block_height,
            block_time,
        });

        let key = store::prefixed(store::EPOCH_LIFE, &[&store::u64_key(epoch_number)]);
        let bytes = bincode::serialize(&lc).map_err(Error::codec)?;
        self.store.set(key, bytes);
        debug!(epoch = epoch_number, %state, height = block_height, "recorded epoch state");
        Ok(())
    }

    /// An epoch's recorded history, if any
    pub fn get_epoch_lifecycle(&self, epoch_number: u64) -> Result<Option<EpochLifecycle>> {
        let key = store::prefixed(store::EPOCH_LIFE, &[&store::u64_key(epoch_number)]);
        match self.store.get(&key) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(Error::codec)?)),
            None => Ok(None),
        }
    }
}
