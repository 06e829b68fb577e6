//! Read-only query surface
//!
//! Offset-based pagination over the manager's stored structures. Queries
//! never mutate state; they read the same store the block flow writes.

use crate::error::{Error, Result};
use crate::manager::EpochManager;
use crate::messages::QueuedMessage;
use crate::types::{
    DelegationStateUpdate, DelegatorAddress, Epoch, ValStateUpdate, Validator, ValidatorAddress,
};

/// A page selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Number of items to skip
    pub offset: u64,

    /// Maximum number of items to return; 0 means no limit
    pub limit: u64,
}

impl PageRequest {
    /// Select `limit` items starting at `offset`
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Select everything
    pub fn all() -> Self {
        Self { offset: 0, limit: 0 }
    }
}

/// Pagination metadata accompanying a page of results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageResponse {
    /// Total number of items across all pages
    pub total: u64,

    /// Offset of the next page, when one exists
    pub next_offset: Option<u64>,
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> (Vec<T>, PageResponse) {
    let total = items.len() as u64;
    let start = page.offset.min(total);
    let end = if page.limit == 0 {
        total
    } else {
        (start + page.limit).min(total)
    };
    let next_offset = if end < total { Some(end) } else { None };
    let page_items = items.drain(start as usize..end as usize).collect();
    (
        page_items,
        PageResponse {
            total,
            next_offset,
        },
    )
}

/// The current epoch number and the height at which it ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentEpochResponse {
    /// Number of the current epoch
    pub epoch_number: u64,

    /// Height of the current epoch's last block
    pub epoch_boundary: u64,
}

impl EpochManager {
    /// The current epoch number and its boundary height
    pub fn query_current_epoch(&self) -> CurrentEpochResponse {
        let epoch = self.get_epoch();
        CurrentEpochResponse {
            epoch_number: epoch.epoch_number,
            epoch_boundary: epoch.last_block_height(),
        }
    }

    /// Metadata of one reached epoch
    pub fn query_epoch_info(&self, epoch_number: u64) -> Result<Epoch> {
        self.historical_epoch(epoch_number)
    }

    /// Metadata of every reached epoch, paginated in epoch order
    pub fn query_epochs_info(&self, page: PageRequest) -> Result<(Vec<Epoch>, PageResponse)> {
        let current = self.get_epoch().epoch_number;
        let mut epochs = Vec::with_capacity((current + 1) as usize);
        for number in 0..=current {
            epochs.push(self.historical_epoch(number)?);
        }
        Ok(paginate(epochs, page))
    }

    /// The validator set snapshotted for an epoch, paginated in canonical
    /// order
    pub fn query_epoch_val_set(
        &self,
        epoch_number: u64,
        page: PageRequest,
    ) -> Result<(Vec<Validator>, PageResponse)> {
        if epoch_number > self.get_epoch().epoch_number {
            return Err(Error::UnknownEpoch(epoch_number));
        }
        let set = self.validator_sets().get_validator_set(epoch_number)?;
        let vals: Vec<Validator> = set.into_iter().collect();
        Ok(paginate(vals, page))
    }

    /// The messages queued in an epoch, paginated in insertion order
    ///
    /// Ended epochs answer with an empty queue; their messages were
    /// flushed and cleared at the boundary.
    pub fn query_epoch_msgs(
        &self,
        epoch_number: u64,
        page: PageRequest,
    ) -> Result<(Vec<QueuedMessage>, PageResponse)> {
        if epoch_number > self.get_epoch().epoch_number {
            return Err(Error::UnknownEpoch(epoch_number));
        }
        let msgs = self.msg_queue().get_epoch_msgs(epoch_number)?;
        Ok(paginate(msgs, page))
    }

    /// The queues of the `epoch_count` epochs ending at `end_epoch`, oldest
    /// first, paginated over epochs
    ///
    /// An `end_epoch` of 0 means the current epoch. `epoch_count` must be
    /// at least 1. The window never reaches below epoch 1; epoch 0 is a
    /// genesis singleton whose queue is always empty.
    pub fn query_latest_epoch_msgs(
        &self,
        end_epoch: u64,
        epoch_count: u64,
        page: PageRequest,
    ) -> Result<(Vec<(u64, Vec<QueuedMessage>)>, PageResponse)> {
        if epoch_count == 0 {
            return Err(Error::InvalidMessage(
                "epoch count must be at least 1".to_string(),
            ));
        }
        let current = self.get_epoch().epoch_number;
        let end = if end_epoch == 0 { current } else { end_epoch };
        if end > current {
            return Err(Error::UnknownEpoch(end));
        }
        let begin = end.saturating_sub(epoch_count - 1).max(1);
        let mut result = Vec::new();
        for number in begin..=end {
            result.push((number, self.msg_queue().get_epoch_msgs(number)?));
        }
        Ok(paginate(result, page))
    }

    /// A validator's recorded state transitions, paginated in record order
    pub fn query_val_lifecycle(
        &self,
        addr: &ValidatorAddress,
        page: PageRequest,
    ) -> Result<(Vec<ValStateUpdate>, PageResponse)> {
        let updates = self
            .lifecycles()
            .get_val_lifecycle(addr)?
            .map(|lc| lc.val_life)
            .unwrap_or_default();
        Ok(paginate(updates, page))
    }

    /// A delegator's recorded state transitions, paginated in record order
    pub fn query_delegation_lifecycle(
        &self,
        addr: &DelegatorAddress,
        page: PageRequest,
    ) -> Result<(Vec<DelegationStateUpdate>, PageResponse)> {
        let updates = self
            .lifecycles()
            .get_delegation_lifecycle(addr)?
            .map(|lc| lc.del_life)
            .unwrap_or_default();
        Ok(paginate(updates, page))
    }

    /// The validators slashed so far in an epoch
    pub fn query_epoch_slashed_vals(
        &self,
        epoch_number: u64,
        page: PageRequest,
    ) -> Result<(Vec<Validator>, PageResponse)> {
        if epoch_number > self.get_epoch().epoch_number {
            return Err(Error::UnknownEpoch(epoch_number));
        }
        let vals = self.slashed_sets().get_slashed_validators(epoch_number)?;
        Ok(paginate(vals, page))
    }
}
