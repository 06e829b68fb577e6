//! Core data types for epoch-based validator set management
//!
//! This module defines:
//! - Epoch records and their block-boundary arithmetic
//! - Block headers as seen by this module
//! - Validator addresses, voting power entries, and canonical ordering
//! - Bond and epoch lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a validator or delegator address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Length of a block digest in bytes
pub const DIGEST_LEN: usize = 32;

/// A validator address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorAddress(pub [u8; ADDRESS_LEN]);

impl ValidatorAddress {
    /// Create an address from raw bytes
    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw address bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A delegator address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DelegatorAddress(pub [u8; ADDRESS_LEN]);

impl DelegatorAddress {
    /// Create an address from raw bytes
    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw address bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for DelegatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The block header fields this module consumes from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height
    pub height: u64,

    /// Block time declared in the header, as unix seconds
    pub time: u64,

    /// State commitment of the application after the previous block
    pub app_hash: [u8; DIGEST_LEN],

    /// Hash of this block
    pub block_hash: [u8; DIGEST_LEN],
}

/// A validator entry with its snapshot voting power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Validator address
    pub addr: ValidatorAddress,

    /// Voting power at snapshot time
    pub power: i64,
}

/// A validator set in canonical order
///
/// Canonical order is descending voting power, ties broken by ascending
/// address, so every node derives the same sequence for proofs and indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet(Vec<Validator>);

impl ValidatorSet {
    /// Build a canonically sorted validator set
    pub fn new_sorted(mut vals: Vec<Validator>) -> Self {
        vals.sort_by(|a, b| b.power.cmp(&a.power).then(a.addr.cmp(&b.addr)));
        Self(vals)
    }

    /// Validators in canonical order
    pub fn validators(&self) -> &[Validator] {
        &self.0
    }

    /// Number of validators in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all voting power in the set
    pub fn total_power(&self) -> i64 {
        self.0.iter().map(|v| v.power).sum()
    }
}

impl IntoIterator for ValidatorSet {
    type Item = Validator;
    type IntoIter = std::vec::IntoIter<Validator>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An epoch record
///
/// The relationship between blocks and epochs, assuming an interval of 5:
///
/// ```text
/// heights: 0 | 1 2 3 4 5 | 6 7 8 9 10 |
/// epoch:   0 |     1     |     2      |
/// ```
///
/// Epoch 0 is a degenerate singleton at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Monotonic epoch number, starting at 0
    pub epoch_number: u64,

    /// Number of blocks per epoch at the time this epoch was created
    pub current_epoch_interval: u64,

    /// Height of the first block in this epoch
    pub first_block_height: u64,

    /// Header of the last block of this epoch, set at the epoch boundary
    pub last_block_header: Option<BlockHeader>,

    /// Second block header of the next epoch; the validator set of this
    /// epoch signs a digest derived from it
    pub sealer_header: Option<BlockHeader>,

    /// Merkle root over the per-block digests of this epoch
    pub digest_root: Option<[u8; DIGEST_LEN]>,
}

impl Epoch {
    /// Create a new epoch record with no boundary data yet
    pub fn new(epoch_number: u64, epoch_interval: u64, first_block_height: u64) -> Self {
        Self {
            epoch_number,
            current_epoch_interval: epoch_interval,
            first_block_height,
            last_block_header: None,
            sealer_header: None,
            digest_root: None,
        }
    }

    /// Height of the last block of this epoch
    pub fn last_block_height(&self) -> u64 {
        if self.epoch_number == 0 {
            return 0;
        }
        self.first_block_height + self.current_epoch_interval - 1
    }

    /// Height of the second block of this epoch
    ///
    /// Panics for epoch 0, which has a single block.
    pub fn second_block_height(&self) -> u64 {
        if self.epoch_number == 0 {
            panic!("epoch 0 has no second block");
        }
        self.first_block_height + 1
    }

    /// Whether the given height is the last block of this epoch
    pub fn is_last_block(&self, height: u64) -> bool {
        self.last_block_height() == height
    }

    /// Whether the given height is the first block of this epoch
    pub fn is_first_block(&self, height: u64) -> bool {
        self.first_block_height == height
    }

    /// Whether the given height is the second block of this epoch
    ///
    /// Always false for epoch 0.
    pub fn is_second_block(&self, height: u64) -> bool {
        if self.epoch_number == 0 {
            return false;
        }
        self.second_block_height() == height
    }

    /// Whether the given height is the first block of the epoch after this one
    ///
    /// Only the epoch state machine should use this, once per epoch turn;
    /// everyone else should consult `is_first_block` of the new epoch.
    pub fn is_first_block_of_next_epoch(&self, height: u64) -> bool {
        if self.epoch_number == 0 {
            height == 1
        } else {
            self.first_block_height + self.current_epoch_interval == height
        }
    }

    /// Whether the given height falls inside this epoch
    pub fn within_boundary(&self, height: u64) -> bool {
        height >= self.first_block_height && height <= self.last_block_height()
    }
}

/// Bonding state of a validator or delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondState {
    /// Newly created, not yet bonded
    Created,

    /// Bonded and participating
    Bonded,

    /// Unbonding in progress
    Unbonding,

    /// Fully unbonded
    Unbonded,

    /// Removed from the validator set
    Removed,
}

impl fmt::Display for BondState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BondState::Created => "created",
            BondState::Bonded => "bonded",
            BondState::Unbonding => "unbonding",
            BondState::Unbonded => "unbonded",
            BondState::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle state of an epoch with respect to checkpointing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochState {
    /// First block of the epoch has been processed
    Started,

    /// Last block of the epoch has been processed
    Ended,

    /// The external checkpoint over this epoch has been sealed
    Sealed,

    /// The checkpoint has been submitted to the attestation chain
    Submitted,

    /// The checkpoint is confirmed
    Confirmed,

    /// The checkpoint is finalized and can no longer be disputed
    Finalized,

    /// The checkpoint was abandoned
    Forgotten,
}

impl fmt::Display for EpochState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EpochState::Started => "started",
            EpochState::Ended => "ended",
            EpochState::Sealed => "sealed",
            EpochState::Submitted => "submitted",
            EpochState::Confirmed => "confirmed",
            EpochState::Finalized => "finalized",
            EpochState::Forgotten => "forgotten",
        };
        write!(f, "{}", s)
    }
}

/// One recorded state transition of a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValStateUpdate {
    /// New state
    pub state: BondState,

    /// Height at which the transition was recorded
    pub block_height: u64,

    /// Header time of that block, unix seconds
    pub block_time: u64,
}

/// Append-only lifecycle history of a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorLifecycle {
    /// Subject validator
    pub val_addr: ValidatorAddress,

    /// Ordered state transitions
    pub val_life: Vec<ValStateUpdate>,
}

/// One recorded state transition of a delegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationStateUpdate {
    /// New state
    pub state: BondState,

    /// Counterparty validator of the transition
    pub val_addr: ValidatorAddress,

    /// Amount involved, if the transition carries one
    pub amount: Option<u64>,

    /// Height at which the transition was recorded
    pub block_height: u64,

    /// Header time of that block, unix seconds
    pub block_time: u64,
}

/// Append-only lifecycle history of a delegator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationLifecycle {
    /// Subject delegator
    pub del_addr: DelegatorAddress,

    /// Ordered state transitions
    pub del_life: Vec<DelegationStateUpdate>,
}

/// One recorded state transition of an epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStateUpdate {
    /// New state
    pub state: EpochState,

    /// Height at which the transition was recorded
    pub block_height: u64,

    /// Header time of that block, unix seconds
    pub block_time: u64,
}

/// Append-only lifecycle history of an epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochLifecycle {
    /// Subject epoch
    pub epoch_number: u64,

    /// Ordered state transitions
    pub epoch_life: Vec<EpochStateUpdate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(n: u64, interval: u64, first: u64) -> Epoch {
        Epoch::new(n, interval, first)
    }

    #[test]
    fn test_epoch_boundaries() {
        let e = epoch(1, 5, 1);
        assert_eq!(e.last_block_height(), 5);
        assert!(e.is_first_block(1));
        assert!(e.is_second_block(2));
        assert!(e.is_last_block(5));
        assert!(e.is_first_block_of_next_epoch(6));
        assert!(e.within_boundary(3));
        assert!(!e.within_boundary(6));
    }

    #[test]
    fn test_genesis_epoch_is_singleton() {
        let e = epoch(0, 5, 0);
        assert_eq!(e.last_block_height(), 0);
        assert!(!e.is_second_block(1));
        assert!(e.is_first_block_of_next_epoch(1));
    }

    #[test]
    fn test_interval_one() {
        let e = epoch(3, 1, 3);
        assert_eq!(e.last_block_height(), 3);
        assert!(e.is_last_block(3));
        assert!(e.is_first_block_of_next_epoch(4));
    }

    #[test]
    fn test_canonical_validator_ordering() {
        let a = Validator {
            addr: ValidatorAddress::new([1; ADDRESS_LEN]),
            power: 10,
        };
        let b = Validator {
            addr: ValidatorAddress::new([2; ADDRESS_LEN]),
            power: 30,
        };
        let c = Validator {
            addr: ValidatorAddress::new([0; ADDRESS_LEN]),
            power: 10,
        };

        let set = ValidatorSet::new_sorted(vec![a, b, c]);
        let vals = set.validators();
        assert_eq!(vals[0].power, 30);
        // equal power ties break on ascending address
        assert_eq!(vals[1].addr, c.addr);
        assert_eq!(vals[2].addr, a.addr);
        assert_eq!(set.total_power(), 50);
    }
}
