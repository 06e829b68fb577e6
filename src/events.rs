//! Structured events emitted by the epoch state machine
//!
//! Events are accumulated in the manager's event log during block
//! processing; the host drains them after each block and forwards them to
//! its own event pipeline.

use crate::config::SlashThreshold;
use crate::types::Validator;
use serde::{Deserialize, Serialize};

/// An event produced during block processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochingEvent {
    /// A new epoch has begun
    BeginEpoch {
        /// Number of the new epoch
        epoch_number: u64,
    },

    /// The current epoch has ended and its queue was flushed
    EndEpoch {
        /// Number of the ended epoch
        epoch_number: u64,
    },

    /// Slashed voting power crossed a configured threshold
    SlashThreshold {
        /// The threshold that was crossed
        threshold: SlashThreshold,

        /// Slashed voting power after the crossing
        slashed_voting_power: i64,

        /// Total voting power of the epoch's snapshot
        total_voting_power: i64,

        /// Every validator slashed in this epoch so far
        slashed_validators: Vec<Validator>,
    },

    /// A queued message was rejected by the staking collaborator at flush
    /// time and dropped
    HandleQueuedMsgFailure {
        /// Epoch whose queue was being flushed
        epoch_number: u64,

        /// Height at which the message was originally received
        height: u64,

        /// Transaction id of the originating submission
        tx_id: Vec<u8>,

        /// Digest of the dropped message
        msg_id: Vec<u8>,

        /// Rejection reason reported by the collaborator
        error: String,
    },
}
