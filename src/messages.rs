//! Deferred validator-set-affecting messages
//!
//! Messages that would change the validator set are not executed when they
//! arrive; they are wrapped in a [`QueuedMessage`] and held until the
//! epoch boundary, where the state machine forwards them to the staking
//! collaborator in FIFO order.

use crate::error::{Error, Result};
use crate::types::{DelegatorAddress, ValidatorAddress, DIGEST_LEN};
use serde::{Deserialize, Serialize};

/// An amount of a staking denomination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Denomination name
    pub denom: String,

    /// Amount in base units
    pub amount: u64,
}

impl Coin {
    /// Create a new coin
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

/// Request to create a new validator with a self-delegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateValidator {
    /// Address of the validator being created
    pub validator_addr: ValidatorAddress,

    /// Consensus public key of the new validator
    pub pubkey: Vec<u8>,

    /// Self-delegated amount
    pub value: Coin,
}

/// Request to delegate stake to a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDelegate {
    /// Delegating account
    pub delegator_addr: DelegatorAddress,

    /// Target validator
    pub validator_addr: ValidatorAddress,

    /// Delegated amount
    pub amount: Coin,
}

/// Request to undelegate stake from a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUndelegate {
    /// Delegating account
    pub delegator_addr: DelegatorAddress,

    /// Source validator
    pub validator_addr: ValidatorAddress,

    /// Undelegated amount
    pub amount: Coin,
}

/// Request to move a delegation between validators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgBeginRedelegate {
    /// Delegating account
    pub delegator_addr: DelegatorAddress,

    /// Validator the stake moves away from
    pub validator_src_addr: ValidatorAddress,

    /// Validator the stake moves to
    pub validator_dst_addr: ValidatorAddress,

    /// Redelegated amount
    pub amount: Coin,
}

/// The tagged union of deferrable staking messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingMsg {
    /// Create a validator
    CreateValidator(MsgCreateValidator),

    /// Delegate stake
    Delegate(MsgDelegate),

    /// Undelegate stake
    Undelegate(MsgUndelegate),

    /// Redelegate stake
    BeginRedelegate(MsgBeginRedelegate),
}

impl StakingMsg {
    /// Short name of the variant, for logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            StakingMsg::CreateValidator(_) => "create_validator",
            StakingMsg::Delegate(_) => "delegate",
            StakingMsg::Undelegate(_) => "undelegate",
            StakingMsg::BeginRedelegate(_) => "begin_redelegate",
        }
    }
}

/// A deferred message held in the current epoch's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Identifier of the transaction that carried the message
    pub tx_id: Vec<u8>,

    /// Digest of the wrapped message payload
    pub msg_id: Vec<u8>,

    /// Height at which the message was received
    pub block_height: u64,

    /// Header time of that block, unix seconds
    pub block_time: u64,

    /// The wrapped staking message
    pub msg: StakingMsg,
}

impl QueuedMessage {
    /// Wrap a staking message for deferral
    ///
    /// The message id is a digest of the encoded payload, so identical
    /// payloads share an id while remaining distinct queue entries.
    pub fn new(block_height: u64, block_time: u64, tx_id: Vec<u8>, msg: StakingMsg) -> Result<Self> {
        let payload = bincode::serialize(&msg).map_err(Error::codec)?;
        let msg_id = blake3::hash(&payload).as_bytes().to_vec();
        debug_assert_eq!(msg_id.len(), DIGEST_LEN);

        Ok(Self {
            tx_id,
            msg_id,
            block_height,
            block_time,
            msg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ADDRESS_LEN;

    fn delegate_msg(seed: u8) -> StakingMsg {
        StakingMsg::Delegate(MsgDelegate {
            delegator_addr: DelegatorAddress::new([seed; ADDRESS_LEN]),
            validator_addr: ValidatorAddress::new([seed + 1; ADDRESS_LEN]),
            amount: Coin::new("stake", 100),
        })
    }

    #[test]
    fn test_msg_id_is_payload_digest() {
        let a = QueuedMessage::new(5, 1000, vec![1], delegate_msg(1)).unwrap();
        let b = QueuedMessage::new(9, 2000, vec![2], delegate_msg(1)).unwrap();
        let c = QueuedMessage::new(5, 1000, vec![1], delegate_msg(3)).unwrap();

        // same payload, same id, regardless of height or tx
        assert_eq!(a.msg_id, b.msg_id);
        assert_ne!(a.msg_id, c.msg_id);
        assert_eq!(a.msg_id.len(), DIGEST_LEN);
    }

    #[test]
    fn test_variant_kind() {
        assert_eq!(delegate_msg(1).kind(), "delegate");
        let undelegate = StakingMsg::Undelegate(MsgUndelegate {
            delegator_addr: DelegatorAddress::new([0; ADDRESS_LEN]),
            validator_addr: ValidatorAddress::new([1; ADDRESS_LEN]),
            amount: Coin::new("stake", 1),
        });
        assert_eq!(undelegate.kind(), "undelegate");
    }
}
