//! Staking collaborator interface
//!
//! The epoch state machine never mutates bonded stake itself; it defers
//! wrapped messages to a staking collaborator at epoch boundaries and reads
//! the bonded set back when snapshotting a new epoch. [`StakingAdapter`] is
//! that seam. [`InMemoryStaking`] is a small reference implementation used
//! by the tests and by hosts that want a self-contained ledger.

use crate::error::{Error, Result};
use crate::messages::{MsgBeginRedelegate, MsgCreateValidator, MsgDelegate, MsgUndelegate};
use crate::types::{Validator, ValidatorAddress};
use std::collections::BTreeMap;
use tracing::debug;

/// Capability interface over the staking collaborator
///
/// Forwarding methods run at epoch end, once per queued message, in queue
/// order. A returned error means the collaborator rejected that one message;
/// the caller drops it and continues with the rest of the queue.
pub trait StakingAdapter {
    /// The currently bonded validators, used to snapshot a new epoch
    fn bonded_validators(&self) -> Vec<Validator>;

    /// Denomination the collaborator accepts for bonding
    fn bond_denom(&self) -> String;

    /// Apply a deferred validator creation
    fn forward_create_validator(&mut self, msg: &MsgCreateValidator) -> Result<()>;

    /// Apply a deferred delegation
    fn forward_delegate(&mut self, msg: &MsgDelegate) -> Result<()>;

    /// Apply a deferred undelegation
    fn forward_undelegate(&mut self, msg: &MsgUndelegate) -> Result<()>;

    /// Apply a deferred redelegation
    fn forward_begin_redelegate(&mut self, msg: &MsgBeginRedelegate) -> Result<()>;
}

/// Self-contained staking ledger keyed by validator address
///
/// Tracks bonded power per validator and a log of which message kinds were
/// forwarded, in order. Suitable for tests and single-process hosts.
pub struct InMemoryStaking {
    bonded: BTreeMap<ValidatorAddress, i64>,

    denom: String,

    /// Kinds of the messages applied so far, in application order
    pub forwarded: Vec<&'static str>,
}

impl InMemoryStaking {
    /// Create an empty ledger accepting the given denomination
    pub fn new(denom: impl Into<String>) -> Self {
        Self {
            bonded: BTreeMap::new(),
            denom: denom.into(),
            forwarded: Vec::new(),
        }
    }

    /// Bond `power` directly to a validator, creating it if needed
    ///
    /// Scaffolding for seeding a validator set without going through the
    /// message queue.
    pub fn bond(&mut self, addr: ValidatorAddress, power: i64) {
        *self.bonded.entry(addr).or_insert(0) += power;
    }

    /// Bonded power of a validator, zero when unknown
    pub fn power_of(&self, addr: &ValidatorAddress) -> i64 {
        self.bonded.get(addr).copied().unwrap_or(0)
    }

    fn check_denom(&self, denom: &str) -> Result<()> {
        if denom != self.denom {
            return Err(Error::Staking(format!(
                "unknown bond denomination {}, expected {}",
                denom, self.denom
            )));
        }
        Ok(())
    }

    fn unbond(&mut self, addr: &ValidatorAddress, amount: i64) -> Result<()> {
        let power = self
            .bonded
            .get_mut(addr)
            .ok_or_else(|| Error::Staking(format!("validator {} is not bonded", addr)))?;
        if *power < amount {
            return Err(Error::Staking(format!(
                "validator {} has {} bonded, cannot release {}",
                addr, power, amount
            )));
        }
        *power -= amount;
        if *power == 0 {
            self.bonded.remove(addr);
        }
        Ok(())
    }
}

impl StakingAdapter for InMemoryStaking {
    fn bonded_validators(&self) -> Vec<Validator> {
        self.bonded
            .iter()
            .map(|(addr, power)| Validator {
                addr: *addr,
                power: *power,
            })
            .collect()
    }

    fn bond_denom(&self) -> String {
        self.denom.clone()
    }

    fn forward_create_validator(&mut self, msg: &MsgCreateValidator) -> Result<()> {
        self.check_denom(&msg.value.denom)?;
        if self.bonded.contains_key(&msg.validator_addr) {
            return Err(Error::Staking(format!(
                "validator {} already exists",
                msg.validator_addr
            )));
        }
        self.bonded
            .insert(msg.validator_addr, msg.value.amount as i64);
        self.forwarded.push("create_validator");
        debug!(validator = %msg.validator_addr, power = msg.value.amount, "created validator");
        Ok(())
    }

    fn forward_delegate(&mut self, msg: &MsgDelegate) -> Result<()> {
        self.check_denom(&msg.amount.denom)?;
        if !self.bonded.contains_key(&msg.validator_addr) {
            return Err(Error::Staking(format!(
                "validator {} is not bonded",
                msg.validator_addr
            )));
        }
        self.bond(msg.validator_addr, msg.amount.amount as i64);
        self.forwarded.push("delegate");
        Ok(())
    }

    fn forward_undelegate(&mut self, msg: &MsgUndelegate) -> Result<()> {
        self.check_denom(&msg.amount.denom)?;
        self.unbond(&msg.validator_addr, msg.amount.amount as i64)?;
        self.forwarded.push("undelegate");
        Ok(())
    }

    fn forward_begin_redelegate(&mut self, msg: &MsgBeginRedelegate) -> Result<()> {
        self.check_denom(&msg.amount.denom)?;
        if !self.bonded.contains_key(&msg.validator_dst_addr) {
            return Err(Error::Staking(format!(
                "redelegation target {} is not bonded",
                msg.validator_dst_addr
            )));
        }
        self.unbond(&msg.validator_src_addr, msg.amount.amount as i64)?;
        self.bond(msg.validator_dst_addr, msg.amount.amount as i64);
        self.forwarded.push("begin_redelegate");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Coin;
    use crate::types::{DelegatorAddress, ADDRESS_LEN};

    fn val(seed: u8) -> ValidatorAddress {
        ValidatorAddress::new([seed; ADDRESS_LEN])
    }

    fn del(seed: u8) -> DelegatorAddress {
        DelegatorAddress::new([seed; ADDRESS_LEN])
    }

    #[test]
    fn test_delegate_and_undelegate() {
        let mut staking = InMemoryStaking::new("stake");
        staking.bond(val(1), 100);

        staking
            .forward_delegate(&MsgDelegate {
                delegator_addr: del(9),
                validator_addr: val(1),
                amount: Coin::new("stake", 50),
            })
            .unwrap();
        assert_eq!(staking.power_of(&val(1)), 150);

        staking
            .forward_undelegate(&MsgUndelegate {
                delegator_addr: del(9),
                validator_addr: val(1),
                amount: Coin::new("stake", 150),
            })
            .unwrap();
        assert_eq!(staking.power_of(&val(1)), 0);
        assert!(staking.bonded_validators().is_empty());
    }

    #[test]
    fn test_delegate_to_unknown_validator_fails() {
        let mut staking = InMemoryStaking::new("stake");
        let result = staking.forward_delegate(&MsgDelegate {
            delegator_addr: del(9),
            validator_addr: val(1),
            amount: Coin::new("stake", 50),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_create_validator_rejects_duplicates_and_wrong_denom() {
        let mut staking = InMemoryStaking::new("stake");
        let msg = MsgCreateValidator {
            validator_addr: val(1),
            pubkey: vec![0xaa; 32],
            value: Coin::new("stake", 40),
        };
        staking.forward_create_validator(&msg).unwrap();
        assert!(staking.forward_create_validator(&msg).is_err());

        let wrong = MsgCreateValidator {
            validator_addr: val(2),
            pubkey: vec![0xbb; 32],
            value: Coin::new("atom", 40),
        };
        assert!(staking.forward_create_validator(&wrong).is_err());
    }

    #[test]
    fn test_redelegate_moves_power() {
        let mut staking = InMemoryStaking::new("stake");
        staking.bond(val(1), 100);
        staking.bond(val(2), 20);

        staking
            .forward_begin_redelegate(&MsgBeginRedelegate {
                delegator_addr: del(9),
                validator_src_addr: val(1),
                validator_dst_addr: val(2),
                amount: Coin::new("stake", 30),
            })
            .unwrap();
        assert_eq!(staking.power_of(&val(1)), 70);
        assert_eq!(staking.power_of(&val(2)), 50);
        assert_eq!(staking.forwarded, vec!["begin_redelegate"]);
    }

    #[test]
    fn test_undelegate_more_than_bonded_fails() {
        let mut staking = InMemoryStaking::new("stake");
        staking.bond(val(1), 10);
        let result = staking.forward_undelegate(&MsgUndelegate {
            delegator_addr: del(9),
            validator_addr: val(1),
            amount: Coin::new("stake", 11),
        });
        assert!(result.is_err());
        assert_eq!(staking.power_of(&val(1)), 10);
    }
}
