//! Hook dispatch to registered subscribers
//!
//! External modules subscribe to epoch, slashing, bonding, and checkpoint
//! lifecycle events by implementing [`EpochingHooks`]. Registration happens
//! once at application wiring time; dispatch is synchronous and follows
//! registration order. For the fallible checkpoint and bonding callbacks,
//! the first error aborts the remaining dispatch and propagates; earlier
//! side effects are not rolled back.

use crate::error::Result;
use crate::types::{BondState, DelegatorAddress, Validator, ValidatorAddress};

/// Capability interface for epoching subscribers
///
/// Every method has a no-op default, so a subscriber only implements the
/// events it cares about.
pub trait EpochingHooks {
    /// A new epoch has begun
    fn after_epoch_begins(&self, _epoch_number: u64) {}

    /// An epoch has ended and its queue was flushed
    fn after_epoch_ends(&self, _epoch_number: u64) {}

    /// Slashed voting power crossed a configured threshold
    fn before_slash_threshold(&self, _epoch_number: u64, _slashed: &[Validator]) {}

    /// A validator's bonding state changed
    fn after_validator_state_change(
        &self,
        _addr: &ValidatorAddress,
        _state: BondState,
    ) -> Result<()> {
        Ok(())
    }

    /// A delegation's bonding state changed
    fn after_delegation_state_change(
        &self,
        _del_addr: &DelegatorAddress,
        _val_addr: &ValidatorAddress,
        _state: BondState,
    ) -> Result<()> {
        Ok(())
    }

    /// The checkpoint over an epoch was sealed
    fn after_raw_checkpoint_sealed(&self, _epoch_number: u64) -> Result<()> {
        Ok(())
    }

    /// The checkpoint over an epoch was submitted
    fn after_raw_checkpoint_submitted(&self, _epoch_number: u64) -> Result<()> {
        Ok(())
    }

    /// The checkpoint over an epoch was confirmed
    fn after_raw_checkpoint_confirmed(&self, _epoch_number: u64) -> Result<()> {
        Ok(())
    }

    /// The checkpoint over an epoch was finalized
    fn after_raw_checkpoint_finalized(&self, _epoch_number: u64) -> Result<()> {
        Ok(())
    }

    /// The checkpoint over an epoch was abandoned
    fn after_raw_checkpoint_forgotten(&self, _epoch_number: u64) -> Result<()> {
        Ok(())
    }
}

/// Ordered list of registered subscribers
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn EpochingHooks>>,
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber; dispatch follows registration order
    pub fn register(&mut self, hook: Box<dyn EpochingHooks>) {
        self.hooks.push(hook);
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fan out `after_epoch_begins` to every subscriber
    pub fn after_epoch_begins(&self, epoch_number: u64) {
        for hook in &self.hooks {
            hook.after_epoch_begins(epoch_number);
        }
    }

    /// Fan out `after_epoch_ends` to every subscriber
    pub fn after_epoch_ends(&self, epoch_number: u64) {
        for hook in &self.hooks {
            hook.after_epoch_ends(epoch_number);
        }
    }

    /// Fan out `before_slash_threshold` to every subscriber
    pub fn before_slash_threshold(&self, epoch_number: u64, slashed: &[Validator]) {
        for hook in &self.hooks {
            hook.before_slash_threshold(epoch_number, slashed);
        }
    }

    /// Fan out a validator bonding-state transition, aborting on the first
    /// error
    pub fn after_validator_state_change(
        &self,
        addr: &ValidatorAddress,
        state: BondState,
    ) -> Result<()> {
        for hook in &self.hooks {
            hook.after_validator_state_change(addr, state)?;
        }
        Ok(())
    }

    /// Fan out a delegation bonding-state transition, aborting on the first
    /// error
    pub fn after_delegation_state_change(
        &self,
        del_addr: &DelegatorAddress,
        val_addr: &ValidatorAddress,
        state: BondState,
    ) -> Result<()> {
        for hook in &self.hooks {
            hook.after_delegation_state_change(del_addr, val_addr, state)?;
        }
        Ok(())
    }

    /// Fan out a checkpoint sealed notification, aborting on the first error
    pub fn after_raw_checkpoint_sealed(&self, epoch_number: u64) -> Result<()> {
        for hook in &self.hooks {
            hook.after_raw_checkpoint_sealed(epoch_number)?;
        }
        Ok(())
    }

    /// Fan out a checkpoint submitted notification, aborting on the first
    /// error
    pub fn after_raw_checkpoint_submitted(&self, epoch_number: u64) -> Result<()> {
        for hook in &self.hooks {
            hook.after_raw_checkpoint_submitted(epoch_number)?;
        }
        Ok(())
    }

    /// Fan out a checkpoint confirmed notification, aborting on the first
    /// error
    pub fn after_raw_checkpoint_confirmed(&self, epoch_number: u64) -> Result<()> {
        for hook in &self.hooks {
            hook.after_raw_checkpoint_confirmed(epoch_number)?;
        }
        Ok(())
    }

    /// Fan out a checkpoint finalized notification, aborting on the first
    /// error
    pub fn after_raw_checkpoint_finalized(&self, epoch_number: u64) -> Result<()> {
        for hook in &self.hooks {
            hook.after_raw_checkpoint_finalized(epoch_number)?;
        }
        Ok(())
    }

    /// Fan out a checkpoint forgotten notification, aborting on the first
    /// error
    pub fn after_raw_checkpoint_forgotten(&self, epoch_number: u64) -> Result<()> {
        for hook in &self.hooks {
            hook.after_raw_checkpoint_forgotten(epoch_number)?;
        }
        Ok(())
    }
}
