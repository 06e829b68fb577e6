//! Slashed-validator tracking per epoch
//!
//! Each epoch accumulates the set of validators slashed within it, plus the
//! sum of their snapshot voting power. The tracker detects when an addition
//! pushes the slashed fraction across a configured threshold; the crossing
//! verdict uses integer cross-multiplication, never floats, so every node
//! agrees.
//!
//! Re-slashing an address already in the epoch's set is a no-op: slashed
//! power stays monotone and each threshold fires at most once per epoch.

use crate::config::SlashThreshold;
use crate::error::{Error, Result};
use crate::store::{self, KvStore};
use crate::types::{Validator, ValidatorAddress, ADDRESS_LEN};
use tracing::{debug, info, warn};

/// Outcome of adding a slashed validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashOutcome {
    /// Thresholds newly crossed by this addition, in configuration order
    pub crossed: Vec<SlashThreshold>,

    /// Slashed voting power of the epoch after the addition
    pub slashed_voting_power: i64,

    /// True when the validator was already in the set and nothing changed
    pub deduplicated: bool,
}

/// Tracks the slashed validator set of each epoch
#[derive(Clone)]
pub struct SlashedSetTracker {
    store: KvStore,
}

impl SlashedSetTracker {
    /// Create a tracker over the shared store
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Reset an epoch's slashed voting power to 0
    ///
    /// Called at genesis and at the first block of every epoch.
    pub fn init_slashed_set(&self, epoch_number: u64) -> Result<()> {
        self.set_slashed_power(epoch_number, 0)
    }

    fn set_slashed_power(&self, epoch_number: u64, power: i64) -> Result<()> {
        let key = store::prefixed(store::SLASHED_POWER, &[&store::u64_key(epoch_number)]);
        let bytes = bincode::serialize(&power).map_err(Error::codec)?;
        self.store.set(key, bytes);
        Ok(())
    }

    /// Slashed voting power accumulated in an epoch
    ///
    /// Every reached epoch has a recorded value, possibly zero; a missing
    /// record is a corruption signal and panics.
    pub fn get_slashed_voting_power(&self, epoch_number: u64) -> i64 {
        let key = store::prefixed(store::SLASHED_POWER, &[&store::u64_key(epoch_number)]);
        let bytes = self.store.get(&key).unwrap_or_else(|| {
            panic!("slashed voting power of epoch {} is not recorded", epoch_number)
        });
        bincode::deserialize(&bytes).unwrap_or_else(|err| {
            panic!("slashed voting power of epoch {} is corrupt: {}", epoch_number, err)
        })
    }

    /// Whether a validator is already in an epoch's slashed set
    pub fn contains(&self, epoch_number: u64, addr: &ValidatorAddress) -> bool {
        let key = store::prefixed(
            store::SLASHED_SET,
            &[&store::u64_key(epoch_number), addr.as_bytes()],
        );
        self.store.contains(&key)
    }

    /// Add a slashed validator to an epoch's set
    ///
    /// Returns the thresholds newly crossed by this addition. The crossing
    /// check runs against the pre-addition slashed power, so both
    /// thresholds can fire from a single slash that jumps over them.
    pub fn add_slashed_validator(
        &self,
        epoch_number: u64,
        validator: Validator,
        total_voting_power: i64,
        thresholds: &[SlashThreshold],
    ) -> Result<SlashOutcome> {
        let slashed_power = self.get_slashed_voting_power(epoch_number);

        if self.contains(epoch_number, &validator.addr) {
            warn!(
                epoch = epoch_number,
                validator = %validator.addr,
                "validator already slashed in this epoch, ignoring"
            );
            return Ok(SlashOutcome {
                crossed: Vec::new(),
                slashed_voting_power: slashed_power,
                deduplicated: true,
            });
        }

        let crossed: Vec<SlashThreshold> = thresholds
            .iter()
            .copied()
            .filter(|t| t.crossed(slashed_power, validator.power, total_voting_power))
            .collect();

        let key = store::prefixed(
            store::SLASHED_SET,
            &[&store::u64_key(epoch_number), validator.addr.as_bytes()],
        );
        let power_bytes = bincode::serialize(&validator.power).map_err(Error::codec)?;
        self.store.set(key, power_bytes);

        let new_power = slashed_power + validator.power;
        self.set_slashed_power(epoch_number, new_power)?;

        for threshold in &crossed {
            info!(
                epoch = epoch_number,
                threshold = %threshold,
                slashed_power = new_power,
                total_voting_power,
                "slashed voting power crossed threshold"
            );
        }
        debug!(
            epoch = epoch_number,
            validator = %validator.addr,
            power = validator.power,
            slashed_power = new_power,
            "added slashed validator"
        );

        Ok(SlashOutcome {
            crossed,
            slashed_voting_power: new_power,
            deduplicated: false,
        })
    }

    /// Validators slashed in an epoch, with their snapshot powers, in
    /// ascending address order
    pub fn get_slashed_validators(&self, epoch_number: u64) -> Result<Vec<Validator>> {
        let prefix = store::prefixed(store::SLASHED_SET, &[&store::u64_key(epoch_number)]);
        let mut vals = Vec::new();
        for (key, value) in self.store.prefix_scan(&prefix) {
            let addr_bytes = &key[prefix.len()..];
            let addr: [u8; ADDRESS_LEN] = addr_bytes
                .try_into()
                .map_err(|_| Error::Codec("slashed set key has invalid length".to_string()))?;
            let power: i64 = bincode::deserialize(&value).map_err(Error::codec)?;
            vals.push(Validator {
                addr: ValidatorAddress::new(addr),
                power,
            });
        }
        Ok(vals)
    }

    /// Remove an epoch's slashed set and its power accumulator
    ///
    /// Invoked once the epoch's checkpoint is finalized; retention policy
    /// belongs to the host.
    pub fn clear_slashed_validators(&self, epoch_number: u64) {
        let prefix = store::prefixed(store::SLASHED_SET, &[&store::u64_key(epoch_number)]);
        let removed = self.store.clear_prefix(&prefix);
        let power_key = store::prefixed(store::SLASHED_POWER, &[&store::u64_key(epoch_number)]);
        self.store.delete(&power_key);
        debug!(epoch = epoch_number, removed, "cleared slashed validator set");
    }
}
