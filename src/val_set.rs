//! Per-epoch validator set snapshots
//!
//! The bonded validator set and each validator's voting power are captured
//! once at the start of every epoch and are immutable for the epoch's
//! duration. Snapshots are retained historically so proofs and audits can
//! reference past epochs; the total voting power of each epoch is cached
//! separately to avoid re-summation.

use crate::error::{Error, Result};
use crate::store::{self, KvStore};
use crate::types::{Validator, ValidatorAddress, ValidatorSet, ADDRESS_LEN};
use tracing::{debug, info};

/// Stores and queries epoch-scoped validator set snapshots
#[derive(Clone)]
pub struct ValidatorSetRegistry {
    store: KvStore,
}

impl ValidatorSetRegistry {
    /// Create a registry over the shared store
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Snapshot the bonded validator set for an epoch
    ///
    /// Writes one entry per validator under the epoch's prefix and caches
    /// the power sum as the epoch's total voting power. The total is always
    /// written, even when the bonded set is empty.
    pub fn init_validator_set(&self, epoch_number: u64, bonded: &[Validator]) -> Result<()> {
        let mut total_power: i64 = 0;
        for val in bonded {
            let key = store::prefixed(
                store::VAL_SET,
                &[&store::u64_key(epoch_number), val.addr.as_bytes()],
            );
            let power_bytes = bincode::serialize(&val.power).map_err(Error::codec)?;
            self.store.set(key, power_bytes);
            total_power += val.power;
        }

        let total_key = store::prefixed(store::VOTING_POWER, &[&store::u64_key(epoch_number)]);
        let total_bytes = bincode::serialize(&total_power).map_err(Error::codec)?;
        self.store.set(total_key, total_bytes);

        info!(
            epoch = epoch_number,
            validators = bonded.len(),
            total_power,
            "snapshotted validator set"
        );
        Ok(())
    }

    /// The validator set snapshotted for an epoch, in canonical order
    /// (descending power, ties broken by ascending address)
    pub fn get_validator_set(&self, epoch_number: u64) -> Result<ValidatorSet> {
        let prefix = store::prefixed(store::VAL_SET, &[&store::u64_key(epoch_number)]);
        let mut vals = Vec::new();
        for (key, value) in self.store.prefix_scan(&prefix) {
            let addr_bytes = &key[prefix.len()..];
            let addr: [u8; ADDRESS_LEN] = addr_bytes
                .try_into()
                .map_err(|_| Error::Codec("validator snapshot key has invalid length".to_string()))?;
            let power: i64 = bincode::deserialize(&value).map_err(Error::codec)?;
            vals.push(Validator {
                addr: ValidatorAddress::new(addr),
                power,
            });
        }
        Ok(ValidatorSet::new_sorted(vals))
    }

    /// Voting power of one validator in an epoch's snapshot
    ///
    /// Returns [`Error::ValidatorNotFound`] when the validator was not part
    /// of that epoch's snapshot (e.g. it bonded later); callers treat this
    /// as zero weight, not a fault.
    pub fn get_validator_voting_power(
        &self,
        epoch_number: u64,
        addr: &ValidatorAddress,
    ) -> Result<i64> {
        let key = store::prefixed(
            store::VAL_SET,
            &[&store::u64_key(epoch_number), addr.as_bytes()],
        );
        let bytes = self.store.get(&key).ok_or_else(|| Error::ValidatorNotFound {
            epoch: epoch_number,
            validator: addr.to_string(),
        })?;
        bincode::deserialize(&bytes).map_err(Error::codec)
    }

    /// Total voting power of an epoch's snapshot
    ///
    /// Every reached epoch has a recorded total, possibly zero; a missing
    /// record is a corruption signal and panics.
    pub fn get_total_voting_power(&self, epoch_number: u64) -> i64 {
        let key = store::prefixed(store::VOTING_POWER, &[&store::u64_key(epoch_number)]);
        let bytes = self
            .store
            .get(&key)
            .unwrap_or_else(|| panic!("total voting power of epoch {} is not recorded", epoch_number));
        bincode::deserialize(&bytes)
            .unwrap_or_else(|err| panic!("total voting power of epoch {} is corrupt: {}", epoch_number, err))
    }

    /// Delete a historical snapshot and its cached total
    ///
    /// Invoked once the epoch's checkpoint can no longer be disputed;
    /// retention policy belongs to the host.
    pub fn clear_validator_set(&self, epoch_number: u64) {
        let prefix = store::prefixed(store::VAL_SET, &[&store::u64_key(epoch_number)]);
        let removed = self.store.clear_prefix(&prefix);
        let total_key = store::prefixed(store::VOTING_POWER, &[&store::u64_key(epoch_number)]);
        self.store.delete(&total_key);
        debug!(epoch = epoch_number, removed, "cleared validator set snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(seed: u8, power: i64) -> Validator {
        Validator {
            addr: ValidatorAddress::new([seed; ADDRESS_LEN]),
            power,
        }
    }

    #[test]
    fn test_snapshot_and_query() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        registry
            .init_validator_set(1, &[val(1, 100), val(2, 300), val(3, 200)])
            .unwrap();

        let set = registry.get_validator_set(1).unwrap();
        assert_eq!(set.len(), 3);
        let powers: Vec<i64> = set.validators().iter().map(|v| v.power).collect();
        assert_eq!(powers, vec![300, 200, 100]);

        assert_eq!(
            registry
                .get_validator_voting_power(1, &ValidatorAddress::new([2; ADDRESS_LEN]))
                .unwrap(),
            300
        );
        assert_eq!(registry.get_total_voting_power(1), 600);
    }

    #[test]
    fn test_power_conservation() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        let vals: Vec<Validator> = (1..=10u8).map(|i| val(i, i as i64 * 7)).collect();
        registry.init_validator_set(4, &vals).unwrap();

        let set = registry.get_validator_set(4).unwrap();
        let summed: i64 = set
            .validators()
            .iter()
            .map(|v| registry.get_validator_voting_power(4, &v.addr).unwrap())
            .sum();
        assert_eq!(summed, registry.get_total_voting_power(4));
    }

    #[test]
    fn test_missing_validator_is_typed_not_found() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        registry.init_validator_set(1, &[val(1, 10)]).unwrap();

        let err = registry
            .get_validator_voting_power(1, &ValidatorAddress::new([9; ADDRESS_LEN]))
            .unwrap_err();
        assert!(matches!(err, Error::ValidatorNotFound { epoch: 1, .. }));
    }

    #[test]
    fn test_historical_immutability_across_epochs() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        let ten: Vec<Validator> = (1..=10u8).map(|i| val(i, 50)).collect();
        registry.init_validator_set(1, &ten).unwrap();

        // one validator drops out before epoch 2
        let nine: Vec<Validator> = ten[1..].to_vec();
        registry.init_validator_set(2, &nine).unwrap();

        assert_eq!(registry.get_validator_set(1).unwrap().len(), 10);
        assert_eq!(registry.get_validator_set(2).unwrap().len(), 9);
    }

    #[test]
    fn test_empty_snapshot_records_zero_total() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        registry.init_validator_set(0, &[]).unwrap();
        assert_eq!(registry.get_total_voting_power(0), 0);
        assert!(registry.get_validator_set(0).unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "total voting power of epoch 7 is not recorded")]
    fn test_missing_total_power_panics() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        registry.get_total_voting_power(7);
    }

    #[test]
    fn test_clear_removes_snapshot() {
        let registry = ValidatorSetRegistry::new(KvStore::new());
        registry.init_validator_set(1, &[val(1, 10)]).unwrap();
        registry.clear_validator_set(1);
        assert!(registry.get_validator_set(1).unwrap().is_empty());
    }
}
