//! Epoching configuration
//!
//! Configuration is an explicit object handed to the epoch state machine's
//! constructor; there is no module-level mutable state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of blocks per epoch
pub const DEFAULT_EPOCH_INTERVAL: u64 = 10;

/// A fractional voting-power threshold, compared exactly with integer
/// cross-multiplication so every node reaches the same verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashThreshold {
    /// Threshold numerator
    pub numerator: u32,

    /// Threshold denominator
    pub denominator: u32,
}

impl SlashThreshold {
    /// Create a threshold `numerator / denominator`
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Whether adding `delta` to `current` crosses this fraction of `total`
    ///
    /// True only when `current` is strictly below the threshold and
    /// `current + delta` is at or above it, so a given crossing can fire at
    /// most once while the accumulated value is monotone.
    pub fn crossed(&self, current: i64, delta: i64, total: i64) -> bool {
        let num = self.numerator as i128;
        let den = self.denominator as i128;
        let bar = total as i128 * num;
        (current as i128) * den < bar && (current as i128 + delta as i128) * den >= bar
    }
}

impl fmt::Display for SlashThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Configuration for the epoch state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochingConfig {
    /// Number of blocks per epoch
    pub epoch_interval: u64,

    /// Slashed-voting-power thresholds to watch, evaluated independently
    pub slash_thresholds: Vec<SlashThreshold>,
}

impl EpochingConfig {
    /// Create a config with the given interval and the canonical 1/3 and
    /// 2/3 thresholds
    pub fn new(epoch_interval: u64) -> Self {
        Self {
            epoch_interval,
            slash_thresholds: vec![SlashThreshold::new(1, 3), SlashThreshold::new(2, 3)],
        }
    }

    /// Validate the configuration
    ///
    /// An interval of 1 is allowed, but such epochs have no second block
    /// and therefore never receive a sealer header; hosts that checkpoint
    /// need an interval of at least 2.
    pub fn validate(&self) -> Result<()> {
        if self.epoch_interval == 0 {
            return Err(Error::InvalidConfig(
                "epoch interval must be at least 1".to_string(),
            ));
        }
        for threshold in &self.slash_thresholds {
            if threshold.denominator == 0 {
                return Err(Error::InvalidConfig(format!(
                    "threshold {} has a zero denominator",
                    threshold
                )));
            }
            if threshold.numerator > threshold.denominator {
                return Err(Error::InvalidConfig(format!(
                    "threshold {} is above one",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

impl Default for EpochingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_INTERVAL)
    }
}
