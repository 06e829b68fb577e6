//! # Epoching
//!
//! Epoch-based validator set management for a checkpointing chain.
//!
//! This crate implements:
//! - Epoch turnover on a fixed block interval, with per-epoch metadata
//! - Deferral of validator-set-affecting messages to the epoch boundary
//! - Per-epoch validator set snapshots with historical retention
//! - Slashed voting power tracking with 1/3 and 2/3 threshold detection
//! - Per-block digest chain, epoch digest roots, and inclusion proofs
//! - Lifecycle histories for validators, delegations, and epochs

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod digest_chain;
pub mod error;
pub mod events;
pub mod hooks;
pub mod lifecycle;
pub mod manager;
pub mod merkle;
pub mod messages;
pub mod msg_queue;
pub mod query;
pub mod slashed_set;
pub mod staking;
pub mod store;
pub mod types;
pub mod val_set;

pub use config::{EpochingConfig, SlashThreshold, DEFAULT_EPOCH_INTERVAL};
pub use error::{Error, Result};
pub use events::EpochingEvent;
pub use hooks::{EpochingHooks, HookRegistry};
pub use manager::EpochManager;
pub use merkle::{verify_digest_inclusion, MerkleProof};
pub use messages::{QueuedMessage, StakingMsg};
pub use query::{CurrentEpochResponse, PageRequest, PageResponse};
pub use staking::{InMemoryStaking, StakingAdapter};
pub use store::KvStore;
pub use types::{BlockHeader, BondState, Epoch, EpochState, Validator, ValidatorSet};
