//! The epoch state machine
//!
//! [`EpochManager`] ties the pieces together and drives them from the two
//! per-block entry points the host calls:
//! - `begin_block` records the block digest and, on the first block of a
//!   new epoch, turns the epoch over: new metadata, fresh queue, fresh
//!   slashed set, and a validator set snapshot from the staking
//!   collaborator
//! - `end_block` detects the last block of the epoch, flushes the deferred
//!   message queue to the collaborator, and commits the epoch's last
//!   header and digest root
//!
//! Between boundaries the manager accepts deferred messages, reacts to
//! slashing evidence, records lifecycle transitions, and serves digest
//! inclusion proofs for ended epochs.

use crate::config::EpochingConfig;
use crate::digest_chain::DigestChain;
use crate::error::{Error, Result};
use crate::events::EpochingEvent;
use crate::hooks::{EpochingHooks, HookRegistry};
use crate::lifecycle::LifecycleRecorder;
use crate::merkle::{self, MerkleProof};
use crate::messages::{Coin, QueuedMessage, StakingMsg};
use crate::msg_queue::MsgQueue;
use crate::slashed_set::SlashedSetTracker;
use crate::staking::StakingAdapter;
use crate::store::{self, KvStore};
use crate::types::{
    BlockHeader, BondState, DelegatorAddress, Epoch, EpochState, ValidatorAddress,
};
use crate::val_set::ValidatorSetRegistry;
use tracing::{debug, info, warn};

/// Drives epoch turnover, message deferral, and boundary bookkeeping
pub struct EpochManager {
    config: EpochingConfig,

    store: KvStore,

    digests: DigestChain,

    msg_queue: MsgQueue,

    val_sets: ValidatorSetRegistry,

    slashed: SlashedSetTracker,

    lifecycle: LifecycleRecorder,

    hooks: HookRegistry,

    staking: Box<dyn StakingAdapter>,

    events: Vec<EpochingEvent>,

    current_height: u64,
}

impl EpochManager {
    /// Create a manager over a store and a staking collaborator
    ///
    /// Validates the configuration; [`Self::init_epoch`] must run before
    /// any block is processed.
    pub fn new(
        config: EpochingConfig,
        store: KvStore,
        staking: Box<dyn StakingAdapter>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            digests: DigestChain::new(store.clone()),
            msg_queue: MsgQueue::new(store.clone()),
            val_sets: ValidatorSetRegistry::new(store.clone()),
            slashed: SlashedSetTracker::new(store.clone()),
            lifecycle: LifecycleRecorder::new(store.clone()),
            store,
            hooks: HookRegistry::new(),
            staking,
            events: Vec::new(),
            current_height: 0,
        })
    }

    /// Register a subscriber for epoching notifications
    pub fn register_hooks(&mut self, hooks: Box<dyn EpochingHooks>) {
        self.hooks.register(hooks);
    }

    /// The active configuration
    pub fn config(&self) -> &EpochingConfig {
        &self.config
    }

    /// The message queue component, for direct queries
    pub fn msg_queue(&self) -> &MsgQueue {
        &self.msg_queue
    }

    /// The validator set registry, for direct queries
    pub fn validator_sets(&self) -> &ValidatorSetRegistry {
        &self.val_sets
    }

    /// The slashed set tracker, for direct queries
    pub fn slashed_sets(&self) -> &SlashedSetTracker {
        &self.slashed
    }

    /// The lifecycle recorder, for direct queries
    pub fn lifecycles(&self) -> &LifecycleRecorder {
        &self.lifecycle
    }

    /// Height of the block currently being processed
    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Drain the events accumulated since the last drain
    pub fn take_events(&mut self) -> Vec<EpochingEvent> {
        std::mem::take(&mut self.events)
    }

    /// Initialise epoch 0 at genesis
    ///
    /// Epoch 0 is a degenerate singleton covering only height 0. The
    /// genesis bonded set is snapshotted as its validator set. Panics when
    /// genesis has already run; re-initialising would fork state.
    pub fn init_epoch(&mut self, genesis_time: u64) -> Result<Epoch> {
        if self.store.contains(&[store::EPOCH_NUMBER]) {
            panic!("genesis has already been initialised");
        }
        let epoch = Epoch::new(0, self.config.epoch_interval, 0);
        self.set_epoch_number(0);
        self.put_epoch(&epoch)?;

        self.msg_queue.init_queue(0);
        self.slashed.init_slashed_set(0)?;
        let bonded = self.staking.bonded_validators();
        self.val_sets.init_validator_set(0, &bonded)?;
        self.lifecycle
            .record_new_epoch_state(0, EpochState::Started, 0, genesis_time)?;

        info!(
            interval = self.config.epoch_interval,
            validators = bonded.len(),
            "initialised genesis epoch"
        );
        Ok(epoch)
    }

    fn set_epoch_number(&self, epoch_number: u64) {
        self.store
            .set(vec![store::EPOCH_NUMBER], store::u64_key(epoch_number).to_vec());
    }

    fn put_epoch(&self, epoch: &Epoch) -> Result<()> {
        let key = store::prefixed(store::EPOCH_INFO, &[&store::u64_key(epoch.epoch_number)]);
        let bytes = bincode::serialize(epoch).map_err(Error::codec)?;
        self.store.set(key, bytes);
        Ok(())
    }

    /// The current epoch
    ///
    /// Panics when genesis has not been initialised; no block can be
    /// processed before epoch 0 exists.
    pub fn get_epoch(&self) -> Epoch {
        let bytes = self
            .store
            .get(&[store::EPOCH_NUMBER])
            .unwrap_or_else(|| panic!("current epoch number is not recorded, genesis has not run"));
        let number = store::u64_from_key(&bytes)
            .unwrap_or_else(|| panic!("current epoch number is corrupt"));
        self.historical_epoch(number)
            .unwrap_or_else(|err| panic!("current epoch {} is unreadable: {}", number, err))
    }

    /// Metadata of a reached epoch
    pub fn historical_epoch(&self, epoch_number: u64) -> Result<Epoch> {
        let key = store::prefixed(store::EPOCH_INFO, &[&store::u64_key(epoch_number)]);
        let bytes = self
            .store
            .get(&key)
            .ok_or(Error::UnknownEpoch(epoch_number))?;
        bincode::deserialize(&bytes).map_err(Error::codec)
    }

    fn inc_epoch(&mut self, header: &BlockHeader) -> Result<Epoch> {
        let current = self.get_epoch();
        let epoch = Epoch::new(
            current.epoch_number + 1,
            self.config.epoch_interval,
            header.height,
        );
        self.set_epoch_number(epoch.epoch_number);
        self.put_epoch(&epoch)?;
        info!(
            epoch = epoch.epoch_number,
            first_block = epoch.first_block_height,
            "entered new epoch"
        );
        Ok(epoch)
    }

    /// Accept a wrapped staking message into the current epoch's queue
    ///
    /// The message is validated against the collaborator's bond
    /// denomination and held until the epoch boundary; nothing about the
    /// validator set changes now. Returns the epoch the message landed in.
    pub fn enqueue_msg(&self, msg: QueuedMessage) -> Result<u64> {
        let coin = staking_coin(&msg.msg);
        let denom = self.staking.bond_denom();
        if coin.denom != denom {
            return Err(Error::InvalidMessage(format!(
                "denomination {} does not match the bond denomination {}",
                coin.denom, denom
            )));
        }
        let epoch = self.get_epoch();
        self.msg_queue.enqueue_msg(epoch.epoch_number, &msg)?;
        Ok(epoch.epoch_number)
    }

    /// Process the beginning of a block
    ///
    /// Records the block's digest; on the first block of a new epoch turns
    /// the epoch over, and on the second block of an epoch commits the
    /// sealer header of the previous epoch.
    pub fn begin_block(&mut self, header: &BlockHeader) -> Result<()> {
        self.current_height = header.height;
        self.digests.record_digest(header.height, header.app_hash);

        let epoch = self.get_epoch();
        if epoch.is_first_block_of_next_epoch(header.height) {
            let epoch = self.inc_epoch(header)?;
            self.msg_queue.init_queue(epoch.epoch_number);
            self.slashed.init_slashed_set(epoch.epoch_number)?;
            let bonded = self.staking.bonded_validators();
            self.val_sets
                .init_validator_set(epoch.epoch_number, &bonded)?;
            self.lifecycle.record_new_epoch_state(
                epoch.epoch_number,
                EpochState::Started,
                header.height,
                header.time,
            )?;
            self.hooks.after_epoch_begins(epoch.epoch_number);
            self.events.push(EpochingEvent::BeginEpoch {
                epoch_number: epoch.epoch_number,
            });
        }

        let epoch = self.get_epoch();
        if epoch.is_second_block(header.height) {
            self.record_sealer_header_for_prev_epoch(header)?;
        }
        Ok(())
    }

    /// Commit the sealer header of the previous epoch
    ///
    /// The validator set of an epoch signs a commitment derived from the
    /// second block of the following epoch. Panics when invoked off the
    /// second block; only the block flow may call this.
    pub fn record_sealer_header_for_prev_epoch(&self, header: &BlockHeader) -> Result<Epoch> {
        let epoch = self.get_epoch();
        if !epoch.is_second_block(header.height) {
            panic!(
                "height {} is not the second block of epoch {}",
                header.height, epoch.epoch_number
            );
        }
        let mut prev = self.historical_epoch(epoch.epoch_number - 1)?;
        prev.sealer_header = Some(header.clone());
        self.put_epoch(&prev)?;
        debug!(
            epoch = prev.epoch_number,
            height = header.height,
            "recorded sealer header"
        );
        Ok(prev)
    }

    /// Process the end of a block
    ///
    /// On the last block of the epoch: commits the epoch's last header and
    /// digest root, flushes the deferred queue to the staking collaborator
    /// in FIFO order, and clears the queue. A rejected message is logged,
    /// surfaced as an event, and dropped; an undecodable queue entry aborts
    /// the flush with an error because silently skipping it would diverge
    /// nodes that can still decode it.
    pub fn end_block(&mut self, header: &BlockHeader) -> Result<()> {
        let epoch = self.get_epoch();
        if !epoch.is_last_block(header.height) {
            return Ok(());
        }

        self.record_last_header_and_digest_root(header)?;
        self.flush_msg_queue(&epoch, header)?;
        self.msg_queue.clear_epoch_msgs(epoch.epoch_number)?;
        self.lifecycle.record_new_epoch_state(
            epoch.epoch_number,
            EpochState::Ended,
            header.height,
            header.time,
        )?;
        self.hooks.after_epoch_ends(epoch.epoch_number);
        self.events.push(EpochingEvent::EndEpoch {
            epoch_number: epoch.epoch_number,
        });
        Ok(())
    }

    fn flush_msg_queue(&mut self, epoch: &Epoch, header: &BlockHeader) -> Result<()> {
        let msgs = self.msg_queue.get_epoch_msgs(epoch.epoch_number)?;
        info!(
            epoch = epoch.epoch_number,
            msgs = msgs.len(),
            "flushing deferred message queue"
        );
        for queued in msgs {
            if let Err(err) = self.forward_msg(&queued.msg, header) {
                warn!(
                    epoch = epoch.epoch_number,
                    kind = queued.msg.kind(),
                    msg_id = %hex::encode(&queued.msg_id),
                    %err,
                    "deferred message rejected, dropping"
                );
                self.events.push(EpochingEvent::HandleQueuedMsgFailure {
                    epoch_number: epoch.epoch_number,
                    height: queued.block_height,
                    tx_id: queued.tx_id,
                    msg_id: queued.msg_id,
                    error: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Forward one deferred message and record the resulting lifecycle
    /// transitions
    fn forward_msg(&mut self, msg: &StakingMsg, header: &BlockHeader) -> Result<()> {
        match msg {
            StakingMsg::CreateValidator(m) => {
                self.staking.forward_create_validator(m)?;
                self.lifecycle.record_new_val_state(
                    &m.validator_addr,
                    BondState::Created,
                    header.height,
                    header.time,
                )?;
                self.lifecycle.record_new_val_state(
                    &m.validator_addr,
                    BondState::Bonded,
                    header.height,
                    header.time,
                )?;
            }
            StakingMsg::Delegate(m) => {
                self.staking.forward_delegate(m)?;
                self.lifecycle.record_new_delegation_state(
                    &m.delegator_addr,
                    &m.validator_addr,
                    Some(m.amount.amount),
                    BondState::Created,
                    header.height,
                    header.time,
                )?;
                self.lifecycle.record_new_delegation_state(
                    &m.delegator_addr,
                    &m.validator_addr,
                    Some(m.amount.amount),
                    BondState::Bonded,
                    header.height,
                    header.time,
                )?;
            }
            StakingMsg::Undelegate(m) => {
                self.staking.forward_undelegate(m)?;
                self.lifecycle.record_new_delegation_state(
                    &m.delegator_addr,
                    &m.validator_addr,
                    Some(m.amount.amount),
                    BondState::Unbonding,
                    header.height,
                    header.time,
                )?;
            }
            StakingMsg::BeginRedelegate(m) => {
                self.staking.forward_begin_redelegate(m)?;
                self.lifecycle.record_new_delegation_state(
                    &m.delegator_addr,
                    &m.validator_src_addr,
                    Some(m.amount.amount),
                    BondState::Unbonding,
                    header.height,
                    header.time,
                )?;
            }
        }
        Ok(())
    }

    /// Commit the current epoch's last header and digest root
    ///
    /// Errors when invoked off the epoch's last block; the root covers the
    /// digests of every block in the epoch, in height order.
    pub fn record_last_header_and_digest_root(&self, header: &BlockHeader) -> Result<()> {
        let mut epoch = self.get_epoch();
        if !epoch.is_last_block(header.height) {
            return Err(Error::InvalidHeight(format!(
                "height {} is not the last block of epoch {}",
                header.height, epoch.epoch_number
            )));
        }
        let leaves = self
            .digests
            .digests_in_range(epoch.first_block_height, header.height)?;
        epoch.last_block_header = Some(header.clone());
        epoch.digest_root = Some(merkle::root_from_leaves(&leaves));
        self.put_epoch(&epoch)?;
        debug!(
            epoch = epoch.epoch_number,
            height = header.height,
            "recorded last header and digest root"
        );
        Ok(())
    }

    /// React to slashing evidence against a validator
    ///
    /// Adds the validator to the current epoch's slashed set using its
    /// snapshot power. When the addition crosses a configured threshold,
    /// subscribers are notified before the event is emitted. Evidence
    /// against a validator outside the snapshot surfaces as
    /// [`Error::ValidatorNotFound`].
    pub fn handle_validator_slashed(&mut self, addr: &ValidatorAddress) -> Result<()> {
        let epoch = self.get_epoch();
        let total = self.val_sets.get_total_voting_power(epoch.epoch_number);
        let power = self
            .val_sets
            .get_validator_voting_power(epoch.epoch_number, addr)?;

        let outcome = self.slashed.add_slashed_validator(
            epoch.epoch_number,
            crate::types::Validator { addr: *addr, power },
            total,
            &self.config.slash_thresholds,
        )?;

        for threshold in outcome.crossed {
            let slashed_validators = self.slashed.get_slashed_validators(epoch.epoch_number)?;
            self.hooks
                .before_slash_threshold(epoch.epoch_number, &slashed_validators);
            self.events.push(EpochingEvent::SlashThreshold {
                threshold,
                slashed_voting_power: outcome.slashed_voting_power,
                total_voting_power: total,
                slashed_validators,
            });
        }
        Ok(())
    }

    /// Record a validator bonding-state transition and notify subscribers
    pub fn on_validator_state_change(
        &self,
        addr: &ValidatorAddress,
        state: BondState,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle
            .record_new_val_state(addr, state, block_height, block_time)?;
        self.hooks.after_validator_state_change(addr, state)
    }

    /// Record a delegation bonding-state transition and notify subscribers
    pub fn on_delegation_state_change(
        &self,
        del_addr: &DelegatorAddress,
        val_addr: &ValidatorAddress,
        amount: Option<u64>,
        state: BondState,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle.record_new_delegation_state(
            del_addr, val_addr, amount, state, block_height, block_time,
        )?;
        self.hooks
            .after_delegation_state_change(del_addr, val_addr, state)
    }

    /// Record that the checkpoint over an epoch was sealed
    pub fn on_raw_checkpoint_sealed(
        &self,
        epoch_number: u64,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle
            .record_new_epoch_state(epoch_number, EpochState::Sealed, block_height, block_time)?;
        self.hooks.after_raw_checkpoint_sealed(epoch_number)
    }

    /// Record that the checkpoint over an epoch was submitted
    pub fn on_raw_checkpoint_submitted(
        &self,
        epoch_number: u64,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle.record_new_epoch_state(
            epoch_number,
            EpochState::Submitted,
            block_height,
            block_time,
        )?;
        self.hooks.after_raw_checkpoint_submitted(epoch_number)
    }

    /// Record that the checkpoint over an epoch was confirmed
    pub fn on_raw_checkpoint_confirmed(
        &self,
        epoch_number: u64,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle.record_new_epoch_state(
            epoch_number,
            EpochState::Confirmed,
            block_height,
            block_time,
        )?;
        self.hooks.after_raw_checkpoint_confirmed(epoch_number)
    }

    /// Record that the checkpoint over an epoch was finalized
    ///
    /// Historical snapshots of the epoch stay in place; the host decides
    /// when, if ever, to call the clearers.
    pub fn on_raw_checkpoint_finalized(
        &self,
        epoch_number: u64,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle.record_new_epoch_state(
            epoch_number,
            EpochState::Finalized,
            block_height,
            block_time,
        )?;
        self.hooks.after_raw_checkpoint_finalized(epoch_number)
    }

    /// Record that the checkpoint over an epoch was abandoned
    pub fn on_raw_checkpoint_forgotten(
        &self,
        epoch_number: u64,
        block_height: u64,
        block_time: u64,
    ) -> Result<()> {
        self.lifecycle.record_new_epoch_state(
            epoch_number,
            EpochState::Forgotten,
            block_height,
            block_time,
        )?;
        self.hooks.after_raw_checkpoint_forgotten(epoch_number)
    }

    /// The ordered digests of every block in an ended epoch
    ///
    /// Errors while the epoch is still in progress; its digest list is not
    /// final until the last block has been processed.
    pub fn all_digests_for_epoch(&self, epoch_number: u64) -> Result<Vec<Vec<u8>>> {
        let epoch = self.historical_epoch(epoch_number)?;
        let current = self.get_epoch();
        if epoch.epoch_number == current.epoch_number
            && !epoch.is_last_block(self.current_height)
        {
            return Err(Error::InvalidHeight(format!(
                "epoch {} has not ended yet",
                epoch_number
            )));
        }
        self.digests
            .digests_in_range(epoch.first_block_height, epoch.last_block_height())
    }

    /// An inclusion proof for one block's digest under its epoch's root
    pub fn prove_digest_in_epoch(&self, height: u64, epoch_number: u64) -> Result<MerkleProof> {
        let epoch = self.historical_epoch(epoch_number)?;
        if !epoch.within_boundary(height) {
            return Err(Error::InvalidHeight(format!(
                "height {} is outside epoch {}",
                height, epoch_number
            )));
        }
        let leaves = self.all_digests_for_epoch(epoch_number)?;
        let index = (height - epoch.first_block_height) as usize;
        let (_, mut proofs) = merkle::proofs_from_leaves(&leaves);
        Ok(proofs.swap_remove(index))
    }
}

fn staking_coin(msg: &StakingMsg) -> &Coin {
    match msg {
        StakingMsg::CreateValidator(m) => &m.value,
        StakingMsg::Delegate(m) => &m.amount,
        StakingMsg::Undelegate(m) => &m.amount,
        StakingMsg::BeginRedelegate(m) => &m.amount,
    }
}
