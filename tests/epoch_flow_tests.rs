//! End-to-end tests of the epoch flow
//!
//! Drives the manager block by block through multiple epochs and checks the
//! externally observable behaviour: epoch turnover, boundary bookkeeping,
//! queue deferral and flushing, snapshot immutability, slashing thresholds,
//! inclusion proofs, and hook dispatch.

use epoching::config::EpochingConfig;
use epoching::manager::EpochManager;
use epoching::merkle;
use epoching::messages::{Coin, MsgBeginRedelegate, MsgDelegate, MsgUndelegate, QueuedMessage, StakingMsg};
use epoching::query::PageRequest;
use epoching::staking::{InMemoryStaking, StakingAdapter};
use epoching::store::KvStore;
use epoching::types::{BlockHeader, DelegatorAddress, ValidatorAddress, ADDRESS_LEN, DIGEST_LEN};
use epoching::{EpochingEvent, EpochingHooks, Error};
use parking_lot::Mutex;
use std::sync::Arc;

fn val_addr(seed: u8) -> ValidatorAddress {
    ValidatorAddress::new([seed; ADDRESS_LEN])
}

fn del_addr(seed: u8) -> DelegatorAddress {
    DelegatorAddress::new([seed; ADDRESS_LEN])
}

fn header(height: u64) -> BlockHeader {
    let mut app_hash = [0u8; DIGEST_LEN];
    app_hash[..8].copy_from_slice(&height.to_be_bytes());
    let mut block_hash = [0xabu8; DIGEST_LEN];
    block_hash[..8].copy_from_slice(&height.to_be_bytes());
    BlockHeader {
        height,
        time: 1_700_000_000 + height,
        app_hash,
        block_hash,
    }
}

fn seeded_staking(vals: &[(u8, i64)]) -> InMemoryStaking {
    let mut staking = InMemoryStaking::new("stake");
    for (seed, power) in vals {
        staking.bond(val_addr(*seed), *power);
    }
    staking
}

fn manager_with(interval: u64, staking: Box<dyn StakingAdapter>) -> EpochManager {
    let mut mgr = EpochManager::new(EpochingConfig::new(interval), KvStore::new(), staking).unwrap();
    mgr.init_epoch(1_700_000_000).unwrap();
    mgr
}

fn manager(interval: u64, vals: &[(u8, i64)]) -> EpochManager {
    manager_with(interval, Box::new(seeded_staking(vals)))
}

fn run_blocks(mgr: &mut EpochManager, from: u64, to: u64) {
    for height in from..=to {
        let h = header(height);
        mgr.begin_block(&h).unwrap();
        mgr.end_block(&h).unwrap();
    }
}

fn delegate(del: u8, to: u8, amount: u64) -> QueuedMessage {
    QueuedMessage::new(
        1,
        10,
        vec![del],
        StakingMsg::Delegate(MsgDelegate {
            delegator_addr: del_addr(del),
            validator_addr: val_addr(to),
            amount: Coin::new("stake", amount),
        }),
    )
    .unwrap()
}

fn undelegate(del: u8, from: u8, amount: u64) -> QueuedMessage {
    QueuedMessage::new(
        1,
        10,
        vec![del],
        StakingMsg::Undelegate(MsgUndelegate {
            delegator_addr: del_addr(del),
            validator_addr: val_addr(from),
            amount: Coin::new("stake", amount),
        }),
    )
    .unwrap()
}

/// A staking adapter that logs every forwarded message kind
struct Probe {
    inner: InMemoryStaking,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl StakingAdapter for Probe {
    fn bonded_validators(&self) -> Vec<epoching::Validator> {
        self.inner.bonded_validators()
    }

    fn bond_denom(&self) -> String {
        self.inner.bond_denom()
    }

    fn forward_create_validator(&mut self, msg: &epoching::messages::MsgCreateValidator) -> epoching::Result<()> {
        self.inner.forward_create_validator(msg)?;
        self.log.lock().push("create_validator");
        Ok(())
    }

    fn forward_delegate(&mut self, msg: &MsgDelegate) -> epoching::Result<()> {
        self.inner.forward_delegate(msg)?;
        self.log.lock().push("delegate");
        Ok(())
    }

    fn forward_undelegate(&mut self, msg: &MsgUndelegate) -> epoching::Result<()> {
        self.inner.forward_undelegate(msg)?;
        self.log.lock().push("undelegate");
        Ok(())
    }

    fn forward_begin_redelegate(&mut self, msg: &MsgBeginRedelegate) -> epoching::Result<()> {
        self.inner.forward_begin_redelegate(msg)?;
        self.log.lock().push("begin_redelegate");
        Ok(())
    }
}

/// A hook that records every notification it receives, in order
struct RecordingHooks {
    log: Arc<Mutex<Vec<String>>>,
}

impl EpochingHooks for RecordingHooks {
    fn after_epoch_begins(&self, epoch_number: u64) {
        self.log.lock().push(format!("begins:{}", epoch_number));
    }

    fn after_epoch_ends(&self, epoch_number: u64) {
        self.log.lock().push(format!("ends:{}", epoch_number));
    }

    fn before_slash_threshold(&self, epoch_number: u64, slashed: &[epoching::Validator]) {
        self.log
            .lock()
            .push(format!("threshold:{}:{}", epoch_number, slashed.len()));
    }

    fn after_raw_checkpoint_finalized(&self, epoch_number: u64) -> epoching::Result<()> {
        self.log.lock().push(format!("finalized:{}", epoch_number));
        Ok(())
    }
}

#[test]
fn test_epoch_count_matches_interval_arithmetic() {
    // after N blocks the chain is in epoch ceil(N / interval)
    for interval in [1u64, 2, 3, 5, 10] {
        let mut mgr = manager(interval, &[(1, 100)]);
        for height in 1..=23u64 {
            run_blocks(&mut mgr, height, height);
            let expected = height.div_ceil(interval);
            assert_eq!(
                mgr.get_epoch().epoch_number,
                expected,
                "height {} interval {}",
                height,
                interval
            );
        }
    }
}

#[test]
fn test_epoch_boundaries_reported_by_query() {
    let mut mgr = manager(10, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 9);

    let epoch = mgr.get_epoch();
    assert_eq!(epoch.epoch_number, 1);
    assert_eq!(epoch.first_block_height, 1);
    assert!(!epoch.is_last_block(9));

    run_blocks(&mut mgr, 10, 10);
    // last header and digest root are committed at the boundary
    let sealed = mgr.historical_epoch(1).unwrap();
    assert_eq!(sealed.last_block_header.unwrap().height, 10);
    assert!(sealed.digest_root.is_some());
    assert_eq!(mgr.query_current_epoch().epoch_boundary, 10);
}

#[test]
fn test_queue_deferral_and_fifo_flush() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let probe = Probe {
        inner: seeded_staking(&[(1, 100), (2, 50)]),
        log: log.clone(),
    };
    let mut mgr = manager_with(5, Box::new(probe));

    // epoch 1: queue a delegate then an undelegate
    run_blocks(&mut mgr, 1, 2);
    mgr.enqueue_msg(delegate(9, 1, 30)).unwrap();
    mgr.enqueue_msg(undelegate(9, 2, 50)).unwrap();

    // nothing is forwarded mid-epoch
    run_blocks(&mut mgr, 3, 4);
    assert!(log.lock().is_empty());
    assert_eq!(mgr.validator_sets().get_total_voting_power(1), 150);

    // boundary forwards in insertion order, next epoch sees the effects
    run_blocks(&mut mgr, 5, 6);
    assert_eq!(*log.lock(), vec!["delegate", "undelegate"]);
    assert_eq!(mgr.msg_queue().queue_length(1), 0);
    assert_eq!(mgr.validator_sets().get_total_voting_power(2), 130);
    assert_eq!(mgr.validator_sets().get_validator_set(2).unwrap().len(), 1);
}

#[test]
fn test_historical_snapshots_are_immutable() {
    let mut mgr = manager(5, &[(1, 50), (2, 50), (3, 50), (4, 50), (5, 50), (6, 50), (7, 50), (8, 50), (9, 50), (10, 50)]);
    run_blocks(&mut mgr, 1, 1);
    assert_eq!(mgr.validator_sets().get_validator_set(1).unwrap().len(), 10);

    // one validator fully unbonds during epoch 1
    mgr.enqueue_msg(undelegate(9, 10, 50)).unwrap();
    run_blocks(&mut mgr, 2, 6);

    assert_eq!(mgr.validator_sets().get_validator_set(2).unwrap().len(), 9);
    // epoch 1's snapshot still has all ten
    assert_eq!(mgr.validator_sets().get_validator_set(1).unwrap().len(), 10);
    assert_eq!(mgr.validator_sets().get_total_voting_power(1), 500);
}

#[test]
fn test_rejected_message_does_not_abort_flush() {
    let mut mgr = manager(4, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 1);

    mgr.enqueue_msg(delegate(7, 3, 10)).unwrap(); // unknown validator
    mgr.enqueue_msg(delegate(8, 1, 20)).unwrap();
    run_blocks(&mut mgr, 2, 5);

    let events = mgr.take_events();
    let failures: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, EpochingEvent::HandleQueuedMsgFailure { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(mgr.validator_sets().get_total_voting_power(2), 120);
}

#[test]
fn test_corrupt_queue_entry_fails_end_block() {
    let store = KvStore::new();
    let mut mgr = EpochManager::new(
        EpochingConfig::new(3),
        store.clone(),
        Box::new(seeded_staking(&[(1, 100)])),
    )
    .unwrap();
    mgr.init_epoch(0).unwrap();
    run_blocks(&mut mgr, 1, 2);

    // plant bytes that do not decode as a queued message
    let key = epoching::store::prefixed(
        epoching::store::MSG_QUEUE,
        &[&epoching::store::u64_key(1), &epoching::store::u64_key(0)],
    );
    store.set(key, vec![0xde, 0xad]);

    let h = header(3);
    mgr.begin_block(&h).unwrap();
    assert!(matches!(mgr.end_block(&h), Err(Error::Codec(_))));
}

#[test]
fn test_slash_thresholds_fire_at_most_once_per_epoch() {
    let mut mgr = manager(10, &[(1, 30), (2, 30), (3, 30)]);
    run_blocks(&mut mgr, 1, 1);

    // 30 of 90 reaches 1/3 exactly
    mgr.handle_validator_slashed(&val_addr(1)).unwrap();
    // 60 of 90 reaches 2/3 exactly
    mgr.handle_validator_slashed(&val_addr(2)).unwrap();
    // nothing left to cross
    mgr.handle_validator_slashed(&val_addr(3)).unwrap();

    let crossings: Vec<_> = mgr
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            EpochingEvent::SlashThreshold { threshold, .. } => Some(threshold),
            _ => None,
        })
        .collect();
    assert_eq!(
        crossings,
        vec![
            epoching::SlashThreshold::new(1, 3),
            epoching::SlashThreshold::new(2, 3),
        ]
    );
}

#[test]
fn test_double_slash_is_deduplicated() {
    let mut mgr = manager(10, &[(1, 40), (2, 50)]);
    run_blocks(&mut mgr, 1, 1);

    mgr.handle_validator_slashed(&val_addr(1)).unwrap();
    mgr.handle_validator_slashed(&val_addr(1)).unwrap();

    assert_eq!(mgr.slashed_sets().get_slashed_voting_power(1), 40);
    assert_eq!(mgr.slashed_sets().get_slashed_validators(1).unwrap().len(), 1);
}

#[test]
fn test_slashed_set_resets_on_epoch_turn() {
    let mut mgr = manager(3, &[(1, 40), (2, 50)]);
    run_blocks(&mut mgr, 1, 1);
    mgr.handle_validator_slashed(&val_addr(1)).unwrap();
    assert_eq!(mgr.slashed_sets().get_slashed_voting_power(1), 40);

    run_blocks(&mut mgr, 2, 4);
    assert_eq!(mgr.get_epoch().epoch_number, 2);
    assert_eq!(mgr.slashed_sets().get_slashed_voting_power(2), 0);
}

#[test]
fn test_digest_proofs_verify_against_committed_root() {
    let mut mgr = manager(7, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 9);

    let epoch1 = mgr.historical_epoch(1).unwrap();
    let root = epoch1.digest_root.unwrap();
    for height in 1..=7u64 {
        let proof = mgr.prove_digest_in_epoch(height, 1).unwrap();
        merkle::verify_digest_inclusion(&header(height).app_hash, &root, &proof).unwrap();
        // a proof for one height does not verify another height's digest
        if height > 1 {
            assert!(merkle::verify_digest_inclusion(&header(height - 1).app_hash, &root, &proof).is_err());
        }
    }
}

#[test]
fn test_proofs_unavailable_for_running_epoch() {
    let mut mgr = manager(7, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 9);

    // epoch 2 runs through height 14
    assert!(matches!(
        mgr.prove_digest_in_epoch(8, 2),
        Err(Error::InvalidHeight(_))
    ));
    assert!(matches!(
        mgr.all_digests_for_epoch(2),
        Err(Error::InvalidHeight(_))
    ));
}

#[test]
fn test_sealer_header_is_second_block_of_next_epoch() {
    let mut mgr = manager(4, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 10);

    for epoch_number in [1u64, 2] {
        let epoch = mgr.historical_epoch(epoch_number).unwrap();
        let next_second = epoch.last_block_height() + 2;
        assert_eq!(
            epoch.sealer_header.as_ref().map(|h| h.height),
            Some(next_second)
        );
    }
    // the current epoch's sealer does not exist yet
    let epoch3 = mgr.historical_epoch(3).unwrap();
    assert!(epoch3.sealer_header.is_none());
}

#[test]
fn test_hooks_follow_block_flow_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mgr = manager(3, &[(1, 30), (2, 60)]);
    mgr.register_hooks(Box::new(RecordingHooks { log: log.clone() }));

    run_blocks(&mut mgr, 1, 4);
    mgr.handle_validator_slashed(&val_addr(1)).unwrap();
    mgr.on_raw_checkpoint_finalized(1, 5, 50).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "begins:1".to_string(),
            "ends:1".to_string(),
            "begins:2".to_string(),
            "threshold:2:1".to_string(),
            "finalized:1".to_string(),
        ]
    );
}

#[test]
fn test_lifecycles_recorded_through_queue_flush() {
    let mut mgr = manager(3, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 1);
    mgr.enqueue_msg(delegate(9, 1, 25)).unwrap();
    run_blocks(&mut mgr, 2, 3);

    let (updates, meta) = mgr
        .query_delegation_lifecycle(&del_addr(9), PageRequest::all())
        .unwrap();
    assert_eq!(meta.total, 2);
    let states: Vec<_> = updates.iter().map(|u| u.state).collect();
    assert_eq!(
        states,
        vec![epoching::BondState::Created, epoching::BondState::Bonded]
    );
    // recorded at the boundary height, not at submission height
    assert_eq!(updates[0].block_height, 3);
}

#[test]
fn test_interval_one_still_defers_by_one_epoch() {
    let mut mgr = manager(1, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 1);
    assert_eq!(mgr.get_epoch().epoch_number, 1);

    // enqueue during epoch 2, applied at its (only) block's end
    let h = header(2);
    mgr.begin_block(&h).unwrap();
    mgr.enqueue_msg(delegate(9, 1, 10)).unwrap();
    mgr.end_block(&h).unwrap();

    run_blocks(&mut mgr, 3, 3);
    assert_eq!(mgr.validator_sets().get_total_voting_power(3), 110);

    // single-block epochs have no second block, so no epoch ever gets a
    // sealer header; checkpointing hosts need an interval of at least 2
    for epoch_number in 0..=2u64 {
        let epoch = mgr.historical_epoch(epoch_number).unwrap();
        assert!(epoch.sealer_header.is_none());
    }
}

#[test]
fn test_ended_epoch_queue_queries_empty() {
    let mut mgr = manager(3, &[(1, 100)]);
    run_blocks(&mut mgr, 1, 1);
    mgr.enqueue_msg(delegate(9, 1, 10)).unwrap();
    run_blocks(&mut mgr, 2, 4);

    let (msgs, meta) = mgr.query_epoch_msgs(1, PageRequest::all()).unwrap();
    assert!(msgs.is_empty());
    assert_eq!(meta.total, 0);
}
