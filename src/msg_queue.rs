//! Deferred message queue
//!
//! Validator-set-affecting messages received during an epoch are held here
//! until the epoch boundary. Ordering is insertion order, represented by a
//! monotonically increasing per-epoch sequence counter used as the store
//! key suffix, so a prefix scan yields FIFO order.

use crate::error::{Error, Result};
use crate::messages::QueuedMessage;
use crate::store::{self, KvStore};
use tracing::{debug, info};

/// Per-epoch FIFO queue of deferred staking messages
#[derive(Clone)]
pub struct MsgQueue {
    store: KvStore,
}

impl MsgQueue {
    /// Create a message queue over the shared store
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Initialise the queue length of an epoch to 0
    ///
    /// Called at the first block of every epoch.
    pub fn init_queue(&self, epoch_number: u64) {
        let key = store::prefixed(store::QUEUE_LEN, &[&store::u64_key(epoch_number)]);
        self.store.set(key, store::u64_key(0).to_vec());
    }

    /// Number of queued messages in an epoch
    ///
    /// Returns 0 for epochs the chain has not reached yet. A recorded
    /// counter that fails to decode is a corruption signal and panics;
    /// treating it as 0 would reuse sequence numbers and overwrite queued
    /// messages.
    pub fn queue_length(&self, epoch_number: u64) -> u64 {
        let key = store::prefixed(store::QUEUE_LEN, &[&store::u64_key(epoch_number)]);
        match self.store.get(&key) {
            Some(bytes) => store::u64_from_key(&bytes).unwrap_or_else(|| {
                panic!("queue length of epoch {} is corrupt", epoch_number)
            }),
            None => 0,
        }
    }

    /// Append a message at the tail of an epoch's queue
    ///
    /// No deduplication: re-submitting an identical message stores a
    /// distinct entry.
    pub fn enqueue_msg(&self, epoch_number: u64, msg: &QueuedMessage) -> Result<()> {
        let seq = self.queue_length(epoch_number);
        let key = store::prefixed(
            store::MSG_QUEUE,
            &[&store::u64_key(epoch_number), &store::u64_key(seq)],
        );
        let bytes = bincode::serialize(msg).map_err(Error::codec)?;
        self.store.set(key, bytes);

        let len_key = store::prefixed(store::QUEUE_LEN, &[&store::u64_key(epoch_number)]);
        self.store.set(len_key, store::u64_key(seq + 1).to_vec());

        debug!(
            epoch = epoch_number,
            seq,
            kind = msg.msg.kind(),
            "enqueued deferred message"
        );
        Ok(())
    }

    /// All messages queued in an epoch, in insertion order
    pub fn get_epoch_msgs(&self, epoch_number: u64) -> Result<Vec<QueuedMessage>> {
        let prefix = store::prefixed(store::MSG_QUEUE, &[&store::u64_key(epoch_number)]);
        let mut msgs = Vec::new();
        for (_, value) in self.store.prefix_scan(&prefix) {
            let msg: QueuedMessage = bincode::deserialize(&value).map_err(Error::codec)?;
            msgs.push(msg);
        }
        Ok(msgs)
    }

    /// Delete every queued message of an epoch and reset its length to 0
    ///
    /// Must run after the messages have been forwarded; the epoch-end flow
    /// processes first, then clears.
    pub fn clear_epoch_msgs(&self, epoch_number: u64) -> Result<()> {
        let prefix = store::prefixed(store::MSG_QUEUE, &[&store::u64_key(epoch_number)]);
        let removed = self.store.clear_prefix(&prefix);
        let len_key = store::prefixed(store::QUEUE_LEN, &[&store::u64_key(epoch_number)]);
        self.store.set(len_key, store::u64_key(0).to_vec());
        info!(epoch = epoch_number, removed, "cleared epoch message queue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Coin, MsgDelegate, MsgUndelegate, StakingMsg};
    use crate::types::{DelegatorAddress, ValidatorAddress, ADDRESS_LEN};

    fn queued(seed: u8, kind: u8) -> QueuedMessage {
        let msg = match kind {
            0 => StakingMsg::Delegate(MsgDelegate {
                delegator_addr: DelegatorAddress::new([seed; ADDRESS_LEN]),
                validator_addr: ValidatorAddress::new([seed; ADDRESS_LEN]),
                amount: Coin::new("stake", seed as u64),
            }),
            _ => StakingMsg::Undelegate(MsgUndelegate {
                delegator_addr: DelegatorAddress::new([seed; ADDRESS_LEN]),
                validator_addr: ValidatorAddress::new([seed; ADDRESS_LEN]),
                amount: Coin::new("stake", seed as u64),
            }),
        };
        QueuedMessage::new(1, 100, vec![seed], msg).unwrap()
    }

    #[test]
    fn test_fifo_order_across_variants() {
        let queue = MsgQueue::new(KvStore::new());
        queue.init_queue(1);

        let msgs: Vec<QueuedMessage> = (0..10u8).map(|i| queued(i, i % 2)).collect();
        for msg in &msgs {
            queue.enqueue_msg(1, msg).unwrap();
        }

        assert_eq!(queue.queue_length(1), 10);
        let stored = queue.get_epoch_msgs(1).unwrap();
        assert_eq!(stored, msgs);
    }

    #[test]
    fn test_enqueue_then_clear_round_trip() {
        let queue = MsgQueue::new(KvStore::new());
        queue.init_queue(2);
        for k in 0..5u8 {
            queue.enqueue_msg(2, &queued(k, 0)).unwrap();
        }

        queue.clear_epoch_msgs(2).unwrap();
        assert_eq!(queue.queue_length(2), 0);
        assert!(queue.get_epoch_msgs(2).unwrap().is_empty());

        // clearing an already empty queue is fine
        queue.clear_epoch_msgs(2).unwrap();
        assert_eq!(queue.queue_length(2), 0);
    }

    #[test]
    fn test_duplicate_messages_are_distinct_entries() {
        let queue = MsgQueue::new(KvStore::new());
        queue.init_queue(1);
        let msg = queued(7, 0);
        queue.enqueue_msg(1, &msg).unwrap();
        queue.enqueue_msg(1, &msg).unwrap();

        assert_eq!(queue.queue_length(1), 2);
        assert_eq!(queue.get_epoch_msgs(1).unwrap().len(), 2);
    }

    #[test]
    #[should_panic(expected = "queue length of epoch 1 is corrupt")]
    fn test_corrupt_length_counter_panics() {
        let store = KvStore::new();
        let queue = MsgQueue::new(store.clone());
        queue.init_queue(1);
        queue.enqueue_msg(1, &queued(1, 0)).unwrap();

        // a counter that is not 8 bytes must never read as 0, or the next
        // enqueue would overwrite sequence 0
        let len_key = store::prefixed(store::QUEUE_LEN, &[&store::u64_key(1)]);
        store.set(len_key, vec![0xde, 0xad, 0xbe]);
        queue.queue_length(1);
    }

    #[test]
    fn test_unreached_epoch_has_empty_queue() {
        let queue = MsgQueue::new(KvStore::new());
        assert_eq!(queue.queue_length(99), 0);
        assert!(queue.get_epoch_msgs(99).unwrap().is_empty());
    }
}
