//! Pending message queue and its delivery state machine.
//!
//! [`DeliveryQueue`] performs no I/O. Each operation returns the message to
//! post, if any, and the caller hands it to the transport. The caller reports
//! the outcome back through [`DeliveryQueue::complete`].
//!
//! Invariants:
//! - at most one message is in flight;
//! - the head is only removed once its outcome is known and terminal
//!   (accepted or rejected by the endpoint);
//! - messages are posted in enqueue order.

use crate::config::{Config, FlushMechanism, MAX_QUEUE_SIZE};
use crate::error::StoreError;
use crate::message::{Message, MessageRecord};
use crate::store::{SettingsStore, ANALYTICS_MESSAGES_KEY};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Observable state of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Empty, nothing in flight.
    Idle,
    /// Messages queued, nothing in flight.
    Buffering,
    /// The head is in flight.
    Posting,
    /// The head is in flight and another flush was requested meanwhile.
    Draining,
}

/// How a single post attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the message.
    Accepted,
    /// The endpoint refused the message. It is discarded.
    RemoteRejected,
    /// The request failed in transit. The message stays at the head.
    NetworkError,
}

impl DeliveryOutcome {
    /// Whether the message leaves the queue after this outcome.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryOutcome::NetworkError)
    }
}

/// Notification emitted after every resolved post attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub outcome: DeliveryOutcome,
    pub record: MessageRecord,
}

/// Ordered buffer of pending messages.
#[derive(Debug)]
pub struct DeliveryQueue {
    messages: VecDeque<Message>,
    in_flight: bool,
    drain_requested: bool,
    flush_mechanism: FlushMechanism,
    messages_to_flush: usize,
}

impl DeliveryQueue {
    /// Create an empty queue.
    pub fn new(config: &Config) -> Self {
        Self {
            messages: VecDeque::new(),
            in_flight: false,
            drain_requested: false,
            flush_mechanism: config.flush_mechanism(),
            messages_to_flush: config.messages_to_flush(),
        }
    }

    /// Replace the flush thresholds. Queued messages are kept.
    pub fn reconfigure(&mut self, config: &Config) {
        self.flush_mechanism = config.flush_mechanism();
        self.messages_to_flush = config.messages_to_flush();
    }

    pub fn state(&self) -> QueueState {
        match (self.in_flight, self.drain_requested) {
            (true, true) => QueueState::Draining,
            (true, false) => QueueState::Posting,
            (false, _) if self.messages.is_empty() => QueueState::Idle,
            (false, _) => QueueState::Buffering,
        }
    }

    /// Get the number of queued messages, including one in flight.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether a post is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Queued messages in delivery order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Append a message and evaluate the flush thresholds.
    pub fn enqueue(&mut self, message: Message) -> Option<Message> {
        self.messages.push_back(message);
        debug!(queue_len = self.messages.len(), "message queued");
        self.process()
    }

    /// Append a message without evaluating the flush thresholds.
    pub fn append(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    /// Start delivery if a flush threshold is reached.
    ///
    /// Automatic mode flushes at the configured message count. Any mode
    /// flushes at [`MAX_QUEUE_SIZE`].
    pub fn process(&mut self) -> Option<Message> {
        let len = self.messages.len();
        let threshold_reached =
            self.flush_mechanism == FlushMechanism::Automatic && len >= self.messages_to_flush;

        if threshold_reached {
            debug!(queue_len = len, "flush threshold reached");
            self.flush()
        } else if len >= MAX_QUEUE_SIZE {
            debug!(queue_len = len, "queue size limit reached");
            self.flush()
        } else {
            None
        }
    }

    /// Start delivering the head unless a post is already outstanding.
    ///
    /// While a post is outstanding the request is coalesced and recorded as
    /// a pending drain.
    pub fn flush(&mut self) -> Option<Message> {
        if self.in_flight {
            self.drain_requested = true;
            debug!("post in flight, flush coalesced");
            return None;
        }

        let head = self.messages.front()?.clone();
        self.in_flight = true;
        debug!(queue_len = self.messages.len(), kind = ?head.kind(), "posting head");
        Some(head)
    }

    /// Record the outcome of the outstanding post.
    ///
    /// Terminal outcomes pop the head and start posting the next message, so
    /// one flush drains the whole queue one request at a time. A network
    /// error keeps the head for the next flush trigger and drops any pending
    /// drain request.
    ///
    /// Returns `None` when no post was outstanding.
    pub fn complete(&mut self, outcome: DeliveryOutcome) -> Option<(Delivery, Option<Message>)> {
        if !self.in_flight {
            warn!(?outcome, "delivery outcome without a post in flight");
            return None;
        }
        self.in_flight = false;
        self.drain_requested = false;

        if !outcome.is_terminal() {
            let head = self.messages.front()?;
            warn!(queue_len = self.messages.len(), "network error, keeping message for retry");
            return Some((
                Delivery {
                    outcome,
                    record: head.to_record(),
                },
                None,
            ));
        }

        let head = self.messages.pop_front()?;
        match outcome {
            DeliveryOutcome::RemoteRejected => {
                warn!(kind = ?head.kind(), "message rejected by endpoint, discarded")
            }
            _ => debug!(kind = ?head.kind(), "message delivered"),
        }

        let delivery = Delivery {
            outcome,
            record: head.to_record(),
        };
        Some((delivery, self.flush()))
    }

    /// Append the messages persisted by a previous run and clear them from
    /// the store. Unreadable records are dropped.
    pub fn restore(&mut self, store: &dyn SettingsStore) -> usize {
        let records = match store.get(ANALYTICS_MESSAGES_KEY) {
            Some(Value::Array(records)) => records,
            Some(_) => {
                warn!("persisted message queue is malformed, discarding");
                Vec::new()
            }
            None => Vec::new(),
        };

        let mut restored = 0;
        for record in &records {
            let message = Message::from_record(record);
            if message.is_empty() {
                continue;
            }
            self.messages.push_back(message);
            restored += 1;
        }

        if let Err(e) = store.remove(ANALYTICS_MESSAGES_KEY) {
            warn!(error = %e, "failed to clear persisted message queue");
        }

        info!(
            restored,
            dropped = records.len() - restored,
            "pending messages restored from last session"
        );
        restored
    }

    /// Write every queued message, in order, to the store.
    ///
    /// An outstanding post is abandoned; its message is persisted with the
    /// rest. An empty queue clears the key.
    pub fn persist(&self, store: &dyn SettingsStore) -> Result<(), StoreError> {
        if self.messages.is_empty() {
            return store.remove(ANALYTICS_MESSAGES_KEY);
        }

        let records = self
            .messages
            .iter()
            .map(|message| serde_json::to_value(message.to_record()))
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = records.len(), "saving pending messages");
        store.set(ANALYTICS_MESSAGES_KEY, Value::Array(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixpanelBuilder;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn config(mechanism: FlushMechanism, messages_to_flush: usize) -> Config {
        MixpanelBuilder::new("tok")
            .flush_mechanism(mechanism)
            .messages_to_flush(messages_to_flush)
            .build_config()
            .unwrap()
    }

    fn manual_queue() -> DeliveryQueue {
        DeliveryQueue::new(&config(FlushMechanism::Manual, 100))
    }

    fn message(id: u32) -> Message {
        Message::event(format!(r#"{{"event":"e{id}"}}"#).into_bytes())
    }

    #[test]
    fn test_states() {
        let mut queue = manual_queue();
        assert_eq!(queue.state(), QueueState::Idle);

        queue.enqueue(message(1));
        assert_eq!(queue.state(), QueueState::Buffering);

        queue.flush().unwrap();
        assert_eq!(queue.state(), QueueState::Posting);

        assert!(queue.flush().is_none());
        assert_eq!(queue.state(), QueueState::Draining);

        queue.complete(DeliveryOutcome::Accepted).unwrap();
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn test_fifo_delivery() {
        let mut queue = manual_queue();
        for id in 1..=3 {
            assert!(queue.enqueue(message(id)).is_none());
        }

        let mut posted = vec![queue.flush().unwrap()];
        while let Some((delivery, next)) = queue.complete(DeliveryOutcome::Accepted) {
            assert_eq!(delivery.outcome, DeliveryOutcome::Accepted);
            match next {
                Some(next) => posted.push(next),
                None => break,
            }
        }

        assert_eq!(posted, vec![message(1), message(2), message(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_at_most_one_in_flight() {
        let mut queue = manual_queue();
        queue.enqueue(message(1));
        queue.enqueue(message(2));

        assert_eq!(queue.flush(), Some(message(1)));
        assert!(queue.flush().is_none());
        assert!(queue.flush().is_none());
        assert!(queue.enqueue(message(3)).is_none());
        assert!(queue.is_in_flight());
    }

    #[test]
    fn test_threshold_flush_in_automatic_mode() {
        let mut queue = DeliveryQueue::new(&config(FlushMechanism::Automatic, 3));

        assert!(queue.enqueue(message(1)).is_none());
        assert!(queue.enqueue(message(2)).is_none());
        assert_eq!(queue.enqueue(message(3)), Some(message(1)));
        assert!(queue.enqueue(message(4)).is_none());
    }

    #[test]
    fn test_threshold_ignored_in_manual_mode() {
        let mut queue = DeliveryQueue::new(&config(FlushMechanism::Manual, 3));
        for id in 1..=5 {
            assert!(queue.enqueue(message(id)).is_none());
        }
    }

    #[test]
    fn test_safety_valve_flush() {
        for config in [
            config(FlushMechanism::Manual, 3),
            config(FlushMechanism::Automatic, 50),
        ] {
            let mut queue = DeliveryQueue::new(&config);
            for id in 1..MAX_QUEUE_SIZE as u32 {
                assert!(queue.enqueue(message(id)).is_none());
            }
            assert_eq!(queue.enqueue(message(MAX_QUEUE_SIZE as u32)), Some(message(1)));
        }
    }

    #[test]
    fn test_network_error_keeps_head_for_retry() {
        let mut queue = manual_queue();
        queue.enqueue(message(1));
        queue.enqueue(message(2));

        let first = queue.flush().unwrap();
        let (delivery, next) = queue.complete(DeliveryOutcome::NetworkError).unwrap();

        assert_eq!(delivery.outcome, DeliveryOutcome::NetworkError);
        assert_eq!(delivery.record, first.to_record());
        assert!(next.is_none());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.state(), QueueState::Buffering);

        let retried = queue.flush().unwrap();
        assert_eq!(retried.payload(), first.payload());
    }

    #[test]
    fn test_network_error_drops_pending_drain() {
        let mut queue = manual_queue();
        queue.enqueue(message(1));
        queue.flush().unwrap();
        queue.flush();
        assert_eq!(queue.state(), QueueState::Draining);

        let (_, next) = queue.complete(DeliveryOutcome::NetworkError).unwrap();
        assert!(next.is_none());
        assert_eq!(queue.state(), QueueState::Buffering);
    }

    #[test]
    fn test_rejected_message_is_discarded() {
        let mut queue = manual_queue();
        queue.enqueue(message(1));
        queue.enqueue(message(2));
        queue.flush().unwrap();

        let (delivery, next) = queue.complete(DeliveryOutcome::RemoteRejected).unwrap();

        assert_eq!(delivery.outcome, DeliveryOutcome::RemoteRejected);
        assert_eq!(delivery.record, message(1).to_record());
        assert_eq!(next, Some(message(2)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_complete_without_post_is_ignored() {
        let mut queue = manual_queue();
        queue.enqueue(message(1));

        assert!(queue.complete(DeliveryOutcome::Accepted).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_flush_empty_queue() {
        let mut queue = manual_queue();
        assert!(queue.flush().is_none());
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn test_persist_and_restore_round_trip() {
        let store = MemoryStore::new();
        let mut queue = manual_queue();
        queue.enqueue(Message::event(b"A".to_vec()));
        queue.enqueue(Message::profile(b"B".to_vec()));
        queue.persist(&store).unwrap();

        let mut restored = manual_queue();
        assert_eq!(restored.restore(&store), 2);

        let messages: Vec<_> = restored.messages().cloned().collect();
        assert_eq!(
            messages,
            vec![Message::event(b"A".to_vec()), Message::profile(b"B".to_vec())]
        );
        assert!(store.get(ANALYTICS_MESSAGES_KEY).is_none());

        // Consumed exactly once.
        assert_eq!(manual_queue().restore(&store), 0);
    }

    #[test]
    fn test_persist_includes_in_flight_head() {
        let store = MemoryStore::new();
        let mut queue = manual_queue();
        queue.enqueue(message(1));
        queue.flush().unwrap();
        queue.persist(&store).unwrap();

        let mut restored = manual_queue();
        assert_eq!(restored.restore(&store), 1);
        assert_eq!(restored.state(), QueueState::Buffering);
    }

    #[test]
    fn test_persist_empty_queue_clears_stale_records() {
        let store = MemoryStore::new();
        manual_queue().persist(&store).unwrap();
        assert!(store.get(ANALYTICS_MESSAGES_KEY).is_none());

        // Records left behind when clearing them on restore failed.
        store
            .set(ANALYTICS_MESSAGES_KEY, json!([{"type": "event", "content": "QQ=="}]))
            .unwrap();
        manual_queue().persist(&store).unwrap();

        assert!(store.get(ANALYTICS_MESSAGES_KEY).is_none());
        assert_eq!(manual_queue().restore(&store), 0);
    }

    #[test]
    fn test_restore_drops_malformed_records() {
        let store = MemoryStore::new();
        store
            .set(
                ANALYTICS_MESSAGES_KEY,
                json!([
                    {"type": "event", "content": "QQ=="},
                    {"garbage": true},
                    {"type": "profile", "content": ""},
                    {"type": "profile", "content": "Qg=="}
                ]),
            )
            .unwrap();

        let mut queue = manual_queue();
        assert_eq!(queue.restore(&store), 2);

        let payloads: Vec<_> = queue.messages().map(|m| m.payload().to_vec()).collect();
        assert_eq!(payloads, vec![b"A".to_vec(), b"B".to_vec()]);
    }

    #[test]
    fn test_restore_malformed_queue_yields_empty() {
        let store = MemoryStore::new();
        store.set(ANALYTICS_MESSAGES_KEY, json!("oops")).unwrap();

        let mut queue = manual_queue();
        assert_eq!(queue.restore(&store), 0);
        assert!(store.get(ANALYTICS_MESSAGES_KEY).is_none());
    }
}
