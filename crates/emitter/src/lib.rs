#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! In-process publish/subscribe fan-out over shell-glob topic patterns.
//!
//! Topic matching is bidirectional: a listener subscribed under pattern `P` receives an
//! emission to topic `T` if `P` matches `T` or `T` matches `P`, so both concrete-publish/
//! pattern-subscribe and pattern-publish/concrete-subscribe work. The listener map is
//! guarded by a single mutex; [`Emitter::emit`] snapshots matching listeners under the lock
//! and releases it before sending, so a slow or re-entrant consumer can never block another
//! caller's `On`/`Off`/`Emit`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

/// The plaintext record this system publishes: a command name plus both halves of the
/// intercepted round-trip that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEvent {
    /// The `command` field extracted from the request plaintext.
    pub command: String,
    /// The decoded request plaintext.
    pub request: String,
    /// The decoded response plaintext.
    pub response: String,
}

/// An event as delivered to a listener: the pattern it matched under, the topic it was
/// emitted to, and the payload.
#[derive(Debug, Clone)]
pub struct Event {
    /// The listener's own subscription pattern.
    pub topic: String,
    /// The topic the emitter was asked to publish to (may differ from `topic` when either
    /// side used a glob pattern).
    pub original_topic: String,
    /// The event payload.
    pub payload: ApiEvent,
}

/// Per-listener delivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Block the emitting call until the listener's queue has room.
    Block,
    /// Drop the event for this listener if its queue is full.
    Skip,
}

struct ListenerEntry {
    id: u64,
    policy: DeliveryPolicy,
    sender: mpsc::Sender<Event>,
}

struct Inner {
    listeners: HashMap<String, Vec<ListenerEntry>>,
}

/// A topic-pattern fan-out emitter. Cheap to clone; all clones share the same listener set.
pub struct Emitter {
    inner: Mutex<Inner>,
    capacity: usize,
    next_id: AtomicU64,
}

/// A live subscription returned by [`Emitter::on`]. Dropping this without calling
/// [`Emitter::off`] leaves the subscription registered; the receiver simply stops being polled.
pub struct Subscription {
    /// Opaque identifier used to target this subscription in [`Emitter::off`].
    pub id: u64,
    /// The pattern this subscription was registered under.
    pub topic: String,
    /// The receiving half of the subscription's bounded queue.
    pub receiver: mpsc::Receiver<Event>,
}

impl Emitter {
    /// Creates an emitter whose per-listener queues hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                listeners: HashMap::new(),
            }),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes to `topic` (a glob pattern) with the default blocking delivery policy.
    pub fn on(&self, topic: &str) -> Subscription {
        self.on_with_policy(topic, DeliveryPolicy::Block)
    }

    /// Subscribes to `topic` with an explicit delivery policy.
    pub fn on_with_policy(&self, topic: &str, policy: DeliveryPolicy) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        inner
            .listeners
            .entry(topic.to_string())
            .or_default()
            .push(ListenerEntry {
                id,
                policy,
                sender,
            });
        Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Unsubscribes listeners registered under patterns that bidirectionally match `topic`.
    ///
    /// If `ids` is empty, every matching listener is removed. Otherwise only listeners whose
    /// id appears in `ids` are removed. Removed listeners have their sender dropped, which
    /// closes the corresponding receiver.
    pub fn off(&self, topic: &str, ids: &[u64]) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        let matching_patterns: Vec<String> = inner
            .listeners
            .keys()
            .filter(|pattern| bidirectional_match(pattern, topic))
            .cloned()
            .collect();

        for pattern in matching_patterns {
            if let Some(entries) = inner.listeners.get_mut(&pattern) {
                if ids.is_empty() {
                    entries.clear();
                } else {
                    entries.retain(|e| !ids.contains(&e.id));
                }
            }
            if inner
                .listeners
                .get(&pattern)
                .map(|v| v.is_empty())
                .unwrap_or(false)
            {
                inner.listeners.remove(&pattern);
            }
        }
    }

    /// Returns a snapshot of every currently-registered subscription pattern.
    pub fn topics(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used)]
        let inner = self.inner.lock().unwrap();
        inner.listeners.keys().cloned().collect()
    }

    /// Publishes `payload` under `topic`, delivering to every listener whose pattern
    /// bidirectionally matches. Resolves once all delivery attempts (blocking or skip) have
    /// completed; dead listeners (closed receivers) are pruned as a side effect.
    pub async fn emit(&self, topic: &str, payload: ApiEvent) {
        let deliveries: Vec<(String, u64, DeliveryPolicy, mpsc::Sender<Event>)> = {
            #[allow(clippy::unwrap_used)]
            let inner = self.inner.lock().unwrap();
            inner
                .listeners
                .iter()
                .filter(|(pattern, _)| bidirectional_match(pattern, topic))
                .flat_map(|(pattern, entries)| {
                    entries
                        .iter()
                        .map(move |e| (pattern.clone(), e.id, e.policy, e.sender.clone()))
                })
                .collect()
        };

        if deliveries.is_empty() {
            return;
        }

        let topic_owned = topic.to_string();
        let mut dead = Vec::new();
        let sends = deliveries.into_iter().map(|(pattern, id, policy, sender)| {
            let event = Event {
                topic: pattern.clone(),
                original_topic: topic_owned.clone(),
                payload: payload.clone(),
            };
            async move {
                let ok = match policy {
                    DeliveryPolicy::Block => sender.send(event).await.is_ok(),
                    DeliveryPolicy::Skip => match sender.try_send(event) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => true,
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    },
                };
                (pattern, id, ok)
            }
        });

        for (pattern, id, ok) in futures::future::join_all(sends).await {
            if !ok {
                dead.push((pattern, id));
            }
        }

        if !dead.is_empty() {
            #[allow(clippy::unwrap_used)]
            let mut inner = self.inner.lock().unwrap();
            for (pattern, id) in dead {
                if let Some(entries) = inner.listeners.get_mut(&pattern) {
                    entries.retain(|e| e.id != id);
                    if entries.is_empty() {
                        inner.listeners.remove(&pattern);
                    }
                }
            }
        }
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Reports whether `pattern` is syntactically valid as a topic pattern, independent of
/// whether anything is currently subscribed under it.
pub fn is_valid_pattern(pattern: &str) -> bool {
    globset::Glob::new(pattern).is_ok()
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    globset::Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(candidate))
        .unwrap_or(false)
}

fn bidirectional_match(pattern: &str, topic: &str) -> bool {
    glob_match(pattern, topic) || glob_match(topic, pattern)
}

/// Fan-in combinator that merges several already-subscribed [`Subscription`]s into a single
/// combined stream. Additive sugar over `on`/`off`; does not participate in topic matching.
pub struct Group {
    sender: mpsc::Sender<Event>,
    receiver: mpsc::Receiver<Event>,
}

impl Group {
    /// Creates an empty group whose combined queue holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self { sender, receiver }
    }

    /// Merges `subscription` into this group: a background task forwards every event it
    /// receives into the group's combined queue until either side closes.
    pub fn add(&self, mut subscription: Subscription) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.receiver.recv().await {
                if sender.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Receives the next event from any merged subscription.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(command: &str) -> ApiEvent {
        ApiEvent {
            command: command.to_string(),
            request: format!("{{\"command\":\"{command}\"}}"),
            response: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn concrete_publish_reaches_pattern_subscriber() {
        let emitter = Emitter::new(4);
        let mut sub = emitter.on("Battle*");
        emitter.emit("BattleDungeonStart", sample_event("BattleDungeonStart")).await;
        let event = sub.receiver.recv().await.expect("event delivered");
        assert_eq!(event.payload.command, "BattleDungeonStart");
    }

    #[tokio::test]
    async fn pattern_publish_reaches_concrete_subscriber() {
        let emitter = Emitter::new(4);
        let mut sub = emitter.on("BattleDungeonStart");
        emitter.emit("Battle*", sample_event("BattleDungeonStart")).await;
        assert!(sub.receiver.recv().await.is_some());
    }

    #[tokio::test]
    async fn non_matching_pattern_does_not_receive() {
        let emitter = Emitter::new(4);
        let mut sub = emitter.on("GetWizard*");
        emitter.emit("BattleDungeonStart", sample_event("BattleDungeonStart")).await;
        emitter.off("GetWizard*", &[]);
        assert!(sub.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn off_closes_the_receiver() {
        let emitter = Emitter::new(4);
        let sub = emitter.on("*");
        emitter.off("*", &[]);
        let mut receiver = sub.receiver;
        assert!(receiver.recv().await.is_none());
        assert!(emitter.topics().is_empty());
    }

    #[tokio::test]
    async fn off_by_id_only_removes_the_targeted_subscription() {
        let emitter = Emitter::new(4);
        let sub_a = emitter.on("cmd");
        let sub_b = emitter.on("cmd");
        emitter.off("cmd", &[sub_a.id]);
        emitter.emit("cmd", sample_event("cmd")).await;
        let mut receiver_b = sub_b.receiver;
        assert!(receiver_b.recv().await.is_some());
    }

    #[test]
    fn is_valid_pattern_rejects_malformed_glob() {
        assert!(is_valid_pattern("Battle*"));
        assert!(!is_valid_pattern("["));
    }

    #[tokio::test]
    async fn group_merges_multiple_subscriptions() {
        let emitter = Emitter::new(4);
        let sub_a = emitter.on("A");
        let sub_b = emitter.on("B");
        let mut group = Group::new(8);
        group.add(sub_a);
        group.add(sub_b);

        emitter.emit("A", sample_event("A")).await;
        emitter.emit("B", sample_event("B")).await;

        let first = group.recv().await.expect("first event");
        let second = group.recv().await.expect("second event");
        let mut commands = vec![first.payload.command, second.payload.command];
        commands.sort();
        assert_eq!(commands, vec!["A".to_string(), "B".to_string()]);
    }
}
