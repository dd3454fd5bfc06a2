use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_api::{DeliveryMode, Event, SubscriptionId, SubscriptionInfo, SubscriptionState};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("subscription lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

struct Progress {
    state: SubscriptionState,
    last_delivered: Option<u64>,
    last_activity: Instant,
}

/// Result of a non-blocking push into a stream subscriber's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    /// No stream attached yet; the attach replay will cover the event.
    Detached,
    Full,
    Closed,
}

/// One subscriber, owned by the [`Registry`].
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    mode: DeliveryMode,
    progress: Mutex<Progress>,
    /// Wakes a held long poll.
    wake: Notify,
    /// Stream outbound queue, set while a stream is attached.
    outbound: Mutex<Option<mpsc::Sender<Event>>>,
    /// Set while a request (long poll hold or stream) is in flight.
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Subscription {
    fn new(id: SubscriptionId, topic: String, mode: DeliveryMode) -> Self {
        Self {
            id,
            topic,
            mode,
            progress: Mutex::new(Progress {
                state: SubscriptionState::Active,
                last_delivered: None,
                last_activity: Instant::now(),
            }),
            wake: Notify::new(),
            outbound: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn state(&self) -> SubscriptionState {
        lock(&self.progress).state
    }

    pub fn last_delivered(&self) -> Option<u64> {
        lock(&self.progress).last_delivered
    }

    /// Time since the last request, write or keep-alive.
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(lock(&self.progress).last_activity)
    }

    pub fn info(&self, now: Instant) -> SubscriptionInfo {
        let progress = lock(&self.progress);
        SubscriptionInfo {
            id: self.id,
            topic: self.topic.clone(),
            mode: self.mode,
            state: progress.state,
            last_delivered: progress.last_delivered,
            idle_ms: now.saturating_duration_since(progress.last_activity).as_millis() as u64,
        }
    }

    pub fn touch(&self) {
        lock(&self.progress).last_activity = Instant::now();
    }

    /// Move to `to` unless the subscription is already Stale or Closed.
    pub(crate) fn transition(&self, to: SubscriptionState) -> bool {
        let mut progress = lock(&self.progress);
        if !progress.state.is_live() {
            return false;
        }
        progress.state = to;
        true
    }

    /// Record delivery up to `sequence`. Never moves backwards.
    pub(crate) fn delivered(&self, sequence: u64) {
        let mut progress = lock(&self.progress);
        progress.last_delivered = Some(progress.last_delivered.map_or(sequence, |s| s.max(sequence)));
        progress.last_activity = Instant::now();
    }

    /// Resync moves the position to `head` even if it is lower.
    pub(crate) fn rewind_to(&self, head: u64) {
        lock(&self.progress).last_delivered = Some(head);
    }

    pub(crate) fn try_begin_request(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_request(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.wake.notified()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attach a stream queue. Caller holds the topic's dispatch gate.
    pub(crate) fn attach(&self, tx: mpsc::Sender<Event>) {
        *lock(&self.outbound) = Some(tx);
        self.transition(SubscriptionState::Streaming);
    }

    pub(crate) fn try_push(&self, event: Event) -> Push {
        let outbound = lock(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            return Push::Detached;
        };
        match tx.try_send(event) {
            Ok(()) => Push::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Push::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Push::Closed,
        }
    }

    /// Final state, queue dropped, pending work cancelled.
    fn close(&self, state: SubscriptionState) {
        {
            let mut progress = lock(&self.progress);
            if progress.state != SubscriptionState::Closed {
                progress.state = state;
            }
        }
        lock(&self.outbound).take();
        self.cancel.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Registry
// ═══════════════════════════════════════════════════════════════

/// Every live subscription, keyed by id, with a per-topic index.
///
/// Removal from the id map is the point after which a subscription is
/// gone: `list_active` never returns it again.
#[derive(Debug, Default)]
pub struct Registry {
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    by_topic: DashMap<String, HashSet<SubscriptionId>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: &str, mode: DeliveryMode) -> Arc<Subscription> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let sub = Arc::new(Subscription::new(id, topic.to_string(), mode));
        self.subscriptions.insert(id, sub.clone());
        self.by_topic.entry(topic.to_string()).or_default().insert(id);
        tracing::debug!(subscription = %id, topic = %topic, mode = %mode, "registered subscription");
        sub
    }

    /// Remove a subscription, close its queue and cancel anything it is
    /// waiting on. Returns the removed entry.
    pub fn unregister(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let (_, sub) = self.subscriptions.remove(&id)?;
        if let Some(mut ids) = self.by_topic.get_mut(sub.topic()) {
            ids.remove(&id);
        }
        sub.close(SubscriptionState::Closed);
        tracing::debug!(subscription = %id, topic = %sub.topic(), "unregistered subscription");
        Some(sub)
    }

    /// Mark a stream Stale: its queue is dropped and its session stopped,
    /// but the entry stays so a reconnect can be told to resync.
    pub fn mark_stale(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.get(&id) {
            Some(sub) => {
                sub.close(SubscriptionState::Stale);
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.get(&id) {
            Some(sub) => {
                sub.touch();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.get(&id).map(|entry| entry.value().clone())
    }

    /// Live subscriptions of `topic`, in id order.
    pub fn list_active(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let mut ids: Vec<SubscriptionId> = match self.by_topic.get(topic) {
            Some(ids) => ids.iter().copied().collect(),
            None => return Vec::new(),
        };
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.get(id))
            .filter(|sub| sub.state().is_live())
            .collect()
    }

    /// Every registered subscription, Stale ones included.
    pub fn all(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Registered subscriptions of `topic`.
    pub fn count(&self, topic: &str) -> usize {
        self.by_topic.get(topic).map_or(0, |ids| ids.len())
    }
}
