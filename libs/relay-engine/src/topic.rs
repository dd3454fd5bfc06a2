use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use relay_api::{Change, Event, TopicStatus};

use crate::backlog::{Backlog, ResyncRequired};

/// A named channel: one backlog plus the dispatch gate that orders
/// appends and fan-out on it.
pub struct Topic {
    name: String,
    backlog: RwLock<Backlog>,
    /// Held across append + fan-out + stream attach.
    gate: Mutex<()>,
    degraded: RwLock<Option<String>>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic").field("name", &self.name).finish()
    }
}

impl Topic {
    pub fn new(name: String, capacity: usize) -> Self {
        Self {
            name,
            backlog: RwLock::new(Backlog::new(capacity)),
            gate: Mutex::new(()),
            degraded: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events after `cursor` (whole backlog without one), copied out
    /// under the shared lock.
    pub fn read(&self, cursor: Option<u64>) -> Result<Vec<Event>, ResyncRequired> {
        self.backlog_read().read(cursor)
    }

    pub fn head(&self) -> u64 {
        self.backlog_read().head()
    }

    /// Sequence the change and append it. Caller holds the gate.
    pub(crate) fn append(&self, change: Change) -> Event {
        let mut backlog = self.backlog_write();
        let event = Event {
            sequence: backlog.next_sequence(),
            topic: self.name.clone(),
            payload: change.payload,
            ts_ms: change.ts_ms,
        };
        backlog.append(event.clone());
        event
    }

    pub(crate) fn lock_gate(&self) -> MutexGuard<'_, ()> {
        match self.gate.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.name, "dispatch gate was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn degraded(&self) -> Option<String> {
        match self.degraded.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_degraded(&self, reason: String) {
        match self.degraded.write() {
            Ok(mut g) => *g = Some(reason),
            Err(poisoned) => *poisoned.into_inner() = Some(reason),
        }
    }

    pub fn status(&self, subscribers: usize) -> TopicStatus {
        let backlog = self.backlog_read();
        TopicStatus {
            name: self.name.clone(),
            head: backlog.head(),
            oldest: backlog.oldest(),
            retained: backlog.len(),
            capacity: backlog.capacity(),
            degraded: self.degraded(),
            subscribers,
        }
    }

    fn backlog_read(&self) -> RwLockReadGuard<'_, Backlog> {
        match self.backlog.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.name, "backlog read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn backlog_write(&self) -> RwLockWriteGuard<'_, Backlog> {
        match self.backlog.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.name, "backlog write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicMap
// ═══════════════════════════════════════════════════════════════

/// All topics of the process. Topics are created on first use and live
/// until shutdown.
#[derive(Debug)]
pub(crate) struct TopicMap {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    capacity: usize,
}

impl TopicMap {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<Topic>> {
        let guard = match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic map read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.get(name).cloned()
    }

    pub(crate) fn get_or_create(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.get(name) {
            return topic;
        }
        let mut guard = match self.topics.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic map write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(topic = %name, capacity = self.capacity, "created topic");
                Arc::new(Topic::new(name.to_string(), self.capacity))
            })
            .clone()
    }

    /// Topic names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let guard = match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic map read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_api::Payload;

    #[test]
    fn append_assigns_contiguous_sequences() {
        let topic = Topic::new("posts".into(), 10);
        let _gate = topic.lock_gate();
        let a = topic.append(Change::new(Payload::text("a")));
        let b = topic.append(Change::new(Payload::text("b")));
        assert_eq!((a.sequence, b.sequence), (1, 2));
        assert_eq!(b.topic, "posts");
        assert_eq!(topic.head(), 2);
    }

    #[test]
    fn status_reports_backlog_and_degraded() {
        let topic = Topic::new("posts".into(), 2);
        for i in 0..3 {
            topic.append(Change::new(Payload::text(format!("{i}"))));
        }
        topic.set_degraded("upstream gone".into());
        let status = topic.status(4);
        assert_eq!(status.head, 3);
        assert_eq!(status.oldest, Some(2));
        assert_eq!(status.retained, 2);
        assert_eq!(status.capacity, 2);
        assert_eq!(status.subscribers, 4);
        assert_eq!(status.degraded.as_deref(), Some("upstream gone"));
    }

    #[test]
    fn map_creates_once() {
        let map = TopicMap::new(5);
        let a = map.get_or_create("b");
        let b = map.get_or_create("b");
        map.get_or_create("a");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(map.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(map.get("c").is_none());
    }
}
