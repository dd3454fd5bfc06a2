use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::subscription::SubscriptionId;

/// Response body of a short or long poll.
///
/// `cursor` is the sequence the client should send back next time. It
/// only moves forward, and on `resync` it jumps to the topic head with
/// no events attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub subscription: Option<SubscriptionId>,
    pub events: Vec<Event>,
    pub cursor: u64,
    #[serde(default)]
    pub resync: bool,
}

impl Envelope {
    /// Envelope carrying `events`, with the cursor at the last one (or
    /// `fallback` when there are none).
    pub fn with_events(subscription: Option<SubscriptionId>, events: Vec<Event>, fallback: u64) -> Self {
        let cursor = events.last().map(|e| e.sequence).unwrap_or(fallback);
        Self { subscription, events, cursor, resync: false }
    }

    pub fn empty(subscription: Option<SubscriptionId>, cursor: u64) -> Self {
        Self { subscription, events: Vec::new(), cursor, resync: false }
    }

    pub fn resync(subscription: Option<SubscriptionId>, head: u64) -> Self {
        Self { subscription, events: Vec::new(), cursor: head, resync: true }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// One unit written to a stream connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// First frame of every stream. Tells the client its id and where
    /// the replay starts.
    Open {
        subscription: SubscriptionId,
        cursor: u64,
        resync: bool,
    },
    Event(Event),
    KeepAlive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;

    fn event(seq: u64) -> Event {
        Event { sequence: seq, topic: "t".into(), payload: Payload::text("x"), ts_ms: 0 }
    }

    #[test]
    fn cursor_follows_last_event() {
        let env = Envelope::with_events(None, vec![event(4), event(5)], 3);
        assert_eq!(env.cursor, 5);
        assert!(!env.resync);

        let env = Envelope::with_events(Some(SubscriptionId(9)), vec![], 3);
        assert_eq!(env.cursor, 3);
        assert!(env.is_empty());
    }

    #[test]
    fn resync_has_no_events() {
        let env = Envelope::resync(Some(SubscriptionId(1)), 42);
        assert!(env.resync);
        assert!(env.events.is_empty());
        assert_eq!(env.cursor, 42);
    }

    #[test]
    fn missing_resync_defaults_to_false() {
        let env: Envelope = serde_json::from_str(r#"{"subscription":null,"events":[],"cursor":0}"#).unwrap();
        assert!(!env.resync);
    }
}
