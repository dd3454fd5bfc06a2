use serde::{Deserialize, Serialize};

/// Process-unique subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Transport strategy a subscription is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    ShortPoll,
    LongPoll,
    Stream,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::ShortPoll => f.write_str("short_poll"),
            DeliveryMode::LongPoll => f.write_str("long_poll"),
            DeliveryMode::Stream => f.write_str("stream"),
        }
    }
}

/// Lifecycle state of a subscription.
///
/// Poll strategies move `Active → AwaitingData → Delivering → Active`;
/// streams move `Active → Streaming → Closed`. `Stale` marks a stream
/// that overflowed its queue and must resync on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    AwaitingData,
    Delivering,
    Streaming,
    Stale,
    Closed,
}

impl SubscriptionState {
    /// Whether the dispatcher should still deliver to this subscription.
    pub fn is_live(self) -> bool {
        !matches!(self, SubscriptionState::Stale | SubscriptionState::Closed)
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionState::Active => "active",
            SubscriptionState::AwaitingData => "awaiting_data",
            SubscriptionState::Delivering => "delivering",
            SubscriptionState::Streaming => "streaming",
            SubscriptionState::Stale => "stale",
            SubscriptionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Client-visible view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub topic: String,
    pub mode: DeliveryMode,
    pub state: SubscriptionState,
    pub last_delivered: Option<u64>,
    /// Milliseconds since the last request, write or keep-alive.
    pub idle_ms: u64,
}

/// Client-visible view of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStatus {
    pub name: String,
    /// Sequence of the newest event, 0 before the first one.
    pub head: u64,
    /// Sequence of the oldest retained event.
    pub oldest: Option<u64>,
    pub retained: usize,
    pub capacity: usize,
    /// Reason the topic's source stopped, if it did.
    pub degraded: Option<String>,
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_and_closed_are_not_live() {
        assert!(SubscriptionState::Active.is_live());
        assert!(SubscriptionState::AwaitingData.is_live());
        assert!(SubscriptionState::Streaming.is_live());
        assert!(!SubscriptionState::Stale.is_live());
        assert!(!SubscriptionState::Closed.is_live());
    }

    #[test]
    fn mode_wire_names() {
        assert_eq!(serde_json::to_string(&DeliveryMode::LongPoll).unwrap(), "\"long_poll\"");
        let mode: DeliveryMode = serde_json::from_str("\"stream\"").unwrap();
        assert_eq!(mode, DeliveryMode::Stream);
    }
}
