use relay_api::{DeliveryMode, SubscriptionId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),
}

/// A frame could not be written to the client connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("write failed: {0}")]
pub struct WriteFailure(pub String);

impl WriteFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Failure of a single delivery request. Never affects other subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscription {0} already has a request in flight")]
    ConcurrentRequest(SubscriptionId),

    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("subscription {id} belongs to topic '{expected}', not '{requested}'")]
    TopicMismatch {
        id: SubscriptionId,
        expected: String,
        requested: String,
    },

    #[error("subscription {id} is a {actual} subscription, not {requested}")]
    ModeMismatch {
        id: SubscriptionId,
        actual: DeliveryMode,
        requested: DeliveryMode,
    },

    #[error("subscription {0} was closed")]
    Closed(SubscriptionId),

    #[error("subscription {id}: {source}")]
    WriteFailure {
        id: SubscriptionId,
        #[source]
        source: WriteFailure,
    },

    #[error("subscription {0} overflowed its queue and must resync")]
    QueueOverflow(SubscriptionId),
}
