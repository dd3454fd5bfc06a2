use std::sync::Arc;

use tokio::time::Instant;

use relay_api::{
    Change, DeliveryMode, Event, SourceError, SubscriptionId, SubscriptionInfo, SubscriptionState,
    TopicStatus,
};

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::lifecycle::Lifecycle;
use crate::registry::{Push, Registry, Subscription};
use crate::topic::{Topic, TopicMap};

/// Fan-out engine: sequences changes into topic backlogs and pushes
/// them to every live subscriber of the topic.
#[derive(Debug)]
pub struct Dispatcher {
    config: DeliveryConfig,
    topics: TopicMap,
    registry: Arc<Registry>,
    lifecycle: Lifecycle,
}

impl Dispatcher {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            topics: TopicMap::new(config.backlog_capacity),
            registry: Arc::new(Registry::new()),
            lifecycle: Lifecycle::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// The topic named `name`, created on first use. Only publishing and
    /// subscribing create topics.
    pub fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics.get_or_create(name)
    }

    pub(crate) fn existing_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name)
    }

    // ---------------------------------------------------------------------------
    // Publish / fan-out
    // ---------------------------------------------------------------------------

    /// Sequence `change` into `topic` and deliver it to every live
    /// subscriber. Appends and fan-out are serialized per topic.
    pub fn publish(&self, topic: &str, change: Change) -> Event {
        let topic = self.topic(topic);
        let _gate = topic.lock_gate();
        let event = topic.append(change);

        let now = Instant::now();
        for sub in self.registry.list_active(topic.name()) {
            if self.lifecycle.is_expired(&sub, now) {
                tracing::info!(
                    topic = %topic.name(),
                    subscription = %sub.id(),
                    mode = %sub.mode(),
                    "evicting idle subscription before fan-out"
                );
                self.registry.unregister(sub.id());
                continue;
            }
            match sub.mode() {
                DeliveryMode::Stream => self.push_stream(&sub, &event),
                DeliveryMode::LongPoll => {
                    if sub.state() == SubscriptionState::AwaitingData {
                        sub.wake();
                    }
                }
                DeliveryMode::ShortPoll => {}
            }
        }

        tracing::trace!(topic = %topic.name(), sequence = event.sequence, "published event");
        event
    }

    fn push_stream(&self, sub: &Subscription, event: &Event) {
        match sub.try_push(event.clone()) {
            Push::Queued | Push::Detached => {}
            Push::Full => {
                let err = DeliveryError::QueueOverflow(sub.id());
                tracing::warn!(
                    topic = %event.topic,
                    subscription = %sub.id(),
                    depth = self.config.subscriber_queue_depth,
                    error = %err,
                    "subscriber queue full, marking stale"
                );
                self.registry.mark_stale(sub.id());
            }
            Push::Closed => {
                tracing::warn!(
                    topic = %event.topic,
                    subscription = %sub.id(),
                    "subscriber queue closed, unregistering"
                );
                self.registry.unregister(sub.id());
            }
        }
    }

    /// A source for `topic` failed permanently. The topic keeps serving
    /// its backlog and existing subscriptions.
    pub fn report_source_failure(&self, topic: &str, source: &str, error: &SourceError) {
        let topic = self.topic(topic);
        topic.set_degraded(format!("source '{source}': {error}"));
        tracing::error!(
            topic = %topic.name(),
            source = %source,
            error = %error,
            "source failed permanently, topic degraded"
        );
    }

    // ---------------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------------

    pub fn topic_status(&self, name: &str) -> Option<TopicStatus> {
        let topic = self.existing_topic(name)?;
        Some(topic.status(self.registry.count(name)))
    }

    pub fn topics(&self) -> Vec<TopicStatus> {
        self.topics
            .names()
            .iter()
            .filter_map(|name| self.topic_status(name))
            .collect()
    }

    pub fn subscription(&self, id: SubscriptionId) -> Result<SubscriptionInfo, DeliveryError> {
        self.registry
            .get(id)
            .map(|sub| sub.info(Instant::now()))
            .ok_or(DeliveryError::UnknownSubscription(id))
    }

    /// Explicit unsubscribe. Any held request ends with `Closed`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DeliveryError> {
        match self.registry.unregister(id) {
            Some(sub) => {
                tracing::info!(subscription = %id, topic = %sub.topic(), "unsubscribed");
                Ok(())
            }
            None => Err(DeliveryError::UnknownSubscription(id)),
        }
    }

    /// Unregister every subscription: held long polls end with `Closed`
    /// and streams finish. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let subs = self.registry.all();
        let closed = subs
            .iter()
            .filter(|sub| self.registry.unregister(sub.id()).is_some())
            .count();
        if closed > 0 {
            tracing::info!(count = closed, "closed all subscriptions");
        }
        closed
    }

    /// Subscription for a poll or stream request: the client's own when
    /// it names a known id, a fresh one otherwise. The flag is set when
    /// the client must resync because its old subscription went Stale.
    pub(crate) fn resolve(
        &self,
        topic: &str,
        mode: DeliveryMode,
        id: Option<SubscriptionId>,
    ) -> Result<(Arc<Subscription>, bool), DeliveryError> {
        let Some(id) = id else {
            return Ok((self.registry.register(topic, mode), false));
        };
        let Some(sub) = self.registry.get(id) else {
            tracing::debug!(subscription = %id, topic = %topic, "unknown subscription, registering a new one");
            return Ok((self.registry.register(topic, mode), false));
        };
        if sub.topic() != topic {
            return Err(DeliveryError::TopicMismatch {
                id,
                expected: sub.topic().to_string(),
                requested: topic.to_string(),
            });
        }
        if sub.mode() != mode {
            return Err(DeliveryError::ModeMismatch { id, actual: sub.mode(), requested: mode });
        }
        if sub.state() == SubscriptionState::Stale {
            self.registry.unregister(id);
            let fresh = self.registry.register(topic, mode);
            tracing::info!(
                subscription = %fresh.id(),
                stale = %id,
                topic = %topic,
                "replacing stale subscription, client must resync"
            );
            return Ok((fresh, true));
        }
        Ok((sub, false))
    }
}
