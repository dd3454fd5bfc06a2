use relay_api::{DeliveryMode, Envelope, SubscriptionId, SubscriptionState};
use tokio::time::Instant;

use crate::backlog::ResyncRequired;
use crate::dispatcher::Dispatcher;
use crate::error::DeliveryError;
use crate::registry::Subscription;

/// Marks a request in flight on a subscription; back to `Active` on drop.
struct Hold<'a> {
    sub: &'a Subscription,
}

impl<'a> Hold<'a> {
    fn acquire(sub: &'a Subscription) -> Result<Self, DeliveryError> {
        if !sub.try_begin_request() {
            return Err(DeliveryError::ConcurrentRequest(sub.id()));
        }
        Ok(Self { sub })
    }
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        self.sub.transition(SubscriptionState::Active);
        self.sub.touch();
        self.sub.end_request();
    }
}

impl Dispatcher {
    /// Answer with the events after the cursor, holding the request until
    /// one is dispatched or the hold timeout elapses.
    ///
    /// The cursor is the client's, else the subscription's last delivered
    /// sequence, else the whole backlog.
    pub async fn long_poll(
        &self,
        topic: &str,
        subscription: Option<SubscriptionId>,
        cursor: Option<u64>,
    ) -> Result<Envelope, DeliveryError> {
        let topic = self.topic(topic);
        let (sub, stale) = self.resolve(topic.name(), DeliveryMode::LongPoll, subscription)?;
        let _hold = Hold::acquire(&sub)?;
        sub.touch();
        let id = sub.id();

        if stale {
            let head = topic.head();
            sub.rewind_to(head);
            return Ok(Envelope::resync(Some(id), head));
        }

        let cursor = cursor.or(sub.last_delivered());
        let deadline = Instant::now() + self.config().hold_timeout();
        loop {
            // State first, then read: a publish that misses the state
            // has already appended what the read returns.
            sub.transition(SubscriptionState::AwaitingData);
            match topic.read(cursor) {
                Ok(events) if !events.is_empty() => {
                    sub.transition(SubscriptionState::Delivering);
                    let envelope = Envelope::with_events(Some(id), events, 0);
                    sub.delivered(envelope.cursor);
                    tracing::debug!(
                        topic = %topic.name(),
                        subscription = %id,
                        count = envelope.events.len(),
                        cursor = envelope.cursor,
                        "long poll answered"
                    );
                    return Ok(envelope);
                }
                Ok(_) => {}
                Err(ResyncRequired { head }) => {
                    tracing::debug!(topic = %topic.name(), subscription = %id, cursor = ?cursor, head, "long poll cursor outside backlog");
                    sub.rewind_to(head);
                    return Ok(Envelope::resync(Some(id), head));
                }
            }

            tokio::select! {
                _ = sub.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::trace!(topic = %topic.name(), subscription = %id, "long poll hold timed out");
                    return Ok(Envelope::empty(Some(id), cursor.unwrap_or(0)));
                }
                _ = sub.cancel_token().cancelled() => {
                    return Err(DeliveryError::Closed(id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use relay_api::{Change, Payload};

    use super::*;
    use crate::config::DeliveryConfig;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(DeliveryConfig {
            long_poll_hold_timeout_ms: 1_000,
            ..Default::default()
        }))
    }

    fn text(s: &str) -> Change {
        Change::new(Payload::text(s))
    }

    #[tokio::test(start_paused = true)]
    async fn existing_data_answers_immediately() {
        let d = dispatcher();
        d.publish("t", text("a"));
        d.publish("t", text("b"));

        let env = d.long_poll("t", None, Some(1)).await.unwrap();
        assert_eq!(env.events.len(), 1);
        assert_eq!(env.cursor, 2);
        let id = env.subscription.unwrap();
        assert_eq!(d.subscription(id).unwrap().last_delivered, Some(2));
        assert_eq!(d.subscription(id).unwrap().state, SubscriptionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn held_request_wakes_on_publish() {
        let d = dispatcher();
        d.publish("t", text("a"));

        let poll = tokio::spawn({
            let d = d.clone();
            async move { d.long_poll("t", None, Some(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.publish("t", text("b"));

        let env = poll.await.unwrap().unwrap();
        assert_eq!(env.events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_last_delivered() {
        let d = dispatcher();
        d.publish("t", text("a"));
        let first = d.long_poll("t", None, None).await.unwrap();
        let id = first.subscription.unwrap();
        assert_eq!(first.cursor, 1);

        d.publish("t", text("b"));
        let second = d.long_poll("t", Some(id), None).await.unwrap();
        assert_eq!(second.subscription, Some(id));
        assert_eq!(second.events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_ends_hold_with_closed() {
        let d = dispatcher();
        let sub = d.registry().register("t", DeliveryMode::LongPoll);
        let id = sub.id();

        let poll = tokio::spawn({
            let d = d.clone();
            async move { d.long_poll("t", Some(id), None).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.unsubscribe(id).unwrap();

        assert_eq!(poll.await.unwrap(), Err(DeliveryError::Closed(id)));
    }
}
