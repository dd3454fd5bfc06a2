use relay_api::Envelope;

use crate::backlog::ResyncRequired;
use crate::dispatcher::Dispatcher;

impl Dispatcher {
    /// Read the backlog after `cursor` and answer at once. No server
    /// state is kept between short polls, and an unknown topic is not
    /// created: it reads as empty at head 0.
    pub fn short_poll(&self, topic: &str, cursor: Option<u64>) -> Envelope {
        let Some(topic) = self.existing_topic(topic) else {
            return match cursor {
                Some(c) if c > 0 => Envelope::resync(None, 0),
                _ => Envelope::empty(None, 0),
            };
        };
        match topic.read(cursor) {
            Ok(events) => Envelope::with_events(None, events, cursor.unwrap_or(0)),
            Err(ResyncRequired { head }) => {
                tracing::debug!(topic = %topic.name(), cursor = ?cursor, head, "short poll cursor outside backlog");
                Envelope::resync(None, head)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_api::{Change, Payload};

    use crate::config::DeliveryConfig;
    use crate::dispatcher::Dispatcher;

    #[test]
    fn returns_events_after_cursor_and_keeps_cursor_when_empty() {
        let d = Dispatcher::new(DeliveryConfig::default());
        for i in 0..3 {
            d.publish("t", Change::new(Payload::text(format!("{i}"))));
        }

        let env = d.short_poll("t", Some(1));
        assert_eq!(env.events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(env.cursor, 3);
        assert_eq!(env.subscription, None);

        let env = d.short_poll("t", Some(3));
        assert!(env.events.is_empty());
        assert_eq!(env.cursor, 3);
        assert!(!env.resync);
    }

    #[test]
    fn evicted_cursor_resyncs_to_head() {
        let d = Dispatcher::new(DeliveryConfig { backlog_capacity: 2, ..Default::default() });
        for i in 0..5 {
            d.publish("t", Change::new(Payload::text(format!("{i}"))));
        }
        let env = d.short_poll("t", Some(1));
        assert!(env.resync);
        assert!(env.events.is_empty());
        assert_eq!(env.cursor, 5);
    }

    #[test]
    fn no_cursor_on_empty_topic() {
        let d = Dispatcher::new(DeliveryConfig::default());
        let env = d.short_poll("fresh", None);
        assert!(env.events.is_empty());
        assert_eq!(env.cursor, 0);
        assert!(!env.resync);
    }

    #[test]
    fn unknown_topics_are_not_created() {
        let d = Dispatcher::new(DeliveryConfig::default());
        for i in 0..100 {
            d.short_poll(&format!("junk-{i}"), None);
        }
        assert!(d.topics().is_empty());
        assert!(d.topic_status("junk-0").is_none());

        let env = d.short_poll("junk-0", Some(4));
        assert!(env.resync);
        assert_eq!(env.cursor, 0);
        assert!(d.topic_status("junk-0").is_none());
    }
}
