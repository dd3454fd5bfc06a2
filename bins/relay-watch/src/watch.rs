use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;

use relay_api::{Backoff, Envelope, Event, SubscriptionId};

use crate::client::RelayClient;
use crate::config::{FollowArgs, PollArgs};
use crate::error::{Recovery, WatchError};
use crate::sse::{SseMessage, SseParser};

/// Where the watcher is in the topic: what it sends back on the next
/// request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub subscription: Option<SubscriptionId>,
    pub cursor: Option<u64>,
}

impl Position {
    pub fn new(subscription: Option<u64>, cursor: Option<u64>) -> Self {
        Self { subscription: subscription.map(SubscriptionId), cursor }
    }

    /// Take the envelope's subscription and cursor, returning its events.
    pub fn apply(&mut self, envelope: Envelope) -> Vec<Event> {
        if envelope.resync {
            tracing::warn!(
                from = ?self.cursor,
                head = envelope.cursor,
                "fell behind the backlog, resynced to head"
            );
        }
        if envelope.subscription.is_some() {
            self.subscription = envelope.subscription;
        }
        self.cursor = Some(envelope.cursor);
        envelope.events
    }

    /// Adjust to a failed request. False when the watcher must stop.
    fn recover(&mut self, error: &WatchError) -> bool {
        match error.recovery() {
            Recovery::Retry => true,
            Recovery::Resubscribe => {
                tracing::info!(subscription = ?self.subscription, error = %error, "subscribing again");
                self.subscription = None;
                true
            }
            Recovery::Fatal => false,
        }
    }
}

fn print_event(event: &Event) -> Result<(), WatchError> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Short poll: fixed interval
// ═══════════════════════════════════════════════════════════════

pub async fn poll(client: &RelayClient, args: PollArgs) -> Result<(), WatchError> {
    let interval = Duration::from_millis(args.interval_ms.max(1));
    let mut position = Position::new(None, args.cursor);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match client.poll(&args.topic, position.cursor).await {
            Ok(envelope) => {
                let events = position.apply(envelope);
                tracing::debug!(topic = %args.topic, count = events.len(), cursor = ?position.cursor, "polled");
                for event in &events {
                    print_event(event)?;
                }
            }
            Err(e) if e.recovery() == Recovery::Fatal => return Err(e),
            Err(e) => tracing::warn!(topic = %args.topic, error = %e, "poll failed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Long poll: re-poll immediately after every answer
// ═══════════════════════════════════════════════════════════════

pub async fn long_poll(client: &RelayClient, args: FollowArgs) -> Result<(), WatchError> {
    let mut position = Position::new(args.subscription, args.cursor);
    let mut backoff = Backoff::default();

    loop {
        match client.long_poll(&args.topic, position.subscription, position.cursor).await {
            Ok(envelope) => {
                backoff.reset();
                for event in position.apply(envelope) {
                    print_event(&event)?;
                }
            }
            Err(e) => {
                if !position.recover(&e) {
                    return Err(e);
                }
                if e.recovery() == Recovery::Retry {
                    let delay = backoff.next_delay();
                    tracing::warn!(topic = %args.topic, error = %e, delay_ms = delay.as_millis() as u64, "long poll failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stream: follow SSE, reconnect with subscription + last cursor
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct OpenData {
    subscription: SubscriptionId,
    cursor: u64,
    resync: bool,
}

/// Apply one SSE message to `position`, returning the event it carries.
pub fn handle_message(position: &mut Position, message: &SseMessage) -> Result<Option<Event>, WatchError> {
    match message.event.as_str() {
        "open" => {
            let open: OpenData = serde_json::from_str(&message.data)?;
            position.apply(Envelope {
                subscription: Some(open.subscription),
                events: Vec::new(),
                cursor: open.cursor,
                resync: open.resync,
            });
            tracing::info!(subscription = %open.subscription, cursor = open.cursor, "stream open");
            Ok(None)
        }
        "event" => {
            let event: Event = serde_json::from_str(&message.data)?;
            tracing::trace!(id = ?message.id, sequence = event.sequence, "stream event");
            position.cursor = Some(event.sequence);
            Ok(Some(event))
        }
        other => {
            tracing::debug!(event = %other, "ignoring stream message");
            Ok(None)
        }
    }
}

pub async fn stream(client: &RelayClient, args: FollowArgs) -> Result<(), WatchError> {
    let mut position = Position::new(args.subscription, args.cursor);
    let mut backoff = Backoff::default();

    loop {
        match client.stream(&args.topic, position.subscription, position.cursor).await {
            Ok(response) => {
                backoff.reset();
                let mut body = response.bytes_stream();
                let mut parser = SseParser::new();
                while let Some(chunk) = body.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::warn!(topic = %args.topic, error = %e, "stream interrupted");
                            break;
                        }
                    };
                    for message in parser.push(&chunk) {
                        if let Some(event) = handle_message(&mut position, &message)? {
                            print_event(&event)?;
                        }
                    }
                }
                tracing::info!(topic = %args.topic, cursor = ?position.cursor, "stream ended, reconnecting");
            }
            Err(e) => {
                if !position.recover(&e) {
                    return Err(e);
                }
                tracing::warn!(topic = %args.topic, error = %e, "stream connect failed");
            }
        }
        let delay = backoff.next_delay();
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use relay_api::Payload;

    use super::*;

    fn event(seq: u64) -> Event {
        Event { sequence: seq, topic: "news".into(), payload: Payload::text("x"), ts_ms: 0 }
    }

    #[test]
    fn position_follows_envelopes() {
        let mut position = Position::new(None, None);
        let events = position.apply(Envelope::with_events(Some(SubscriptionId(3)), vec![event(1), event(2)], 0));
        assert_eq!(events.len(), 2);
        assert_eq!(position, Position::new(Some(3), Some(2)));

        // Short polls carry no subscription and must not clear ours.
        position.apply(Envelope::empty(None, 2));
        assert_eq!(position.subscription, Some(SubscriptionId(3)));

        position.apply(Envelope::resync(Some(SubscriptionId(3)), 40));
        assert_eq!(position.cursor, Some(40));
    }

    #[test]
    fn errors_adjust_position() {
        let mut position = Position::new(Some(3), Some(9));
        let gone = WatchError::Status { status: 410, message: "closed".into() };
        assert!(position.recover(&gone));
        assert_eq!(position, Position::new(None, Some(9)));

        let bad = WatchError::Status { status: 400, message: "bad".into() };
        assert!(!position.recover(&bad));
    }

    #[test]
    fn stream_messages_update_cursor() {
        let mut position = Position::default();
        let open = SseMessage {
            event: "open".into(),
            id: None,
            data: r#"{"subscription":5,"cursor":7,"resync":true}"#.into(),
        };
        assert!(handle_message(&mut position, &open).unwrap().is_none());
        assert_eq!(position, Position::new(Some(5), Some(7)));

        let data = serde_json::to_string(&event(8)).unwrap();
        let message = SseMessage { event: "event".into(), id: Some("8".into()), data };
        let received = handle_message(&mut position, &message).unwrap().unwrap();
        assert_eq!(received.sequence, 8);
        assert_eq!(position.cursor, Some(8));

        let broken = SseMessage { event: "event".into(), id: None, data: "{".into() };
        assert!(handle_message(&mut position, &broken).is_err());
    }
}
