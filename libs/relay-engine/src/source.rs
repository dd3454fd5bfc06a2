use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{Change, EventSource, SourceError};

use crate::dispatcher::Dispatcher;

// ═══════════════════════════════════════════════════════════════
//  ChannelSource: push-based internal emitter
// ═══════════════════════════════════════════════════════════════

/// Event source fed through a bounded channel. Ends with a fatal error
/// once every sender is dropped.
pub struct ChannelSource {
    name: String,
    rx: mpsc::Receiver<Change>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>, buffer: usize) -> (Self, mpsc::Sender<Change>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { name: name.into(), rx }, tx)
    }
}

impl EventSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> Pin<Box<dyn Future<Output = Result<Change, SourceError>> + Send + '_>> {
        Box::pin(async move {
            self.rx
                .recv()
                .await
                .ok_or_else(|| SourceError::logic("every emitter was dropped"))
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Source driver
// ═══════════════════════════════════════════════════════════════

/// Pull changes from `source` and publish them to `topic` until the
/// token is cancelled or the source fails.
pub fn spawn_source(
    dispatcher: Arc<Dispatcher>,
    topic: String,
    mut source: Box<dyn EventSource>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = source.name().to_string();
        tracing::info!(source = %name, topic = %topic, "source starting");
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(source = %name, "source cancellation requested");
                    break;
                }
                result = source.produce() => result,
            };
            match result {
                Ok(change) => {
                    let event = dispatcher.publish(&topic, change);
                    tracing::debug!(source = %name, topic = %topic, sequence = event.sequence, "source change published");
                }
                Err(e) => {
                    dispatcher.report_source_failure(&topic, &name, &e);
                    break;
                }
            }
        }
        tracing::info!(source = %name, "source stopped");
    })
}

#[cfg(test)]
mod tests {
    use relay_api::{ErrorKind, Payload, StreamFrame};

    use super::*;
    use crate::config::DeliveryConfig;

    #[tokio::test]
    async fn channel_source_ends_when_senders_drop() {
        let (mut source, tx) = ChannelSource::new("emitter", 4);
        tx.send(Change::new(Payload::text("a"))).await.unwrap();
        drop(tx);

        let change = source.produce().await.unwrap();
        assert_eq!(change.payload, Payload::text("a"));
        let err = source.produce().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }

    #[tokio::test]
    async fn driver_publishes_then_degrades_topic() {
        let dispatcher = Arc::new(Dispatcher::new(DeliveryConfig::default()));
        let (source, tx) = ChannelSource::new("emitter", 4);
        let handle = spawn_source(dispatcher.clone(), "t".into(), Box::new(source), CancellationToken::new());

        tx.send(Change::new(Payload::text("a"))).await.unwrap();
        tx.send(Change::new(Payload::text("b"))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let status = dispatcher.topic_status("t").unwrap();
        assert_eq!(status.head, 2);
        assert!(status.degraded.unwrap().contains("every emitter was dropped"));
    }

    #[tokio::test]
    async fn degraded_topic_keeps_existing_subscribers() {
        let dispatcher = Arc::new(Dispatcher::new(DeliveryConfig::default()));
        dispatcher.publish("t", Change::new(Payload::text("a")));

        let first = dispatcher.long_poll("t", None, Some(0)).await.unwrap();
        let poller = first.subscription.unwrap();

        let session = dispatcher.open_stream("t", None, Some(1)).unwrap();
        let streamer = session.subscription();
        let (frames, mut rx) = mpsc::channel(16);
        let stream_task = tokio::spawn(async move {
            let mut sink = frames;
            session.run(&mut sink).await
        });
        assert!(matches!(rx.recv().await, Some(StreamFrame::Open { .. })));

        let (source, tx) = ChannelSource::new("emitter", 4);
        let handle = spawn_source(dispatcher.clone(), "t".into(), Box::new(source), CancellationToken::new());
        tx.send(Change::new(Payload::text("b"))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(dispatcher.topic_status("t").unwrap().degraded.is_some());
        let active: Vec<_> = dispatcher.registry().list_active("t").iter().map(|s| s.id()).collect();
        assert_eq!(active, vec![poller, streamer]);

        match rx.recv().await {
            Some(StreamFrame::Event(e)) => assert_eq!(e.sequence, 2),
            other => panic!("unexpected frame {other:?}"),
        }
        let envelope = dispatcher.long_poll("t", Some(poller), Some(0)).await.unwrap();
        assert_eq!(envelope.events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert!(!stream_task.is_finished());

        dispatcher.unsubscribe(streamer).unwrap();
        assert!(stream_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn driver_stops_on_cancel() {
        let dispatcher = Arc::new(Dispatcher::new(DeliveryConfig::default()));
        let (source, _tx) = ChannelSource::new("emitter", 4);
        let token = CancellationToken::new();
        let handle = spawn_source(dispatcher.clone(), "t".into(), Box::new(source), token.clone());
        token.cancel();
        handle.await.unwrap();
        assert!(dispatcher.topic_status("t").is_none());
    }
}
