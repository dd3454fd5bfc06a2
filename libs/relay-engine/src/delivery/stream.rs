use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use relay_api::{DeliveryMode, Event, StreamFrame, SubscriptionId, SubscriptionState};

use crate::backlog::ResyncRequired;
use crate::dispatcher::Dispatcher;
use crate::error::{DeliveryError, WriteFailure};
use crate::registry::{Registry, Subscription};

// ═══════════════════════════════════════════════════════════════
//  FrameSink
// ═══════════════════════════════════════════════════════════════

/// Client connection a stream writes frames to.
pub trait FrameSink: Send {
    fn write(&mut self, frame: StreamFrame) -> Pin<Box<dyn Future<Output = Result<(), WriteFailure>> + Send + '_>>;

    /// Resolves once the client has gone away. Sinks that cannot tell
    /// never resolve and learn it from the next failed write.
    fn closed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

impl FrameSink for mpsc::Sender<StreamFrame> {
    fn write(&mut self, frame: StreamFrame) -> Pin<Box<dyn Future<Output = Result<(), WriteFailure>> + Send + '_>> {
        Box::pin(async move {
            self.send(frame)
                .await
                .map_err(|_| WriteFailure::new("connection closed"))
        })
    }

    fn closed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(mpsc::Sender::closed(self))
    }
}

// ═══════════════════════════════════════════════════════════════
//  StreamSession
// ═══════════════════════════════════════════════════════════════

/// An attached stream subscription. The transport drives it with
/// [`StreamSession::run`]; dropping it detaches the subscription.
pub struct StreamSession {
    sub: Arc<Subscription>,
    registry: Arc<Registry>,
    rx: mpsc::Receiver<Event>,
    replay: Vec<Event>,
    cursor: u64,
    resync: bool,
    keep_alive: Duration,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("subscription", &self.sub.id())
            .field("topic", &self.sub.topic())
            .field("cursor", &self.cursor)
            .field("resync", &self.resync)
            .field("replay", &self.replay.len())
            .finish()
    }
}

enum Stop {
    Cancelled,
    Failed(DeliveryError),
}

impl StreamSession {
    pub fn subscription(&self) -> SubscriptionId {
        self.sub.id()
    }

    pub fn topic(&self) -> &str {
        self.sub.topic()
    }

    /// Cursor announced in the `open` frame.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn resync(&self) -> bool {
        self.resync
    }

    /// Write the open frame and the replay, then forward live events and
    /// keep-alives until the subscription is closed or a write fails.
    ///
    /// `Ok` on unsubscribe or sweep, `QueueOverflow` when the subscriber
    /// fell behind and went Stale, `WriteFailure` when the sink broke.
    pub async fn run<S: FrameSink>(mut self, sink: &mut S) -> Result<(), DeliveryError> {
        match self.pump(sink).await {
            Ok(()) | Err(Stop::Cancelled) => self.finish(),
            Err(Stop::Failed(e)) => Err(e),
        }
    }

    async fn pump<S: FrameSink>(&mut self, sink: &mut S) -> Result<(), Stop> {
        let open = StreamFrame::Open {
            subscription: self.sub.id(),
            cursor: self.cursor,
            resync: self.resync,
        };
        self.write(sink, open).await?;
        for event in std::mem::take(&mut self.replay) {
            self.write(sink, StreamFrame::Event(event)).await?;
        }

        let token = self.sub.cancel_token().clone();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.keep_alive, self.keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Stop::Cancelled),
                _ = sink.closed() => return Err(self.fail(WriteFailure::new("connection closed"))),
                event = self.rx.recv() => match event {
                    Some(event) => {
                        ticker.reset();
                        StreamFrame::Event(event)
                    }
                    None => return Err(Stop::Cancelled),
                },
                _ = ticker.tick() => StreamFrame::KeepAlive,
            };
            self.write(sink, frame).await?;
        }
    }

    async fn write<S: FrameSink>(&self, sink: &mut S, frame: StreamFrame) -> Result<(), Stop> {
        let sequence = match &frame {
            StreamFrame::Event(event) => Some(event.sequence),
            _ => None,
        };
        let result = tokio::select! {
            biased;
            _ = self.sub.cancel_token().cancelled() => return Err(Stop::Cancelled),
            result = sink.write(frame) => result,
        };
        match result {
            Ok(()) => {
                match sequence {
                    Some(seq) => self.sub.delivered(seq),
                    None => self.sub.touch(),
                }
                Ok(())
            }
            Err(failure) => Err(self.fail(failure)),
        }
    }

    /// The client connection is gone: drop the subscription and its queue.
    fn fail(&self, failure: WriteFailure) -> Stop {
        let id = self.sub.id();
        tracing::warn!(topic = %self.sub.topic(), subscription = %id, error = %failure, "stream write failed");
        self.registry.unregister(id);
        Stop::Failed(DeliveryError::WriteFailure { id, source: failure })
    }

    fn finish(&self) -> Result<(), DeliveryError> {
        if self.sub.state() == SubscriptionState::Stale {
            Err(DeliveryError::QueueOverflow(self.sub.id()))
        } else {
            Ok(())
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // Stale entries stay so a reconnect learns it must resync.
        if self.sub.state() != SubscriptionState::Stale {
            self.registry.unregister(self.sub.id());
        }
        self.sub.end_request();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Attach
// ═══════════════════════════════════════════════════════════════

impl Dispatcher {
    /// Attach a stream: register (or reuse) the subscription, compute the
    /// replay and hook up its outbound queue.
    ///
    /// Replay and attach happen under the topic's dispatch gate, so the
    /// first live event is exactly the one after the replay.
    pub fn open_stream(
        &self,
        topic: &str,
        subscription: Option<SubscriptionId>,
        cursor: Option<u64>,
    ) -> Result<StreamSession, DeliveryError> {
        let topic = self.topic(topic);
        let (sub, stale) = self.resolve(topic.name(), DeliveryMode::Stream, subscription)?;
        if !sub.try_begin_request() {
            return Err(DeliveryError::ConcurrentRequest(sub.id()));
        }

        let (tx, rx) = mpsc::channel(self.config().subscriber_queue_depth.max(1));
        let cursor = cursor.or(sub.last_delivered());
        let (replay, cursor, resync) = {
            let _gate = topic.lock_gate();
            let start = if stale {
                let head = topic.head();
                (Vec::new(), head, true)
            } else {
                match topic.read(cursor) {
                    Ok(events) => {
                        let at = events.last().map(|e| e.sequence).unwrap_or(cursor.unwrap_or(0));
                        (events, at, false)
                    }
                    Err(ResyncRequired { head }) => (Vec::new(), head, true),
                }
            };
            sub.attach(tx);
            start
        };
        sub.touch();
        if resync {
            sub.rewind_to(cursor);
        }

        tracing::info!(
            topic = %topic.name(),
            subscription = %sub.id(),
            cursor,
            resync,
            replay = replay.len(),
            "stream attached"
        );

        Ok(StreamSession {
            sub,
            registry: self.registry().clone(),
            rx,
            replay,
            cursor,
            resync,
            keep_alive: self.config().keep_alive(),
        })
    }
}

#[cfg(test)]
mod tests {
    use relay_api::{Change, Payload};

    use super::*;
    use crate::config::DeliveryConfig;

    /// Sink that collects frames and can be told to fail.
    #[derive(Default)]
    struct VecSink {
        frames: Vec<StreamFrame>,
        fail_after: Option<usize>,
    }

    impl FrameSink for VecSink {
        fn write(&mut self, frame: StreamFrame) -> Pin<Box<dyn Future<Output = Result<(), WriteFailure>> + Send + '_>> {
            Box::pin(async move {
                if self.fail_after.is_some_and(|n| self.frames.len() >= n) {
                    return Err(WriteFailure::new("broken pipe"));
                }
                self.frames.push(frame);
                Ok(())
            })
        }
    }

    fn text(s: &str) -> Change {
        Change::new(Payload::text(s))
    }

    #[tokio::test(start_paused = true)]
    async fn open_frame_then_replay_then_live() {
        let d = Arc::new(Dispatcher::new(DeliveryConfig::default()));
        d.publish("t", text("a"));
        d.publish("t", text("b"));
        d.publish("t", text("c"));

        let session = d.open_stream("t", None, Some(1)).unwrap();
        let id = session.subscription();
        assert_eq!(session.cursor(), 3);
        d.publish("t", text("d"));

        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            let mut sink = tx;
            session.run(&mut sink).await
        });

        assert_eq!(rx.recv().await, Some(StreamFrame::Open { subscription: id, cursor: 3, resync: false }));
        let mut seqs = Vec::new();
        for _ in 0..3 {
            match rx.recv().await {
                Some(StreamFrame::Event(e)) => seqs.push(e.sequence),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(seqs, vec![2, 3, 4]);

        d.unsubscribe(id).unwrap();
        assert!(task.await.unwrap().is_ok());
        assert!(d.registry().get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_unregisters() {
        let d = Dispatcher::new(DeliveryConfig::default());
        d.publish("t", text("a"));
        let session = d.open_stream("t", None, None).unwrap();
        let id = session.subscription();

        let mut sink = VecSink { fail_after: Some(1), ..Default::default() };
        let err = session.run(&mut sink).await.unwrap_err();
        assert!(matches!(err, DeliveryError::WriteFailure { .. }));
        assert!(d.registry().get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_on_idle_stream() {
        let d = Arc::new(Dispatcher::new(DeliveryConfig { stream_keep_alive_ms: 1_000, ..Default::default() }));
        let session = d.open_stream("t", None, None).unwrap();
        let id = session.subscription();

        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            let mut sink = tx;
            session.run(&mut sink).await
        });

        assert!(matches!(rx.recv().await, Some(StreamFrame::Open { .. })));
        let before = Instant::now();
        assert_eq!(rx.recv().await, Some(StreamFrame::KeepAlive));
        assert!(Instant::now() - before >= Duration::from_millis(1_000));

        d.unsubscribe(id).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn client_disconnect_releases_subscription_before_keep_alive() {
        let d = Arc::new(Dispatcher::new(DeliveryConfig::default()));
        d.publish("t", text("a"));
        let session = d.open_stream("t", None, Some(0)).unwrap();
        let id = session.subscription();

        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            let mut sink = tx;
            session.run(&mut sink).await
        });
        assert!(matches!(rx.recv().await, Some(StreamFrame::Open { .. })));
        assert!(matches!(rx.recv().await, Some(StreamFrame::Event(_))));

        let before = Instant::now();
        drop(rx);
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, DeliveryError::WriteFailure { .. }));
        assert!(Instant::now() - before < d.config().keep_alive());
        assert!(d.registry().get(id).is_none());

        // The id is free again: reconnecting starts a fresh subscription.
        let again = d.open_stream("t", Some(id), Some(1)).unwrap();
        assert_ne!(again.subscription(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn second_attach_on_same_id_is_rejected() {
        let d = Dispatcher::new(DeliveryConfig::default());
        let first = d.open_stream("t", None, None).unwrap();
        let err = d.open_stream("t", Some(first.subscription()), None).unwrap_err();
        assert_eq!(err, DeliveryError::ConcurrentRequest(first.subscription()));
    }
}
