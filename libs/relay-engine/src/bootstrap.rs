use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{Change, EventSource};

use crate::config::DeliveryConfig;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::lifecycle::spawn_sweeper;
use crate::source::{ChannelSource, spawn_source};

/// Named background task (source driver or sweeper).
struct TaskSlot {
    name: String,
    handle: JoinHandle<()>,
}

/// The running engine: dispatcher, lifecycle sweeper and source tasks.
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    token: CancellationToken,
    tasks: Vec<TaskSlot>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dispatcher", &self.dispatcher)
            .field("tasks", &self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl Engine {
    /// Validate the config and start the dispatcher and the sweeper.
    /// Must be called inside a tokio runtime.
    pub fn start(config: DeliveryConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(config));
        let token = CancellationToken::new();

        let sweeper = spawn_sweeper(
            dispatcher.registry().clone(),
            *dispatcher.lifecycle(),
            dispatcher.config().sweep_interval(),
            token.child_token(),
        );
        tracing::info!(
            backlog_capacity = dispatcher.config().backlog_capacity,
            hold_timeout_ms = dispatcher.config().long_poll_hold_timeout_ms,
            keep_alive_ms = dispatcher.config().stream_keep_alive_ms,
            queue_depth = dispatcher.config().subscriber_queue_depth,
            "engine started"
        );

        Ok(Self {
            dispatcher,
            token,
            tasks: vec![TaskSlot { name: "sweeper".into(), handle: sweeper }],
        })
    }

    /// Drive `source` into `topic` on its own task.
    pub fn add_source(&mut self, topic: impl Into<String>, source: Box<dyn EventSource>) {
        let topic = topic.into();
        let name = format!("source '{}' -> '{topic}'", source.name());
        let handle = spawn_source(self.dispatcher.clone(), topic, source, self.token.child_token());
        self.tasks.push(TaskSlot { name, handle });
    }

    /// Push-based emitter for `topic`, backed by a [`ChannelSource`].
    pub fn emitter(&mut self, topic: impl Into<String>, buffer: usize) -> mpsc::Sender<Change> {
        let topic = topic.into();
        let (source, tx) = ChannelSource::new(format!("emitter:{topic}"), buffer);
        self.add_source(topic, Box::new(source));
        tx
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Token cancelled at shutdown; hand child tokens to other tasks.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every task and close every subscription, wait up to
    /// `drain` for the tasks, then abort the rest.
    pub async fn shutdown(self, drain: Duration) {
        self.token.cancel();
        self.dispatcher.close_all();

        let deadline = tokio::time::Instant::now() + drain;
        for slot in self.tasks {
            let mut handle = slot.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => tracing::debug!(task = %slot.name, "task stopped"),
                Err(_) => {
                    tracing::warn!(task = %slot.name, "task did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
        tracing::info!("engine stopped");
    }
}
