use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_api::{DeliveryMode, SubscriptionId};

use crate::config::DeliveryConfig;
use crate::registry::{Registry, Subscription};

/// Decides when a subscription is dead and reclaims it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    long_poll_idle: Duration,
    stream_idle: Duration,
}

impl Lifecycle {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            long_poll_idle: config.hold_timeout() * 2,
            stream_idle: config.keep_alive() * 2,
        }
    }

    /// Idle time after which a subscription of `mode` is reclaimed.
    /// Short polls keep no server state and never expire.
    pub fn idle_timeout(&self, mode: DeliveryMode) -> Option<Duration> {
        match mode {
            DeliveryMode::ShortPoll => None,
            DeliveryMode::LongPoll => Some(self.long_poll_idle),
            DeliveryMode::Stream => Some(self.stream_idle),
        }
    }

    pub fn is_expired(&self, sub: &Subscription, now: Instant) -> bool {
        self.idle_timeout(sub.mode())
            .is_some_and(|timeout| sub.idle(now) > timeout)
    }

    /// Unregister every expired subscription. Returns the evicted ids.
    pub fn sweep(&self, registry: &Registry, now: Instant) -> Vec<SubscriptionId> {
        let mut evicted = Vec::new();
        for sub in registry.all() {
            if !self.is_expired(&sub, now) {
                continue;
            }
            if registry.unregister(sub.id()).is_some() {
                tracing::info!(
                    subscription = %sub.id(),
                    topic = %sub.topic(),
                    mode = %sub.mode(),
                    idle_ms = sub.idle(now).as_millis() as u64,
                    "evicted idle subscription"
                );
                evicted.push(sub.id());
            }
        }
        evicted
    }
}

/// Run [`Lifecycle::sweep`] every `interval` until the token is cancelled.
pub fn spawn_sweeper(
    registry: Arc<Registry>,
    lifecycle: Lifecycle,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = lifecycle.sweep(&registry, Instant::now());
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), remaining = registry.len(), "sweep finished");
                    }
                }
            }
        }
        tracing::debug!("sweeper stopped");
    })
}
