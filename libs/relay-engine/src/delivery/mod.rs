//! Delivery strategies: short poll, long poll and stream, behind the
//! single [`Dispatcher::on_request`] entry point.

pub mod long_poll;
pub mod short_poll;
pub mod stream;

pub use stream::{FrameSink, StreamSession};

use relay_api::{DeliveryMode, Envelope, SubscriptionId};

use crate::dispatcher::Dispatcher;
use crate::error::DeliveryError;

/// A client request for updates on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub topic: String,
    pub mode: DeliveryMode,
    pub subscription: Option<SubscriptionId>,
    /// Last sequence the client has seen.
    pub cursor: Option<u64>,
}

impl DeliveryRequest {
    pub fn new(topic: impl Into<String>, mode: DeliveryMode) -> Self {
        Self { topic: topic.into(), mode, subscription: None, cursor: None }
    }

    pub fn subscription(mut self, id: SubscriptionId) -> Self {
        self.subscription = Some(id);
        self
    }

    pub fn cursor(mut self, cursor: u64) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// What a strategy hands back to the transport.
#[derive(Debug)]
pub enum DeliveryResponse {
    /// A finished poll.
    Envelope(Envelope),
    /// An attached stream, to be driven by the transport.
    Stream(StreamSession),
}

impl Dispatcher {
    pub async fn on_request(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
        let DeliveryRequest { topic, mode, subscription, cursor } = request;
        match mode {
            DeliveryMode::ShortPoll => Ok(DeliveryResponse::Envelope(self.short_poll(&topic, cursor))),
            DeliveryMode::LongPoll => self
                .long_poll(&topic, subscription, cursor)
                .await
                .map(DeliveryResponse::Envelope),
            DeliveryMode::Stream => self
                .open_stream(&topic, subscription, cursor)
                .map(DeliveryResponse::Stream),
        }
    }
}
