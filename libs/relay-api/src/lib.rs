pub mod backoff;
pub mod envelope;
pub mod error;
pub mod event;
pub mod source;
pub mod subscription;
pub mod util;

pub use backoff::Backoff;
pub use envelope::{Envelope, StreamFrame};
pub use error::{ErrorKind, SourceError};
pub use event::{Change, DataFormat, Event, Payload};
pub use source::EventSource;
pub use subscription::{
    DeliveryMode, SubscriptionId, SubscriptionInfo, SubscriptionState, TopicStatus,
};
pub use util::now_ms;
