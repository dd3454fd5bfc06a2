pub mod backlog;
pub mod bootstrap;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod source;
pub mod topic;

pub use backlog::{Backlog, ResyncRequired};
pub use bootstrap::Engine;
pub use config::DeliveryConfig;
pub use delivery::{DeliveryRequest, DeliveryResponse, FrameSink, StreamSession};
pub use dispatcher::Dispatcher;
pub use error::{DeliveryError, EngineError, WriteFailure};
pub use lifecycle::{Lifecycle, spawn_sweeper};
pub use registry::{Registry, Subscription};
pub use source::{ChannelSource, spawn_source};
pub use topic::Topic;
