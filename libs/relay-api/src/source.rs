use std::future::Future;
use std::pin::Pin;

use crate::error::SourceError;
use crate::event::Change;

/// Upstream producer of changes for one topic.
///
/// Each instance is one forward-only, infinite sequence: `produce` is
/// called in a loop and yields the next change when it exists. There is
/// no restart; a new stream means a new instance.
///
/// Implementations retry transient failures internally. An `Err` returned
/// from `produce` is fatal: the driver stops pulling and the topic is
/// marked degraded.
pub trait EventSource: Send {
    /// Name used in logs and degraded-topic reports.
    fn name(&self) -> &str;

    /// Wait for and return the next change.
    fn produce(&mut self) -> Pin<Box<dyn Future<Output = Result<Change, SourceError>> + Send + '_>>;
}
