//! A Tokio-based ordered task queue with a concurrency cap, start throttling,
//! and reordering or cancellation of items that have not started yet.

mod error;
mod handle;
mod notifier;
mod options;
mod queue;
mod task;
mod throttle;
mod waiting;

pub use error::QueueError;
pub use handle::ResultHandle;
pub use notifier::{CompletionInfo, CompletionStatus};
pub use options::QueueOptions;
pub use queue::Queue;
pub use task::CallbackFuture;
