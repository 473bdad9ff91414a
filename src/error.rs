use thiserror::Error;

/// Errors produced by a `Queue` and delivered through its result handles.
///
/// `E` is the error type returned by item callbacks; it is carried through
/// verbatim in [`QueueError::Callback`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError<E> {
  #[error("Item callback failed: {0}")]
  Callback(E),

  #[error("Item callback panicked")]
  CallbackPanicked,

  #[error("Item was cancelled before it started")]
  Cancelled,

  #[error("Queue was dropped before the item started")]
  Abandoned,

  #[error("Concurrency must be at least 1, got {0}")]
  InvalidConcurrency(usize),
}

impl<E> QueueError<E> {
  /// Returns the callback's own error, if this is a callback failure.
  pub fn into_callback_error(self) -> Option<E> {
    match self {
      QueueError::Callback(e) => Some(e),
      _ => None,
    }
  }
}
