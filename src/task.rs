use crate::handle::Settlement;

use std::future::Future;
use std::pin::Pin;

/// The future an item callback produces.
/// It must be `Send` and `'static`, and resolve to the item's outcome.
pub type CallbackFuture<R, E> = Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'static>>;

/// Type-erased item callback, invoked once with the item's payload.
pub(crate) type BoxedCallback<T, R, E> = Box<dyn FnOnce(T) -> CallbackFuture<R, E> + Send + 'static>;

/// Internal representation of an entry while it sits in the waiting list.
pub(crate) struct QueuedItem<T, R, E> {
  pub(crate) entry_id: u64,
  pub(crate) item: T,
  pub(crate) callback: BoxedCallback<T, R, E>,
  pub(crate) settlement: Settlement<R, E>,
}

impl<T, R, E> QueuedItem<T, R, E> {
  pub(crate) fn new<F, Fut>(entry_id: u64, item: T, callback: F, settlement: Settlement<R, E>) -> Self
  where
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
  {
    Self {
      entry_id,
      item,
      callback: Box::new(move |item| Box::pin(callback(item)) as CallbackFuture<R, E>),
      settlement,
    }
  }
}

/// An entry whose callback has been started and has not settled yet.
pub(crate) struct PendingItem<T, R, E> {
  pub(crate) item: T,
  pub(crate) settlement: Settlement<R, E>,
}
