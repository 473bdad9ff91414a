use crate::error::QueueError;

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, warn};

type Outcome<R, E> = Option<Result<R, QueueError<E>>>;

/// The single settlement slot of one queue entry.
///
/// Owned by the queue; settles at most once. Any number of `ResultHandle`s
/// may observe it.
pub(crate) struct Settlement<R, E> {
  entry_id: u64,
  tx: watch::Sender<Outcome<R, E>>,
}

impl<R, E> Settlement<R, E> {
  pub(crate) fn new(entry_id: u64) -> (Self, ResultHandle<R, E>) {
    let (tx, rx) = watch::channel(None);
    (Self { entry_id, tx }, ResultHandle { entry_id, result_receiver: rx })
  }

  /// Returns a new handle observing this entry.
  pub(crate) fn subscribe(&self) -> ResultHandle<R, E> {
    ResultHandle {
      entry_id: self.entry_id,
      result_receiver: self.tx.subscribe(),
    }
  }

  /// Stores the outcome. Returns `false` and discards `outcome` if the entry
  /// was already settled.
  pub(crate) fn settle(&self, outcome: Result<R, QueueError<E>>) -> bool {
    let mut outcome = Some(outcome);
    let settled = self.tx.send_if_modified(|slot| {
      if slot.is_some() {
        return false;
      }
      *slot = outcome.take();
      true
    });
    if !settled {
      warn!(entry_id = %self.entry_id, "Settlement: entry was already settled, ignoring second outcome.");
    }
    settled
  }
}

/// A handle to an entry enqueued on a `Queue`.
///
/// Cloning a handle, or fetching another one through `Queue::get`, yields an
/// independent observer of the same outcome.
pub struct ResultHandle<R, E> {
  pub(crate) entry_id: u64,
  pub(crate) result_receiver: watch::Receiver<Outcome<R, E>>,
}

impl<R, E> Clone for ResultHandle<R, E> {
  fn clone(&self) -> Self {
    Self {
      entry_id: self.entry_id,
      result_receiver: self.result_receiver.clone(),
    }
  }
}

impl<R, E> fmt::Debug for ResultHandle<R, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultHandle")
      .field("entry_id", &self.entry_id)
      .field("settled", &self.is_settled())
      .finish()
  }
}

impl<R, E> ResultHandle<R, E> {
  /// Returns the unique ID of the entry this handle observes.
  pub fn id(&self) -> u64 {
    self.entry_id
  }

  /// Returns `true` once the entry has an outcome.
  pub fn is_settled(&self) -> bool {
    self.result_receiver.borrow().is_some()
  }
}

impl<R: Clone, E: Clone> ResultHandle<R, E> {
  /// Awaits the entry's outcome.
  ///
  /// # Errors
  /// Returns `QueueError::Callback` with the callback's own error if it failed.
  /// Returns `QueueError::CallbackPanicked` if the callback panicked.
  /// Returns `QueueError::Cancelled` if the entry was cancelled or cleared before it started.
  /// Returns `QueueError::Abandoned` if the queue was dropped before the entry started.
  pub async fn await_result(mut self) -> Result<R, QueueError<E>> {
    let outcome = match self.result_receiver.wait_for(Option::is_some).await {
      // `wait_for` only returns once the slot holds an outcome.
      Ok(settled) => settled.clone().unwrap_or(Err(QueueError::Abandoned)),
      Err(_) => {
        // Sender dropped without an outcome: the queue itself went away.
        debug!(entry_id = %self.entry_id, "Settlement slot closed without an outcome.");
        Err(QueueError::Abandoned)
      }
    };
    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_settle_is_observed_by_every_handle() {
    let (settlement, handle) = Settlement::<u32, String>::new(7);
    let second = settlement.subscribe();
    let third = handle.clone();
    assert!(!handle.is_settled());

    assert!(settlement.settle(Ok(42)));
    assert!(handle.is_settled());
    assert_eq!(handle.id(), 7);
    assert_eq!(handle.await_result().await, Ok(42));
    assert_eq!(second.await_result().await, Ok(42));
    assert_eq!(third.await_result().await, Ok(42));
  }

  #[tokio::test]
  async fn test_second_settlement_is_rejected() {
    let (settlement, handle) = Settlement::<u32, String>::new(1);
    assert!(settlement.settle(Err(QueueError::Callback("boom".to_string()))));
    assert!(!settlement.settle(Ok(5)));
    assert_eq!(
      handle.await_result().await,
      Err(QueueError::Callback("boom".to_string()))
    );
  }

  #[tokio::test]
  async fn test_outcome_survives_dropped_settlement() {
    let (settlement, handle) = Settlement::<&'static str, ()>::new(2);
    settlement.settle(Ok("kept"));
    drop(settlement);
    assert_eq!(handle.await_result().await, Ok("kept"));
  }

  #[tokio::test]
  async fn test_dropped_without_outcome_is_abandoned() {
    let (settlement, handle) = Settlement::<u32, ()>::new(3);
    drop(settlement);
    assert_eq!(handle.await_result().await, Err(QueueError::Abandoned));
  }

  #[tokio::test]
  async fn test_await_waits_for_late_settlement() {
    let (settlement, handle) = Settlement::<u32, ()>::new(4);
    let waiter = tokio::spawn(handle.await_result());
    tokio::task::yield_now().await;
    settlement.settle(Ok(9));
    assert_eq!(waiter.await.unwrap(), Ok(9));
  }
}
