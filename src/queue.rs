use crate::error::QueueError;
use crate::handle::{ResultHandle, Settlement};
use crate::notifier::{CompletionInfo, CompletionNotifier, CompletionStatus};
use crate::options::{validate_concurrency, QueueOptions};
use crate::task::{BoxedCallback, CallbackFuture, PendingItem, QueuedItem};
use crate::throttle::Throttle;
use crate::waiting::WaitingList;

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Where a new entry is linked into the waiting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
  Back,
  Front,
}

/// An admitted entry whose callback has not been invoked yet.
type Admitted<T, R, E> = (u64, T, BoxedCallback<T, R, E>);

/// Everything the scheduling loop reads and writes. Only touched while the
/// `Shared::state` lock is held, and that lock is never held across an await
/// or while an item callback runs.
struct QueueState<T, R, E> {
  concurrency: usize,
  throttle: Throttle,
  waiting: WaitingList<T, R, E>,
  pending: BTreeMap<u64, PendingItem<T, R, E>>,
  /// Admitted entries in admission order, awaiting their callback invocation.
  ready: VecDeque<Admitted<T, R, E>>,
  /// Set while one thread is invoking the `ready` callbacks.
  dispatching: bool,
}

impl<T, R, E> QueueState<T, R, E> {
  fn len(&self) -> usize {
    self.pending.len() + self.waiting.len()
  }
}

/// State shared between the `Queue` handle and the tasks it spawns.
/// Running callbacks keep it alive until they have settled.
struct Shared<T, R, E> {
  queue_name: Arc<String>,
  state: Mutex<QueueState<T, R, E>>,
  tokio_handle: TokioHandle,
  shutdown_token: CancellationToken,
  next_entry_id: AtomicU64,
  length_tx: watch::Sender<usize>,
  notifier: CompletionNotifier,
}

/// An ordered task queue with a concurrency cap and start throttling.
///
/// Items are admitted strictly in waiting-list order, and callbacks are
/// invoked in that same order even when several threads pump at once. Each
/// admitted item's callback runs as a Tokio task; its outcome is delivered
/// through the `ResultHandle` returned when it was enqueued.
///
/// Dropping the queue stops admission: waiting entries settle with
/// `QueueError::Abandoned`, running callbacks finish and settle normally.
pub struct Queue<T, R, E>
where
  T: Clone + PartialEq + Send + 'static,
  R: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  shared: Arc<Shared<T, R, E>>,
}

impl<T, R, E> Queue<T, R, E>
where
  T: Clone + PartialEq + Send + 'static,
  R: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn new(queue_name: &str, options: QueueOptions, tokio_handle: TokioHandle) -> Result<Arc<Self>, QueueError<E>> {
    options.validate::<E>()?;

    let queue_name = Arc::new(queue_name.to_string());
    let (length_tx, _) = watch::channel(0);
    let notifier = CompletionNotifier::new(tokio_handle.clone(), queue_name.clone());

    info!(
      queue = %*queue_name,
      concurrency = options.concurrency,
      throttle = ?options.throttle,
      "Queue created."
    );

    Ok(Arc::new(Self {
      shared: Arc::new(Shared {
        queue_name,
        state: Mutex::new(QueueState {
          concurrency: options.concurrency,
          throttle: Throttle::new(options.throttle),
          waiting: WaitingList::new(),
          pending: BTreeMap::new(),
          ready: VecDeque::new(),
          dispatching: false,
        }),
        tokio_handle,
        shutdown_token: CancellationToken::new(),
        next_entry_id: AtomicU64::new(0),
        length_tx,
        notifier,
      }),
    }))
  }

  pub fn name(&self) -> &str {
    &self.shared.queue_name
  }

  /// Number of items whose callback is running now.
  pub fn pending(&self) -> usize {
    self.shared.state.lock().pending.len()
  }

  /// Number of items waiting to be admitted.
  pub fn waiting(&self) -> usize {
    self.shared.state.lock().waiting.len()
  }

  /// Total number of running and waiting items.
  pub fn len(&self) -> usize {
    self.shared.state.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn concurrency(&self) -> usize {
    self.shared.state.lock().concurrency
  }

  /// Changes the concurrency cap and immediately admits waiting items if the
  /// new cap allows it. Lowering the cap never interrupts running items.
  ///
  /// # Errors
  /// Returns `QueueError::InvalidConcurrency` for `0`; the current cap is kept.
  pub fn set_concurrency(&self, concurrency: usize) -> Result<(), QueueError<E>> {
    validate_concurrency::<E>(concurrency)?;
    {
      let mut state = self.shared.state.lock();
      debug!(queue = %*self.shared.queue_name, from = state.concurrency, to = concurrency, "Concurrency changed.");
      state.concurrency = concurrency;
    }
    Shared::pump(&self.shared);
    Ok(())
  }

  pub fn throttle(&self) -> Duration {
    self.shared.state.lock().throttle.interval()
  }

  /// Changes the minimum interval between admissions. The remaining wait is
  /// recomputed from the last admission right away.
  pub fn set_throttle(&self, throttle: Duration) {
    {
      let mut state = self.shared.state.lock();
      debug!(
        queue = %*self.shared.queue_name,
        from = ?state.throttle.interval(),
        to = ?throttle,
        "Throttle changed."
      );
      state.throttle.set_interval(throttle);
    }
    Shared::pump(&self.shared);
  }

  /// Enqueues `item` at the back of the waiting list.
  ///
  /// `callback` is invoked with the item once it is admitted. Synchronous work
  /// can return `std::future::ready(..)` or an `async` block.
  pub fn append<F, Fut>(&self, item: T, callback: F) -> ResultHandle<R, E>
  where
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
  {
    self.enqueue(item, callback, Placement::Back)
  }

  /// Enqueues `item` at the front of the waiting list, ahead of every other
  /// waiting item. Running items are unaffected.
  pub fn prepend<F, Fut>(&self, item: T, callback: F) -> ResultHandle<R, E>
  where
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
  {
    self.enqueue(item, callback, Placement::Front)
  }

  /// Returns `true` if a matching item is waiting. Running items do not count.
  pub fn has(&self, item: &T) -> bool {
    self.shared.state.lock().waiting.contains(item)
  }

  /// Returns a handle to a matching running or waiting item, running items
  /// first. `None` once the item has settled or was removed.
  pub fn get(&self, item: &T) -> Option<ResultHandle<R, E>> {
    let state = self.shared.state.lock();
    state
      .pending
      .values()
      .find(|pending| pending.item == *item)
      .map(|pending| pending.settlement.subscribe())
      .or_else(|| state.waiting.find(item).map(|entry| entry.settlement.subscribe()))
  }

  /// Copies of the running items, in the order they were enqueued.
  pub fn get_pending(&self) -> Vec<T> {
    self.shared.state.lock().pending.values().map(|pending| pending.item.clone()).collect()
  }

  /// Copies of the waiting items, in admission order.
  pub fn get_waiting(&self) -> Vec<T> {
    self.shared.state.lock().waiting.snapshot()
  }

  /// Removes the earliest matching waiting item. Its handle settles with
  /// `QueueError::Cancelled`. Returns `false` if no such item is waiting;
  /// running items are never interrupted.
  pub fn cancel(&self, item: &T) -> bool {
    let removed = {
      let mut state = self.shared.state.lock();
      let removed = state.waiting.remove(item);
      if let Some(entry) = &removed {
        self.shared.settle(entry.entry_id, &entry.settlement, Err(QueueError::Cancelled));
        self.shared.publish_length(&state);
      }
      removed
    };

    match removed {
      Some(entry) => {
        debug!(queue = %*self.shared.queue_name, entry_id = entry.entry_id, "Cancelled waiting item.");
        Shared::pump(&self.shared);
        true
      }
      None => {
        trace!(queue = %*self.shared.queue_name, "Cancel: no matching waiting item.");
        false
      }
    }
  }

  /// Reorders the waiting items with `compare`. Running items and the set of
  /// waiting items are unchanged.
  ///
  /// `compare` runs while the queue state is locked and must not call back
  /// into the queue.
  pub fn sort<F>(&self, compare: F)
  where
    F: FnMut(&T, &T) -> Ordering,
  {
    {
      let mut state = self.shared.state.lock();
      state.waiting.sort_by(compare);
      debug!(queue = %*self.shared.queue_name, waiting = state.waiting.len(), "Sorted waiting items.");
    }
    Shared::pump(&self.shared);
  }

  /// Removes every waiting item; each handle settles with
  /// `QueueError::Cancelled`. Running items continue undisturbed.
  pub fn clear(&self) {
    let drained = {
      let mut state = self.shared.state.lock();
      let drained = state.waiting.drain();
      state.throttle.disarm();
      for entry in &drained {
        self.shared.settle(entry.entry_id, &entry.settlement, Err(QueueError::Cancelled));
      }
      self.shared.publish_length(&state);
      drained
    };

    debug!(queue = %*self.shared.queue_name, cleared = drained.len(), "Cleared waiting items.");
    drop(drained);
    Shared::pump(&self.shared);
  }

  /// Resolves once no item is running or waiting. Every entry removed from
  /// the queue is settled before the queue can report itself empty.
  pub async fn idle(&self) {
    let mut length_rx = self.shared.length_tx.subscribe();
    // The sender lives in `shared`, which `self` keeps alive.
    let _ = length_rx.wait_for(|length| *length == 0).await;
  }

  /// Registers a handler called once for every settled entry, including
  /// cancelled and abandoned ones.
  pub fn add_completion_handler(&self, handler: impl Fn(CompletionInfo) + Send + Sync + 'static) {
    self.shared.notifier.add_handler(handler);
  }

  fn enqueue<F, Fut>(&self, item: T, callback: F, placement: Placement) -> ResultHandle<R, E>
  where
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
  {
    let entry_id = self.shared.next_entry_id.fetch_add(1, AtomicOrdering::Relaxed);
    let (settlement, handle) = Settlement::new(entry_id);
    let entry = QueuedItem::new(entry_id, item, callback, settlement);

    {
      let mut state = self.shared.state.lock();
      match placement {
        Placement::Back => state.waiting.push_back(entry),
        Placement::Front => state.waiting.push_front(entry),
      }
      self.shared.publish_length(&state);
      debug!(queue = %*self.shared.queue_name, %entry_id, ?placement, waiting = state.waiting.len(), "Enqueued item.");
    }

    Shared::pump(&self.shared);
    handle
  }
}

impl<T, R, E> Shared<T, R, E>
where
  T: Clone + PartialEq + Send + 'static,
  R: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// The scheduling loop. Admits waiting items until the concurrency cap, an
  /// empty list or the throttle stops it. Safe to call redundantly and from
  /// any thread: every decision is made under the state lock.
  fn pump(shared: &Arc<Self>) {
    {
      let mut state = shared.state.lock();

      loop {
        if shared.shutdown_token.is_cancelled() {
          trace!(queue = %*shared.queue_name, "Pump: queue is shutting down.");
          break;
        }
        if state.pending.len() >= state.concurrency {
          trace!(queue = %*shared.queue_name, pending = state.pending.len(), "Pump: at capacity.");
          break;
        }
        if state.waiting.is_empty() {
          break;
        }

        let now = Instant::now();
        if let Some(remaining) = state.throttle.remaining(now) {
          if !state.throttle.is_armed() {
            let timer_token = shared.shutdown_token.child_token();
            state.throttle.arm(timer_token.clone());
            Self::spawn_throttle_timer(shared, timer_token, remaining);
            trace!(queue = %*shared.queue_name, ?remaining, "Pump: throttled, timer armed.");
          }
          break;
        }

        let Some(entry) = state.waiting.pop_front() else {
          break;
        };
        state.throttle.record_admission(now);
        state.pending.insert(
          entry.entry_id,
          PendingItem {
            item: entry.item.clone(),
            settlement: entry.settlement,
          },
        );
        state.ready.push_back((entry.entry_id, entry.item, entry.callback));
      }

      // Another thread, or an outer frame of this one, is already draining `ready`.
      if state.dispatching || state.ready.is_empty() {
        return;
      }
      state.dispatching = true;
    }

    Self::dispatch(shared);
  }

  /// Invokes admitted callbacks in admission order, outside the lock, until
  /// `ready` is empty. A panic before the callback hands back its future is
  /// settled like any other.
  fn dispatch(shared: &Arc<Self>) {
    loop {
      let (entry_id, item, callback) = {
        let mut state = shared.state.lock();
        match state.ready.pop_front() {
          Some(admitted) => admitted,
          None => {
            state.dispatching = false;
            return;
          }
        }
      };

      debug!(queue = %*shared.queue_name, %entry_id, "Admitted item. Spawning callback.");
      let started = catch_unwind(AssertUnwindSafe(move || callback(item)));
      Self::spawn_callback(shared, entry_id, started);
    }
  }

  fn spawn_throttle_timer(shared: &Arc<Self>, timer_token: CancellationToken, delay: Duration) {
    let shared_for_timer = shared.clone();
    shared.tokio_handle.spawn(async move {
      tokio::select! {
        biased;
        _ = timer_token.cancelled() => {
          trace!(queue = %*shared_for_timer.queue_name, "Throttle timer disarmed before firing.");
        }
        _ = tokio::time::sleep(delay) => {
          let should_pump = shared_for_timer.state.lock().throttle.fire(&timer_token);
          if should_pump {
            trace!(queue = %*shared_for_timer.queue_name, "Throttle timer fired.");
            Self::pump(&shared_for_timer);
          }
        }
      }
    });
  }

  fn spawn_callback(shared: &Arc<Self>, entry_id: u64, started: std::thread::Result<CallbackFuture<R, E>>) {
    let shared_for_task = shared.clone();
    let queue_name_for_span = shared.queue_name.clone();

    shared.tokio_handle.spawn(
      async move {
        let outcome: Result<R, QueueError<E>> = match started {
          Ok(callback_future) => match AssertUnwindSafe(callback_future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(callback_error)) => Err(QueueError::Callback(callback_error)),
            Err(_panic_payload) => Err(QueueError::CallbackPanicked),
          },
          Err(_panic_payload) => Err(QueueError::CallbackPanicked),
        };

        if matches!(outcome, Err(QueueError::CallbackPanicked)) {
          warn!(%entry_id, "Item callback panicked.");
        } else {
          trace!(%entry_id, ok = outcome.is_ok(), "Item callback finished.");
        }

        Self::complete(&shared_for_task, entry_id, outcome);
      }
      .instrument(info_span!("queue_item", queue = %*queue_name_for_span, %entry_id)),
    );
  }

  /// Moves an entry out of the pending set, settles it and pumps again.
  fn complete(shared: &Arc<Self>, entry_id: u64, outcome: Result<R, QueueError<E>>) {
    let finished = {
      let mut state = shared.state.lock();
      let finished = state.pending.remove(&entry_id);
      // Settled before the new length is published, so `idle` never wakes ahead of it.
      match &finished {
        Some(pending) => shared.settle(entry_id, &pending.settlement, outcome),
        None => warn!(queue = %*shared.queue_name, %entry_id, "Completed entry was not in the pending set."),
      }
      shared.publish_length(&state);
      finished
    };
    drop(finished);

    Self::pump(shared);
  }
}

impl<T, R, E> Shared<T, R, E> {
  fn publish_length(&self, state: &QueueState<T, R, E>) {
    self.length_tx.send_replace(state.len());
  }

  fn settle(&self, entry_id: u64, settlement: &Settlement<R, E>, outcome: Result<R, QueueError<E>>) {
    let status = CompletionStatus::from(&outcome);
    if settlement.settle(outcome) {
      self.notifier.notify(entry_id, status);
    }
  }
}

impl<T, R, E> Drop for Queue<T, R, E>
where
  T: Clone + PartialEq + Send + 'static,
  R: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn drop(&mut self) {
    info!(
      queue = %*self.shared.queue_name,
      "Queue dropped. Stopping admission and abandoning waiting items."
    );
    // Also cancels any armed throttle timer, which holds a child token.
    self.shared.shutdown_token.cancel();

    let abandoned = {
      let mut state = self.shared.state.lock();
      let abandoned = state.waiting.drain();
      state.throttle.disarm();
      for entry in &abandoned {
        self.shared.settle(entry.entry_id, &entry.settlement, Err(QueueError::Abandoned));
      }
      self.shared.publish_length(&state);
      abandoned
    };
    drop(abandoned);
  }
}
