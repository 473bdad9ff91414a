use crate::error::QueueError;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Once};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, info_span, trace, Instrument};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
  /// The callback returned a value.
  Success,
  /// The callback returned an error.
  Failed,
  /// The callback panicked.
  Panicked,
  /// The entry was removed by `cancel` or `clear` before it started.
  Cancelled,
  /// The queue was dropped before the entry started.
  Abandoned,
}

impl<R, E> From<&Result<R, QueueError<E>>> for CompletionStatus {
  fn from(result: &Result<R, QueueError<E>>) -> Self {
    match result {
      Ok(_) => CompletionStatus::Success,
      Err(QueueError::CallbackPanicked) => CompletionStatus::Panicked,
      Err(QueueError::Cancelled) => CompletionStatus::Cancelled,
      Err(QueueError::Abandoned) => CompletionStatus::Abandoned,
      Err(_) => CompletionStatus::Failed,
    }
  }
}

#[derive(Debug, Clone)]
pub struct CompletionInfo {
  pub entry_id: u64,
  pub queue_name: Arc<String>,
  pub status: CompletionStatus,
  pub completion_time: SystemTime,
}

// --- Internal Message (crate-public) ---
#[derive(Debug)]
pub(crate) struct InternalCompletionMessage {
  pub(crate) entry_id: u64,
  pub(crate) status: CompletionStatus,
  pub(crate) completion_time: SystemTime,
}

type CompletionHandler = Arc<dyn Fn(CompletionInfo) + Send + Sync + 'static>;

// --- CompletionNotifier Struct ---

struct NotifierInternalState {
  internal_rx_for_init: Option<UnboundedReceiver<InternalCompletionMessage>>,
  tokio_handle: TokioHandle,
}

/// Fans settlement events out to registered handlers.
///
/// The worker task is only started when the first handler is added; until
/// then `notify` drops events instead of buffering them.
pub(crate) struct CompletionNotifier {
  queue_name: Arc<String>,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  init_once: Once,
  internal_state_for_init: Mutex<NotifierInternalState>,
  internal_tx: UnboundedSender<InternalCompletionMessage>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("queue_name", &self.queue_name)
      .field("handler_count", &self.handlers.read().len())
      .field("initialized", &self.init_once.is_completed())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(tokio_handle: TokioHandle, queue_name: Arc<String>) -> Self {
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    Self {
      queue_name,
      handlers: Arc::new(RwLock::new(Vec::new())),
      init_once: Once::new(),
      internal_state_for_init: Mutex::new(NotifierInternalState {
        internal_rx_for_init: Some(internal_rx),
        tokio_handle,
      }),
      internal_tx,
    }
  }

  fn ensure_worker_initialized(&self) {
    self.init_once.call_once(|| {
      let mut state_guard = self.internal_state_for_init.lock();
      if let Some(rx_to_use) = state_guard.internal_rx_for_init.take() {
        info!(queue = %*self.queue_name, "First completion handler added. Initializing notification worker.");
        state_guard.tokio_handle.spawn(
          Self::run_notification_worker_loop(rx_to_use, self.handlers.clone(), self.queue_name.clone())
            .instrument(info_span!("notification_worker_loop", queue = %*self.queue_name)),
        );
      }
    });
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(CompletionInfo) + Send + Sync + 'static) {
    self.ensure_worker_initialized();
    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(queue = %*self.queue_name, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
  }

  /// Queues a settlement event for the worker. No-op while no handler is registered.
  pub(crate) fn notify(&self, entry_id: u64, status: CompletionStatus) {
    if !self.init_once.is_completed() {
      return;
    }
    let message = InternalCompletionMessage {
      entry_id,
      status,
      completion_time: SystemTime::now(),
    };
    if self.internal_tx.send(message).is_err() {
      debug!(queue = %*self.queue_name, %entry_id, "Notifier: worker is gone, dropping notification.");
    }
  }

  async fn run_notification_worker_loop(
    mut queue_rx: UnboundedReceiver<InternalCompletionMessage>,
    handlers_list_arc: Arc<RwLock<Vec<CompletionHandler>>>,
    queue_name: Arc<String>,
  ) {
    info!("Notification worker started. Will process messages until the queue is dropped.");

    while let Some(message) = queue_rx.recv().await {
      // Snapshot so handlers may register further handlers without deadlocking.
      let handlers: Vec<CompletionHandler> = handlers_list_arc.read().clone();
      if handlers.is_empty() {
        trace!(entry_id = %message.entry_id, "No completion handlers registered, dropping notification.");
        continue;
      }

      let public_info = CompletionInfo {
        entry_id: message.entry_id,
        queue_name: queue_name.clone(),
        status: message.status,
        completion_time: message.completion_time,
      };

      trace!(
        entry_id = %public_info.entry_id,
        status = ?public_info.status,
        "Dispatching notification to {} handlers.",
        handlers.len()
      );

      for handler in handlers {
        let info_for_handler = public_info.clone();
        let result = catch_unwind(AssertUnwindSafe(|| handler(info_for_handler)));
        if result.is_err() {
          error!(
            "A completion handler panicked during execution. Queue: {}, Entry ID: {}",
            public_info.queue_name, public_info.entry_id
          );
        }
      }
    }

    info!("Notification worker stopped (queue dropped and all notifications processed).");
  }
}
