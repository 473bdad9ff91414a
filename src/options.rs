use crate::error::QueueError;

use std::time::Duration;

/// Construction-time limits for a `Queue`.
///
/// Both limits can also be changed later through `Queue::set_concurrency`
/// and `Queue::set_throttle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
  /// Maximum number of items running at once. `usize::MAX` means unbounded.
  pub concurrency: usize,
  /// Minimum interval between the start of two consecutive items.
  /// `Duration::ZERO` disables throttling.
  pub throttle: Duration,
}

impl Default for QueueOptions {
  fn default() -> Self {
    Self {
      concurrency: usize::MAX,
      throttle: Duration::ZERO,
    }
  }
}

impl QueueOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn with_throttle(mut self, throttle: Duration) -> Self {
    self.throttle = throttle;
    self
  }

  pub(crate) fn validate<E>(&self) -> Result<(), QueueError<E>> {
    validate_concurrency(self.concurrency)
  }
}

pub(crate) fn validate_concurrency<E>(concurrency: usize) -> Result<(), QueueError<E>> {
  if concurrency == 0 {
    return Err(QueueError::InvalidConcurrency(concurrency));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_unbounded_and_unthrottled() {
    let options = QueueOptions::default();
    assert_eq!(options.concurrency, usize::MAX);
    assert_eq!(options.throttle, Duration::ZERO);
    assert_eq!(options.validate::<()>(), Ok(()));
  }

  #[test]
  fn test_zero_concurrency_is_rejected() {
    let options = QueueOptions::new().with_concurrency(0);
    assert_eq!(options.validate::<()>(), Err(QueueError::InvalidConcurrency(0)));
  }

  #[test]
  fn test_builder_sets_both_limits() {
    let options = QueueOptions::new()
      .with_concurrency(3)
      .with_throttle(Duration::from_millis(250));
    assert_eq!(options.concurrency, 3);
    assert_eq!(options.throttle, Duration::from_millis(250));
    assert!(options.validate::<String>().is_ok());
  }
}
