use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Start-spacing state: the configured interval, the instant of the last
/// admission, and the single deferred re-pump that may be armed.
#[derive(Debug)]
pub(crate) struct Throttle {
  interval: Duration,
  last_admission: Option<Instant>,
  armed: Option<CancellationToken>,
}

impl Throttle {
  pub(crate) fn new(interval: Duration) -> Self {
    Self {
      interval,
      last_admission: None,
      armed: None,
    }
  }

  pub(crate) fn interval(&self) -> Duration {
    self.interval
  }

  /// Replaces the interval. Any armed timer was computed from the old value
  /// and is disarmed.
  pub(crate) fn set_interval(&mut self, interval: Duration) {
    self.interval = interval;
    self.disarm();
  }

  /// Time left before the next admission may start, or `None` if it may
  /// start at `now`.
  pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
    if self.interval.is_zero() {
      return None;
    }
    let last = self.last_admission?;
    let remaining = self.interval.saturating_sub(now.saturating_duration_since(last));
    (!remaining.is_zero()).then_some(remaining)
  }

  pub(crate) fn record_admission(&mut self, now: Instant) {
    self.last_admission = Some(now);
  }

  pub(crate) fn is_armed(&self) -> bool {
    self.armed.is_some()
  }

  /// Stores the token of a newly spawned timer. Never stacks: a previously
  /// armed timer is cancelled first.
  pub(crate) fn arm(&mut self, token: CancellationToken) {
    self.disarm();
    self.armed = Some(token);
  }

  /// Called by a timer that fired. Returns `false` if that timer had
  /// already been disarmed and must not re-pump.
  pub(crate) fn fire(&mut self, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
      return false;
    }
    self.armed = None;
    true
  }

  pub(crate) fn disarm(&mut self) {
    if let Some(token) = self.armed.take() {
      token.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zero_interval_never_defers() {
    let mut throttle = Throttle::new(Duration::ZERO);
    let now = Instant::now();
    throttle.record_admission(now);
    assert_eq!(throttle.remaining(now), None);
  }

  #[test]
  fn test_first_admission_is_immediate() {
    let throttle = Throttle::new(Duration::from_millis(100));
    assert_eq!(throttle.remaining(Instant::now()), None);
  }

  #[test]
  fn test_remaining_counts_down_from_last_admission() {
    let mut throttle = Throttle::new(Duration::from_millis(100));
    let start = Instant::now();
    throttle.record_admission(start);

    assert_eq!(throttle.remaining(start), Some(Duration::from_millis(100)));
    assert_eq!(
      throttle.remaining(start + Duration::from_millis(30)),
      Some(Duration::from_millis(70))
    );
    assert_eq!(throttle.remaining(start + Duration::from_millis(100)), None);
    assert_eq!(throttle.remaining(start + Duration::from_millis(250)), None);
  }

  #[test]
  fn test_arm_does_not_stack() {
    let mut throttle = Throttle::new(Duration::from_millis(100));
    let first = CancellationToken::new();
    let second = CancellationToken::new();

    throttle.arm(first.clone());
    assert!(throttle.is_armed());
    throttle.arm(second.clone());
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());

    assert!(!throttle.fire(&first));
    assert!(throttle.is_armed());
    assert!(throttle.fire(&second));
    assert!(!throttle.is_armed());
  }

  #[test]
  fn test_interval_change_disarms_timer() {
    let mut throttle = Throttle::new(Duration::from_millis(100));
    let token = CancellationToken::new();
    throttle.arm(token.clone());

    throttle.set_interval(Duration::from_millis(10));
    assert!(token.is_cancelled());
    assert!(!throttle.is_armed());
    assert_eq!(throttle.interval(), Duration::from_millis(10));
  }
}
