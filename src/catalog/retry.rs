//! Retry bookkeeping for one logical request.

use serde::Deserialize;
use std::time::Duration;

/// How failed attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts made before giving up
  pub max_retries: u32,
  pub base_delay_ms: u64,
  pub retry_on_transient: bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay_ms: 500,
      retry_on_transient: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
  /// Sleep, then try again
  Retry(Duration),
  GiveUp,
}

/// Attempt counter scoped to a single logical request.
#[derive(Debug, Clone)]
pub struct RetryState {
  policy: RetryPolicy,
  attempts: u32,
}

impl RetryState {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      policy,
      attempts: 0,
    }
  }

  /// Attempts that have failed so far.
  pub fn attempts(&self) -> u32 {
    self.attempts
  }

  /// Record a failed attempt and decide what happens next.
  ///
  /// The n-th retry waits `base_delay_ms * 2^(n-1)`.
  pub fn record_failure(&mut self, transient: bool) -> RetryDecision {
    self.attempts += 1;

    if !transient || !self.policy.retry_on_transient || self.attempts >= self.policy.max_retries {
      return RetryDecision::GiveUp;
    }

    let factor = 1u64.checked_shl(self.attempts - 1).unwrap_or(u64::MAX);
    RetryDecision::Retry(Duration::from_millis(
      self.policy.base_delay_ms.saturating_mul(factor),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy(max_retries: u32, base_delay_ms: u64) -> RetryPolicy {
    RetryPolicy {
      max_retries,
      base_delay_ms,
      retry_on_transient: true,
    }
  }

  #[test]
  fn backoff_doubles_until_exhausted() {
    let mut state = RetryState::new(policy(4, 100));
    assert_eq!(state.record_failure(true), RetryDecision::Retry(Duration::from_millis(100)));
    assert_eq!(state.record_failure(true), RetryDecision::Retry(Duration::from_millis(200)));
    assert_eq!(state.record_failure(true), RetryDecision::Retry(Duration::from_millis(400)));
    assert_eq!(state.record_failure(true), RetryDecision::GiveUp);
    assert_eq!(state.attempts(), 4);
  }

  #[test]
  fn non_transient_failure_is_terminal() {
    let mut state = RetryState::new(policy(3, 100));
    assert_eq!(state.record_failure(false), RetryDecision::GiveUp);
    assert_eq!(state.attempts(), 1);
  }

  #[test]
  fn retry_can_be_disabled() {
    let mut state = RetryState::new(RetryPolicy {
      retry_on_transient: false,
      ..policy(3, 100)
    });
    assert_eq!(state.record_failure(true), RetryDecision::GiveUp);
  }

  #[test]
  fn zero_retries_still_allows_one_attempt() {
    let mut state = RetryState::new(policy(0, 100));
    assert_eq!(state.record_failure(true), RetryDecision::GiveUp);
    assert_eq!(state.attempts(), 1);
  }

  #[test]
  fn huge_attempt_counts_do_not_overflow() {
    let mut state = RetryState::new(policy(u32::MAX, u64::MAX / 2));
    for _ in 0..70 {
      assert!(matches!(state.record_failure(true), RetryDecision::Retry(_)));
    }
  }
}
