//! Core traits and types for the caching system.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now" in epoch milliseconds.
///
/// Injected so freshness decisions can be tested without sleeping.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(now_ms: i64) -> Self {
    Self {
      now: AtomicI64::new(now_ms),
    }
  }

  pub fn set(&self, now_ms: i64) {
    self.now.store(now_ms, Ordering::SeqCst);
  }

  pub fn advance(&self, by: Duration) {
    self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}

/// Whether data stamped at `updated_at_ms` is still within `ttl`.
///
/// Strict: an age exactly equal to the ttl is stale. A zero timestamp means
/// "no data" and is never fresh.
pub fn is_within(updated_at_ms: i64, now_ms: i64, ttl: Duration) -> bool {
  updated_at_ms != 0 && now_ms - updated_at_ms < ttl.as_millis() as i64
}

/// Age classification of cached data against the two TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Younger than the fresh ttl: serve, no revalidation
  Fresh,
  /// Younger than the stale ttl: serve and revalidate in the background
  Stale,
  /// Older than the stale ttl: still displayable, but a blocking fetch is needed
  Expired,
}

impl Freshness {
  pub fn classify(updated_at_ms: i64, now_ms: i64, fresh_ttl: Duration, stale_ttl: Duration) -> Self {
    if is_within(updated_at_ms, now_ms, fresh_ttl) {
      Freshness::Fresh
    } else if is_within(updated_at_ms, now_ms, stale_ttl) {
      Freshness::Stale
    } else {
      Freshness::Expired
    }
  }
}

/// Indicates where data handed to the view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the memory tier, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale; a refresh is running or required
  CacheStale,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn boundary_age_is_stale() {
    let ttl = Duration::from_millis(1000);
    assert!(is_within(10_000, 10_999, ttl));
    assert!(!is_within(10_000, 11_000, ttl));
  }

  #[test]
  fn zero_timestamp_is_never_fresh() {
    assert!(!is_within(0, 1, Duration::from_secs(3600)));
  }

  #[test]
  fn classify_uses_both_ttls() {
    let fresh = Duration::from_secs(60);
    let stale = Duration::from_secs(600);
    let t0 = 1_000_000;

    assert_eq!(Freshness::classify(t0, t0 + 59_999, fresh, stale), Freshness::Fresh);
    assert_eq!(Freshness::classify(t0, t0 + 60_000, fresh, stale), Freshness::Stale);
    assert_eq!(Freshness::classify(t0, t0 + 600_000, fresh, stale), Freshness::Expired);
  }

  #[test]
  fn manual_clock_advances() {
    let clock = ManualClock::new(5);
    clock.advance(Duration::from_millis(10));
    assert_eq!(clock.now_ms(), 15);
    clock.set(1);
    assert_eq!(clock.now_ms(), 1);
  }
}
