//! Staleness rules deciding when a cached resource is refreshed.

use chrono::{DateTime, Duration, Utc};

/// How long cached books and details stay fresh unless configured otherwise.
pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
  stale_after: Duration,
}

impl Default for StalenessPolicy {
  fn default() -> Self {
    Self::new(Duration::minutes(DEFAULT_STALE_AFTER_MINUTES))
  }
}

impl StalenessPolicy {
  pub fn new(stale_after: Duration) -> Self {
    Self { stale_after }
  }

  /// Lists rarely change: only an empty (or missing) cache triggers a refresh.
  pub fn lists_stale<T>(&self, cached: Option<&[T]>) -> bool {
    cached.map_or(true, |lists| lists.is_empty())
  }

  /// Books of a list are refreshed when none are cached or the oldest row
  /// has outlived the threshold.
  pub fn books_stale(
    &self,
    cached_empty: bool,
    oldest_updated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> bool {
    if cached_empty {
      return true;
    }
    match oldest_updated_at {
      Some(at) => self.expired(at, now),
      None => true,
    }
  }

  /// Details are refreshed when missing or older than the threshold.
  pub fn details_stale(&self, updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match updated_at {
      Some(at) => self.expired(at, now),
      None => true,
    }
  }

  fn expired(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - updated_at > self.stale_after
  }
}
