//! Stale-while-revalidate resource streams.
//!
//! A resource is read from the local cache first and shown immediately; if its
//! staleness rule says so it is refetched and written back, and from then on
//! every change of the cached query is streamed to the observer:
//!
//! ```text
//! Loading -> [Success(cached)] -> [Error(msg)] -> Success(live)*
//! ```
//!
//! The stream never ends on its own. Dropping it cancels whatever step is in
//! flight, and a new subscription starts again from the top.

use async_stream::stream;
use async_trait::async_trait;
use color_eyre::Result;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use super::writes::WriteTicket;
use crate::catalog::error::FetchError;

/// The state of a resource as seen by its observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState<T> {
  /// The protocol has started and nothing is known yet
  Loading,
  /// A snapshot of the cached value
  Success(T),
  /// A user-facing description of a failed step
  Error(String),
}

impl<T> ResourceState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, ResourceState::Loading)
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      ResourceState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      ResourceState::Error(e) => Some(e),
      _ => None,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResourceState<U> {
    match self {
      ResourceState::Loading => ResourceState::Loading,
      ResourceState::Success(data) => ResourceState::Success(f(data)),
      ResourceState::Error(e) => ResourceState::Error(e),
    }
  }
}

/// Whether a cached query result counts as a cache hit.
///
/// An empty collection and a missing row are both "absent": they are not
/// shown before the network step, though the staleness rule still sees them.
pub trait CacheValue {
  fn is_present(&self) -> bool;
}

impl<T> CacheValue for Vec<T> {
  fn is_present(&self) -> bool {
    !self.is_empty()
  }
}

impl<T> CacheValue for Option<T> {
  fn is_present(&self) -> bool {
    self.is_some()
  }
}

/// One cached resource: how to watch it, judge it, refetch it and store it.
#[async_trait]
pub trait CachedResource: Send + Sync + 'static {
  type Value: CacheValue + Clone + PartialEq + Send + Sync + 'static;
  type Remote: Send + 'static;

  /// Short label for logs
  fn describe(&self) -> String;

  /// Live query over the cached value. The first item is the current value.
  fn watch(&self) -> BoxStream<'static, Result<Self::Value>>;

  /// Staleness rule. `cached` is `None` when the cache had nothing to show.
  async fn is_stale(&self, cached: Option<&Self::Value>) -> Result<bool>;

  /// Claim the partition this resource writes to.
  fn begin_write(&self) -> WriteTicket;

  async fn fetch(&self) -> Result<Self::Remote, FetchError>;

  /// Persist a fetch result off the async runtime. Returns `Ok(false)` when
  /// the store dropped the write because `ticket` was withdrawn or a newer
  /// write of the same partition already committed.
  async fn save(&self, ticket: WriteTicket, remote: Self::Remote) -> Result<bool>;
}

/// Run the stale-while-revalidate protocol for `resource`.
pub fn revalidate<R: CachedResource>(
  resource: R,
) -> impl Stream<Item = ResourceState<R::Value>> + Send + 'static {
  stream! {
    let label = resource.describe();
    yield ResourceState::Loading;

    // Set while the last thing the observer saw was an error
    let mut errored = false;

    // 1. One-shot cache read, shown before any network activity
    let cached = match resource.watch().next().await {
      Some(Ok(value)) if value.is_present() => Some(value),
      Some(Ok(_)) | None => None,
      Some(Err(e)) => {
        error!(resource = %label, "Failed to read cache: {}", e);
        errored = true;
        yield ResourceState::Error(format!("Failed to read cache: {}", e));
        None
      }
    };

    // Tracks what the observer currently holds so the live phase does not
    // repeat it
    let mut last_success = cached.clone();

    if let Some(value) = &cached {
      yield ResourceState::Success(value.clone());
    }

    // 2. Refresh if stale
    match resource.is_stale(cached.as_ref()).await {
      Ok(true) => {
        info!(resource = %label, "Cache stale, fetching");
        let ticket = resource.begin_write();
        // Dropping the stream withdraws the ticket, so a save still queued on
        // the blocking pool cannot land after the observer has gone
        let _withdraw = ticket.withdraw_on_drop();
        match resource.fetch().await {
          Ok(remote) => match resource.save(ticket.clone(), remote).await {
            Ok(true) => {}
            Ok(false) => debug!(resource = %label, "Cache write dropped"),
            Err(e) => {
              error!(resource = %label, "Failed to update cache: {}", e);
              errored = true;
              yield ResourceState::Error(format!("Failed to update cache: {}", e));
            }
          },
          Err(e) => {
            warn!(resource = %label, error = %e, "Fetch failed");
            errored = true;
            yield ResourceState::Error(e.user_message());
          }
        }
      }
      Ok(false) => debug!(resource = %label, "Cache fresh, skipping fetch"),
      Err(e) => {
        error!(resource = %label, "Failed to evaluate staleness: {}", e);
        errored = true;
        yield ResourceState::Error(format!("Failed to read cache: {}", e));
      }
    }

    // 3. Follow the cache for as long as the observer listens
    let mut live = resource.watch();
    while let Some(next) = live.next().await {
      match next {
        Ok(value) => {
          if last_success.as_ref() == Some(&value) {
            continue;
          }
          // An empty snapshot right after a failure carries no news
          if errored && !value.is_present() {
            continue;
          }
          last_success = Some(value.clone());
          errored = false;
          yield ResourceState::Success(value);
        }
        Err(e) => {
          error!(resource = %label, "Failed to read cache: {}", e);
          errored = true;
          yield ResourceState::Error(format!("Failed to read cache: {}", e));
        }
      }
    }
  }
}
