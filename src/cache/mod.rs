//! Local cache and the stale-while-revalidate protocol over it.
//!
//! This module is independent of the catalog API:
//! - `storage` keeps rows in SQLite, replaces partitions atomically and
//!   announces every committed write
//! - `resource` turns a cached query plus a remote fetch into a stream of
//!   `Loading` / `Success` / `Error` states
//! - `policy` and `clock` decide when a cached value is too old
//! - `writes` keeps overlapping refreshes of one partition from racing

mod clock;
mod policy;
mod resource;
mod storage;
mod writes;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use policy::{StalenessPolicy, DEFAULT_STALE_AFTER_MINUTES};
pub use resource::{revalidate, CacheValue, CachedResource, ResourceState};
pub use storage::{observe, SqliteStore};
pub use writes::{Partition, WriteTicket};
