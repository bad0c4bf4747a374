//! Arbitration between concurrent writers of the same cache partition.
//!
//! Every refresh takes a ticket for its partition before it fetches. Tickets
//! are numbered in the order they were issued, and the store remembers the
//! newest ticket that committed for each partition. A save is dropped only
//! when a newer ticket has already committed (its data would go back in
//! time) or when its refresh was abandoned. A newer refresh that is still in
//! flight, or that failed, never blocks an older one that succeeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A scoped subset of cache rows that is always replaced as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
  /// The whole list-of-lists table
  Lists,
  /// All books owned by one list
  Books(i64),
  /// One book's details row
  Details(i64),
}

#[derive(Debug, Clone)]
pub struct WriteTicket {
  partition: Partition,
  generation: u64,
  withdrawn: Arc<AtomicBool>,
}

impl WriteTicket {
  pub fn partition(&self) -> Partition {
    self.partition
  }

  /// Give up on this write. A save that has not committed yet is dropped.
  pub fn withdraw(&self) {
    self.withdrawn.store(true, Ordering::SeqCst);
  }

  pub fn is_withdrawn(&self) -> bool {
    self.withdrawn.load(Ordering::SeqCst)
  }

  /// Withdraw the ticket once the returned guard is dropped.
  pub fn withdraw_on_drop(&self) -> WithdrawOnDrop {
    WithdrawOnDrop(self.clone())
  }
}

/// Held by a refresh for as long as its save may still be pending
pub struct WithdrawOnDrop(WriteTicket);

impl Drop for WithdrawOnDrop {
  fn drop(&mut self) {
    self.0.withdraw();
  }
}

#[derive(Debug, Default, Clone, Copy)]
struct Generations {
  issued: u64,
  committed: u64,
}

#[derive(Debug, Default)]
pub struct WriteTickets {
  generations: Mutex<HashMap<Partition, Generations>>,
}

impl WriteTickets {
  /// Issue a ticket numbered after every earlier one for `partition`.
  pub fn issue(&self, partition: Partition) -> WriteTicket {
    let mut generations = self
      .generations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let entry = generations.entry(partition).or_default();
    entry.issued += 1;
    WriteTicket {
      partition,
      generation: entry.issued,
      withdrawn: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Whether a save under `ticket` may still commit. The caller must hold
  /// the store's write lock until [`WriteTickets::mark_committed`].
  pub fn may_commit(&self, ticket: &WriteTicket) -> bool {
    if ticket.is_withdrawn() {
      return false;
    }
    let generations = self
      .generations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let committed = generations
      .get(&ticket.partition)
      .map_or(0, |g| g.committed);
    ticket.generation > committed
  }

  pub fn mark_committed(&self, ticket: &WriteTicket) {
    let mut generations = self
      .generations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let entry = generations.entry(ticket.partition).or_default();
    entry.committed = entry.committed.max(ticket.generation);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_older_ticket_commits_while_newer_pending() {
    let tickets = WriteTickets::default();
    let first = tickets.issue(Partition::Books(7));
    let second = tickets.issue(Partition::Books(7));

    // The newer refresh has not landed (it may yet fail)
    assert!(tickets.may_commit(&first));
    tickets.mark_committed(&first);
    assert!(tickets.may_commit(&second));
  }

  #[test]
  fn test_older_ticket_dropped_after_newer_commit() {
    let tickets = WriteTickets::default();
    let first = tickets.issue(Partition::Books(7));
    let second = tickets.issue(Partition::Books(7));

    tickets.mark_committed(&second);
    assert!(!tickets.may_commit(&first));
  }

  #[test]
  fn test_partitions_are_independent() {
    let tickets = WriteTickets::default();
    let books = tickets.issue(Partition::Books(7));
    let other = tickets.issue(Partition::Books(8));
    let lists = tickets.issue(Partition::Lists);
    tickets.mark_committed(&other);
    tickets.mark_committed(&lists);
    assert!(tickets.may_commit(&books));
  }

  #[test]
  fn test_withdrawn_ticket_never_commits() {
    let tickets = WriteTickets::default();
    let ticket = tickets.issue(Partition::Lists);
    {
      let _guard = ticket.withdraw_on_drop();
      assert!(tickets.may_commit(&ticket));
    }
    assert!(ticket.is_withdrawn());
    assert!(!tickets.may_commit(&ticket));
  }
}
