//! SQLite-backed local store for the catalog cache.

use async_stream::stream;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::Stream;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::writes::{Partition, WriteTicket, WriteTickets};
use crate::catalog::types::{Book, BookDetails, BookList};
use crate::db::Database;

/// Capacity of the change notification channel. Observers that fall further
/// behind simply re-read their query.
const CHANGE_CAPACITY: usize = 256;

/// Local store keyed by entity id.
///
/// Readers never see a half-replaced partition: every replace runs in a single
/// transaction behind the connection lock. Each committed write is announced
/// on a broadcast channel so live queries can re-read their partition.
pub struct SqliteStore {
  db: Mutex<Database>,
  tickets: WriteTickets,
  changes: broadcast::Sender<Partition>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    info!(path = %path.display(), "Opening cache database");
    Ok(Self::from_database(Database::open(path)?))
  }

  pub fn open_in_memory() -> Result<Self> {
    Ok(Self::from_database(Database::open_in_memory()?))
  }

  fn from_database(db: Database) -> Self {
    let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
    Self {
      db: Mutex::new(db),
      tickets: WriteTickets::default(),
      changes,
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Database>> {
    self.db.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Subscribe to partition change notifications.
  pub fn subscribe(&self) -> broadcast::Receiver<Partition> {
    self.changes.subscribe()
  }

  /// Start a write for `partition`. Once it commits, any older write still
  /// pending for the partition is dropped.
  pub fn begin_write(&self, partition: Partition) -> WriteTicket {
    self.tickets.issue(partition)
  }

  fn notify(&self, partition: Partition) {
    // No receivers is fine: nobody is watching this partition
    let _ = self.changes.send(partition);
  }

  /// Run `op` on the blocking pool.
  pub async fn run<T, F>(self: &Arc<Self>, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
  {
    let store = Arc::clone(self);
    tokio::task::spawn_blocking(move || op(&store))
      .await
      .map_err(|e| eyre!("Cache task failed: {}", e))?
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// All lists, ordered by title
  pub fn lists(&self) -> Result<Vec<BookList>> {
    let db = self.lock()?;
    let mut stmt = db
      .conn()
      .prepare("SELECT id, title FROM book_lists ORDER BY title, id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let lists = stmt
      .query_map([], |row| {
        Ok(BookList {
          id: row.get(0)?,
          title: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to query lists: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read list row: {}", e))?;

    Ok(lists)
  }

  /// Books owned by `list_id`, ordered by title, at most `limit` of them.
  pub fn books(&self, list_id: i64, limit: Option<usize>) -> Result<Vec<Book>> {
    let db = self.lock()?;
    // SQLite treats a negative LIMIT as "no limit"
    let limit = limit.map_or(-1, |l| l as i64);
    let mut stmt = db
      .conn()
      .prepare(
        "SELECT id, list_id, title, cover_url FROM books
         WHERE list_id = ?
         ORDER BY title, id
         LIMIT ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let books = stmt
      .query_map(params![list_id, limit], |row| {
        Ok(Book {
          id: row.get(0)?,
          list_id: row.get(1)?,
          title: row.get(2)?,
          cover_url: row.get(3)?,
        })
      })
      .map_err(|e| eyre!("Failed to query books: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read book row: {}", e))?;

    Ok(books)
  }

  /// Oldest cache-write time among the books of `list_id`.
  pub fn min_book_updated_at(&self, list_id: i64) -> Result<Option<DateTime<Utc>>> {
    let db = self.lock()?;
    let millis: Option<i64> = db
      .conn()
      .query_row(
        "SELECT MIN(updated_at) FROM books WHERE list_id = ?",
        params![list_id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to query book timestamps: {}", e))?;

    millis.map(from_millis).transpose()
  }

  pub fn details(&self, id: i64) -> Result<Option<BookDetails>> {
    let db = self.lock()?;
    db.conn()
      .query_row(
        "SELECT id, list_id, title, cover_url, author, isbn, publication_date, description
         FROM book_details WHERE id = ?",
        params![id],
        details_from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query book details {}: {}", id, e))
  }

  /// Cache-write time of the details row for `id`.
  pub fn details_updated_at(&self, id: i64) -> Result<Option<DateTime<Utc>>> {
    let db = self.lock()?;
    let millis: Option<i64> = db
      .conn()
      .query_row(
        "SELECT updated_at FROM book_details WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query details timestamp: {}", e))?;

    millis.map(from_millis).transpose()
  }

  // ==========================================================================
  // Writes
  //
  // Each returns Ok(false) without touching the database when its ticket was
  // withdrawn or a newer ticket for the same partition already committed.
  // ==========================================================================

  /// Replace the whole list-of-lists table.
  pub fn replace_lists(
    &self,
    ticket: &WriteTicket,
    lists: &[BookList],
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let mut db = self.lock()?;
    if !self.accepts(ticket, Partition::Lists) {
      return Ok(false);
    }

    let tx = db
      .conn_mut()
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM book_lists", [])
      .map_err(|e| eyre!("Failed to clear lists: {}", e))?;

    for list in lists {
      tx.execute(
        "INSERT OR REPLACE INTO book_lists (id, title, updated_at) VALUES (?, ?, ?)",
        params![list.id, list.title, now.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store list {}: {}", list.id, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    self.tickets.mark_committed(ticket);
    drop(db);

    info!(count = lists.len(), "Replaced cached lists");
    self.notify(Partition::Lists);
    Ok(true)
  }

  /// Replace the books owned by `list_id`, leaving every other list untouched.
  /// Rows whose `list_id` differs from the target are ignored.
  pub fn replace_books(
    &self,
    ticket: &WriteTicket,
    list_id: i64,
    books: &[Book],
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let mut db = self.lock()?;
    if !self.accepts(ticket, Partition::Books(list_id)) {
      return Ok(false);
    }

    let tx = db
      .conn_mut()
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM books WHERE list_id = ?", params![list_id])
      .map_err(|e| eyre!("Failed to delete books of list {}: {}", list_id, e))?;

    let mut stored = 0;
    for book in books.iter().filter(|b| b.list_id == list_id) {
      tx.execute(
        "INSERT OR REPLACE INTO books (id, list_id, title, cover_url, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          book.id,
          book.list_id,
          book.title,
          book.cover_url,
          now.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to store book {}: {}", book.id, e))?;
      stored += 1;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    self.tickets.mark_committed(ticket);
    drop(db);

    info!(list_id, count = stored, "Replaced cached books");
    self.notify(Partition::Books(list_id));
    Ok(true)
  }

  /// Insert or replace one details row.
  pub fn upsert_details(
    &self,
    ticket: &WriteTicket,
    details: &BookDetails,
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let db = self.lock()?;
    if !self.accepts(ticket, Partition::Details(details.id)) {
      return Ok(false);
    }

    db.conn()
      .execute(
        "INSERT OR REPLACE INTO book_details
           (id, list_id, title, cover_url, author, isbn, publication_date, description, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          details.id,
          details.list_id,
          details.title,
          details.cover_url,
          details.author,
          details.isbn,
          details.publication_date,
          details.description,
          now.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to store details {}: {}", details.id, e))?;
    self.tickets.mark_committed(ticket);
    drop(db);

    debug!(id = details.id, "Stored book details");
    self.notify(Partition::Details(details.id));
    Ok(true)
  }

  /// Must be called with the connection lock held.
  fn accepts(&self, ticket: &WriteTicket, partition: Partition) -> bool {
    if ticket.partition() != partition {
      warn!(?partition, ticket = ?ticket.partition(), "Ticket does not match partition");
      return false;
    }
    if ticket.is_withdrawn() {
      debug!(?partition, "Dropping withdrawn cache write");
      return false;
    }
    if !self.tickets.may_commit(ticket) {
      warn!(?partition, "Dropping superseded cache write");
      return false;
    }
    true
  }
}

/// Live view of one query: yields the current result immediately and again
/// after every committed write to `partition`. Never ends on its own.
pub fn observe<T, F>(
  store: Arc<SqliteStore>,
  partition: Partition,
  read: F,
) -> impl Stream<Item = Result<T>> + Send + 'static
where
  T: Send + 'static,
  F: Fn(&SqliteStore) -> Result<T> + Clone + Send + Sync + 'static,
{
  stream! {
    // Subscribe before the first read so no write can slip in between
    let mut changes = store.subscribe();
    let first = read.clone();
    yield store.run(move |s| first(s)).await;

    loop {
      match changes.recv().await {
        Ok(changed) if changed == partition => {
          let read = read.clone();
          yield store.run(move |s| read(s)).await;
        }
        Ok(_) => {}
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          debug!(?partition, skipped, "Change feed lagged, re-reading");
          let read = read.clone();
          yield store.run(move |s| read(s)).await;
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  }
}

fn details_from_row(row: &Row<'_>) -> rusqlite::Result<BookDetails> {
  Ok(BookDetails {
    id: row.get(0)?,
    list_id: row.get(1)?,
    title: row.get(2)?,
    cover_url: row.get(3)?,
    author: row.get(4)?,
    isbn: row.get(5)?,
    publication_date: row.get(6)?,
    description: row.get(7)?,
  })
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(millis)
    .ok_or_else(|| eyre!("Invalid cache timestamp: {}", millis))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use futures::StreamExt;

  fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
      .unwrap()
      .with_timezone(&Utc)
  }

  fn list(id: i64, title: &str) -> BookList {
    BookList {
      id,
      title: title.to_string(),
    }
  }

  fn book(id: i64, list_id: i64, title: &str) -> Book {
    Book {
      id,
      list_id,
      title: title.to_string(),
      cover_url: format!("https://covers.example/{}.jpg", id),
    }
  }

  fn details(id: i64) -> BookDetails {
    BookDetails {
      id,
      list_id: 1,
      title: "Dune".to_string(),
      cover_url: "x".to_string(),
      author: Some("Frank Herbert".to_string()),
      isbn: None,
      publication_date: None,
      description: None,
    }
  }

  #[test]
  fn test_replace_lists_replaces_whole_set() {
    let store = SqliteStore::open_in_memory().unwrap();

    let ticket = store.begin_write(Partition::Lists);
    store
      .replace_lists(&ticket, &[list(1, "A"), list(2, "B")], now())
      .unwrap();
    let ticket = store.begin_write(Partition::Lists);
    store.replace_lists(&ticket, &[list(3, "C")], now()).unwrap();

    assert_eq!(store.lists().unwrap(), vec![list(3, "C")]);
  }

  #[test]
  fn test_lists_ordered_by_title() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ticket = store.begin_write(Partition::Lists);
    store
      .replace_lists(&ticket, &[list(1, "Zebra"), list(2, "Apple")], now())
      .unwrap();

    let titles: Vec<String> = store.lists().unwrap().into_iter().map(|l| l.title).collect();
    assert_eq!(titles, vec!["Apple", "Zebra"]);
  }

  #[test]
  fn test_replace_books_scoped_to_list() {
    let store = SqliteStore::open_in_memory().unwrap();

    let ticket = store.begin_write(Partition::Books(1));
    store
      .replace_books(&ticket, 1, &[book(1, 1, "One"), book(2, 1, "Two")], now())
      .unwrap();
    let ticket = store.begin_write(Partition::Books(2));
    store
      .replace_books(&ticket, 2, &[book(3, 2, "Three")], now())
      .unwrap();

    // Refresh list 1 with a row belonging to list 2 mixed in
    let ticket = store.begin_write(Partition::Books(1));
    store
      .replace_books(&ticket, 1, &[book(4, 1, "Four"), book(5, 2, "Five")], now())
      .unwrap();

    assert_eq!(store.books(1, None).unwrap(), vec![book(4, 1, "Four")]);
    assert_eq!(store.books(2, None).unwrap(), vec![book(3, 2, "Three")]);
  }

  #[test]
  fn test_books_limit_and_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    let books: Vec<Book> = (1..=8)
      .map(|i| book(i, 1, &format!("Title {}", 9 - i)))
      .collect();
    let ticket = store.begin_write(Partition::Books(1));
    store.replace_books(&ticket, 1, &books, now()).unwrap();

    let limited = store.books(1, Some(5)).unwrap();
    assert_eq!(limited.len(), 5);
    assert_eq!(limited[0].title, "Title 1");
    assert_eq!(store.books(1, None).unwrap().len(), 8);
  }

  #[test]
  fn test_min_updated_at() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.min_book_updated_at(1).unwrap(), None);

    let ticket = store.begin_write(Partition::Books(1));
    store
      .replace_books(&ticket, 1, &[book(1, 1, "One")], now() - Duration::minutes(90))
      .unwrap();

    assert_eq!(
      store.min_book_updated_at(1).unwrap(),
      Some(now() - Duration::minutes(90))
    );
  }

  #[test]
  fn test_details_upsert_and_timestamp() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.details(9).unwrap(), None);
    assert_eq!(store.details_updated_at(9).unwrap(), None);

    let ticket = store.begin_write(Partition::Details(9));
    store.upsert_details(&ticket, &details(9), now()).unwrap();

    assert_eq!(store.details(9).unwrap(), Some(details(9)));
    assert_eq!(store.details_updated_at(9).unwrap(), Some(now()));
  }

  #[test]
  fn test_superseded_write_is_dropped() {
    let store = SqliteStore::open_in_memory().unwrap();

    let stale = store.begin_write(Partition::Books(1));
    let fresh = store.begin_write(Partition::Books(1));

    assert!(store
      .replace_books(&fresh, 1, &[book(2, 1, "Fresh")], now())
      .unwrap());
    assert!(!store
      .replace_books(&stale, 1, &[book(1, 1, "Stale")], now())
      .unwrap());

    assert_eq!(store.books(1, None).unwrap(), vec![book(2, 1, "Fresh")]);
  }

  #[test]
  fn test_older_write_lands_while_newer_never_commits() {
    let store = SqliteStore::open_in_memory().unwrap();

    let first = store.begin_write(Partition::Books(1));
    // A later refresh starts and then fails without saving
    let _failed = store.begin_write(Partition::Books(1));

    assert!(store
      .replace_books(&first, 1, &[book(1, 1, "Landed")], now())
      .unwrap());
    assert_eq!(store.books(1, None).unwrap(), vec![book(1, 1, "Landed")]);
  }

  #[test]
  fn test_withdrawn_write_is_dropped() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ticket = store.begin_write(Partition::Details(9));
    ticket.withdraw();

    assert!(!store.upsert_details(&ticket, &details(9), now()).unwrap());
    assert_eq!(store.details(9).unwrap(), None);
  }

  #[test]
  fn test_ticket_for_other_partition_rejected() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ticket = store.begin_write(Partition::Books(2));
    assert!(!store
      .replace_books(&ticket, 1, &[book(1, 1, "One")], now())
      .unwrap());
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      let ticket = store.begin_write(Partition::Lists);
      store.replace_lists(&ticket, &[list(1, "Kept")], now()).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.lists().unwrap(), vec![list(1, "Kept")]);
  }

  #[tokio::test]
  async fn test_observe_emits_current_then_changes() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut live = Box::pin(observe(store.clone(), Partition::Books(1), |s| {
      s.books(1, None)
    }));

    assert_eq!(live.next().await.unwrap().unwrap(), Vec::<Book>::new());

    // A write to another partition does not wake the observer
    let ticket = store.begin_write(Partition::Books(2));
    store
      .replace_books(&ticket, 2, &[book(5, 2, "Other")], now())
      .unwrap();
    let ticket = store.begin_write(Partition::Books(1));
    store
      .replace_books(&ticket, 1, &[book(1, 1, "One")], now())
      .unwrap();

    assert_eq!(
      live.next().await.unwrap().unwrap(),
      vec![book(1, 1, "One")]
    );
  }
}
