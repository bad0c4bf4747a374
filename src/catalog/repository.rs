//! Book catalog resources backed by the local cache.
//!
//! Each query is a stale-while-revalidate stream (see [`revalidate`]); this
//! module supplies the per-resource staleness rules and save strategies.

use async_trait::async_trait;
use color_eyre::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

use super::api_types::{ApiBook, ApiBookDetails, ApiBookList};
use super::client::RemoteSource;
use super::error::FetchError;
use super::types::{Book, BookDetails, BookList};
use crate::cache::{
  observe, revalidate, CachedResource, Clock, Partition, ResourceState, SqliteStore,
  StalenessPolicy, WriteTicket,
};

/// Entry point for screens: one subscribable state stream per query.
#[derive(Clone)]
pub struct BooksRepository {
  remote: Arc<dyn RemoteSource>,
  store: Arc<SqliteStore>,
  clock: Arc<dyn Clock>,
  policy: StalenessPolicy,
}

impl BooksRepository {
  pub fn new(
    remote: Arc<dyn RemoteSource>,
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
    policy: StalenessPolicy,
  ) -> Self {
    Self {
      remote,
      store,
      clock,
      policy,
    }
  }

  /// All book lists
  pub fn book_lists(&self) -> BoxStream<'static, ResourceState<Vec<BookList>>> {
    revalidate(ListsResource { repo: self.clone() }).boxed()
  }

  /// Every cached book of one list
  pub fn books_by_list(&self, list_id: i64) -> BoxStream<'static, ResourceState<Vec<Book>>> {
    revalidate(BooksResource {
      repo: self.clone(),
      list_id,
      limit: None,
    })
    .boxed()
  }

  /// The first `limit` books of a list, by title
  pub fn books(&self, list_id: i64, limit: usize) -> BoxStream<'static, ResourceState<Vec<Book>>> {
    revalidate(BooksResource {
      repo: self.clone(),
      list_id,
      limit: Some(limit),
    })
    .boxed()
  }

  /// Details of one book. `Success(None)` means the catalog does not know it.
  pub fn book_details(&self, id: i64) -> BoxStream<'static, ResourceState<Option<BookDetails>>> {
    revalidate(DetailsResource {
      repo: self.clone(),
      id,
    })
    .boxed()
  }
}

// ============================================================================
// Lists: replaced wholesale, refreshed only when empty
// ============================================================================

struct ListsResource {
  repo: BooksRepository,
}

#[async_trait]
impl CachedResource for ListsResource {
  type Value = Vec<BookList>;
  type Remote = Vec<ApiBookList>;

  fn describe(&self) -> String {
    "lists".to_string()
  }

  fn watch(&self) -> BoxStream<'static, Result<Vec<BookList>>> {
    observe(self.repo.store.clone(), Partition::Lists, |s| s.lists()).boxed()
  }

  async fn is_stale(&self, cached: Option<&Vec<BookList>>) -> Result<bool> {
    Ok(self.repo.policy.lists_stale(cached.map(Vec::as_slice)))
  }

  fn begin_write(&self) -> WriteTicket {
    self.repo.store.begin_write(Partition::Lists)
  }

  async fn fetch(&self) -> Result<Vec<ApiBookList>, FetchError> {
    self.repo.remote.fetch_all_lists().await
  }

  async fn save(&self, ticket: WriteTicket, remote: Vec<ApiBookList>) -> Result<bool> {
    let lists: Vec<BookList> = remote.into_iter().map(BookList::from).collect();
    let now = self.repo.clock.now();
    self
      .repo
      .store
      .run(move |s| s.replace_lists(&ticket, &lists, now))
      .await
  }
}

// ============================================================================
// Books of one list: replaced per list, refreshed when empty or old
// ============================================================================

struct BooksResource {
  repo: BooksRepository,
  list_id: i64,
  limit: Option<usize>,
}

#[async_trait]
impl CachedResource for BooksResource {
  type Value = Vec<Book>;
  type Remote = Vec<ApiBook>;

  fn describe(&self) -> String {
    match self.limit {
      Some(limit) => format!("books of list {} (first {})", self.list_id, limit),
      None => format!("books of list {}", self.list_id),
    }
  }

  fn watch(&self) -> BoxStream<'static, Result<Vec<Book>>> {
    let (list_id, limit) = (self.list_id, self.limit);
    observe(
      self.repo.store.clone(),
      Partition::Books(list_id),
      move |s| s.books(list_id, limit),
    )
    .boxed()
  }

  async fn is_stale(&self, cached: Option<&Vec<Book>>) -> Result<bool> {
    let cached_empty = cached.map_or(true, |books| books.is_empty());
    let list_id = self.list_id;
    let oldest = if cached_empty {
      None
    } else {
      self
        .repo
        .store
        .run(move |s| s.min_book_updated_at(list_id))
        .await?
    };
    Ok(
      self
        .repo
        .policy
        .books_stale(cached_empty, oldest, self.repo.clock.now()),
    )
  }

  fn begin_write(&self) -> WriteTicket {
    self.repo.store.begin_write(Partition::Books(self.list_id))
  }

  async fn fetch(&self) -> Result<Vec<ApiBook>, FetchError> {
    // The API has no per-list endpoint; filtering happens on save
    self.repo.remote.fetch_all_books().await
  }

  async fn save(&self, ticket: WriteTicket, remote: Vec<ApiBook>) -> Result<bool> {
    let list_id = self.list_id;
    let books: Vec<Book> = remote
      .into_iter()
      .filter(|b| b.list_id == list_id)
      .map(Book::from)
      .collect();
    let now = self.repo.clock.now();
    self
      .repo
      .store
      .run(move |s| s.replace_books(&ticket, list_id, &books, now))
      .await
  }
}

// ============================================================================
// Details of one book: upserted, refreshed when missing or old
// ============================================================================

struct DetailsResource {
  repo: BooksRepository,
  id: i64,
}

#[async_trait]
impl CachedResource for DetailsResource {
  type Value = Option<BookDetails>;
  /// `None` when the catalog answered "not found"
  type Remote = Option<ApiBookDetails>;

  fn describe(&self) -> String {
    format!("details of book {}", self.id)
  }

  fn watch(&self) -> BoxStream<'static, Result<Option<BookDetails>>> {
    let id = self.id;
    observe(self.repo.store.clone(), Partition::Details(id), move |s| {
      s.details(id)
    })
    .boxed()
  }

  async fn is_stale(&self, cached: Option<&Option<BookDetails>>) -> Result<bool> {
    if cached.is_none() {
      return Ok(true);
    }
    let id = self.id;
    let updated_at = self
      .repo
      .store
      .run(move |s| s.details_updated_at(id))
      .await?;
    Ok(
      self
        .repo
        .policy
        .details_stale(updated_at, self.repo.clock.now()),
    )
  }

  fn begin_write(&self) -> WriteTicket {
    self.repo.store.begin_write(Partition::Details(self.id))
  }

  async fn fetch(&self) -> Result<Option<ApiBookDetails>, FetchError> {
    match self.repo.remote.fetch_book_details(self.id).await {
      Ok(details) => Ok(Some(details)),
      Err(FetchError::NotFound) => Ok(None),
      Err(e) => Err(e),
    }
  }

  async fn save(&self, ticket: WriteTicket, remote: Option<ApiBookDetails>) -> Result<bool> {
    // Not found: the cached row, if any, is left alone
    let Some(details) = remote else {
      return Ok(true);
    };
    let details = BookDetails::from(details);
    let now = self.repo.clock.now();
    self
      .repo
      .store
      .run(move |s| s.upsert_details(&ticket, &details, now))
      .await
  }
}
