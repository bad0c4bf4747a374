//! Scripted [`RemoteSource`] for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::api_types::{ApiBook, ApiBookDetails, ApiBookList};
use super::client::RemoteSource;
use super::error::FetchError;

pub struct MockRemote {
  lists: Mutex<Result<Vec<ApiBookList>, FetchError>>,
  books: Mutex<Result<Vec<ApiBook>, FetchError>>,
  details: Mutex<HashMap<i64, Result<ApiBookDetails, FetchError>>>,
  delay: Mutex<Option<Duration>>,
  list_calls: AtomicUsize,
  book_calls: AtomicUsize,
  details_calls: AtomicUsize,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
}

/// Counts a call as in flight until dropped, including when the caller is aborted
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl MockRemote {
  pub fn new() -> Self {
    Self {
      lists: Mutex::new(Ok(Vec::new())),
      books: Mutex::new(Ok(Vec::new())),
      details: Mutex::new(HashMap::new()),
      delay: Mutex::new(None),
      list_calls: AtomicUsize::new(0),
      book_calls: AtomicUsize::new(0),
      details_calls: AtomicUsize::new(0),
      in_flight: AtomicUsize::new(0),
      max_in_flight: AtomicUsize::new(0),
    }
  }

  pub fn set_lists(&self, lists: Result<Vec<ApiBookList>, FetchError>) {
    *self.lists.lock().unwrap() = lists;
  }

  pub fn set_books(&self, books: Result<Vec<ApiBook>, FetchError>) {
    *self.books.lock().unwrap() = books;
  }

  pub fn set_details(&self, id: i64, details: Result<ApiBookDetails, FetchError>) {
    self.details.lock().unwrap().insert(id, details);
  }

  /// Every call sleeps this long before answering
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn list_calls(&self) -> usize {
    self.list_calls.load(Ordering::SeqCst)
  }

  pub fn book_calls(&self) -> usize {
    self.book_calls.load(Ordering::SeqCst)
  }

  pub fn details_calls(&self) -> usize {
    self.details_calls.load(Ordering::SeqCst)
  }

  /// Highest number of calls that were running at the same time
  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  pub fn reset_max_in_flight(&self) {
    self
      .max_in_flight
      .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
  }

  async fn pause(&self) {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    let _guard = InFlight(&self.in_flight);
    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
  }
}

#[async_trait]
impl RemoteSource for MockRemote {
  async fn fetch_all_books(&self) -> Result<Vec<ApiBook>, FetchError> {
    self.book_calls.fetch_add(1, Ordering::SeqCst);
    self.pause().await;
    self.books.lock().unwrap().clone()
  }

  async fn fetch_book_details(&self, id: i64) -> Result<ApiBookDetails, FetchError> {
    self.details_calls.fetch_add(1, Ordering::SeqCst);
    self.pause().await;
    self
      .details
      .lock()
      .unwrap()
      .get(&id)
      .cloned()
      .unwrap_or(Err(FetchError::NotFound))
  }

  async fn fetch_all_lists(&self) -> Result<Vec<ApiBookList>, FetchError> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    self.pause().await;
    self.lists.lock().unwrap().clone()
  }
}

pub fn api_list(id: i64, title: &str) -> ApiBookList {
  ApiBookList {
    id,
    title: title.to_string(),
  }
}

pub fn api_book(id: i64, list_id: i64, title: &str) -> ApiBook {
  ApiBook {
    id,
    list_id,
    title: title.to_string(),
    cover_url: format!("https://covers.example/{}.jpg", id),
  }
}

pub fn api_details(id: i64, list_id: i64, title: &str, author: &str) -> ApiBookDetails {
  ApiBookDetails {
    id,
    list_id,
    isbn: Some(format!("978-{:010}", id)),
    publication_date: Some("2001-01-01T00:00:00.000Z".to_string()),
    author: Some(author.to_string()),
    title: title.to_string(),
    cover_url: format!("https://covers.example/{}.jpg", id),
    description: Some(format!("About {}", title)),
  }
}
