//! All books of one list, enriched with authors as details arrive.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{BookCard, ScreenHandle, TaskScope};
use crate::cache::ResourceState;
use crate::catalog::BooksRepository;

/// Title shown when the list is not (yet) known
pub const FALLBACK_TITLE: &str = "Books";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookListEvent {
  Enter(i64),
  Refresh,
  Back,
  ClickBook(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookListEffect {
  NavigateBack,
  NavigateToBook(i64),
  ShowMessage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookListState {
  pub list_id: Option<i64>,
  pub list_title: String,
  pub is_loading: bool,
  pub error: Option<String>,
  pub items: Vec<BookCard>,
}

pub type BookListHandle = ScreenHandle<BookListEvent, BookListState, BookListEffect>;

/// Start an empty list screen. Nothing loads until [`BookListEvent::Enter`].
pub fn spawn(repo: BooksRepository) -> BookListHandle {
  let (events_tx, events_rx) = mpsc::unbounded_channel();
  let (state_tx, state_rx) = watch::channel(BookListState::default());
  let (effects_tx, effects_rx) = mpsc::unbounded_channel();
  let (internal_tx, internal_rx) = mpsc::unbounded_channel();

  let screen = BookListScreen {
    repo,
    state: Arc::new(state_tx),
    effects: effects_tx,
    internal: internal_tx,
    current: None,
    generation: 0,
    jobs: TaskScope::new(),
  };

  let task = tokio::spawn(screen.run(events_rx, internal_rx));
  ScreenHandle::new(events_tx, state_rx, effects_rx, task)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Job {
  Title,
  Books,
  Author(i64),
}

enum Internal {
  BooksLoaded { generation: u64, ids: Vec<i64> },
}

struct BookListScreen {
  repo: BooksRepository,
  state: Arc<watch::Sender<BookListState>>,
  effects: mpsc::UnboundedSender<BookListEffect>,
  internal: mpsc::UnboundedSender<Internal>,
  current: Option<i64>,
  generation: u64,
  jobs: TaskScope<Job>,
}

impl BookListScreen {
  async fn run(
    mut self,
    mut events: mpsc::UnboundedReceiver<BookListEvent>,
    mut internal: mpsc::UnboundedReceiver<Internal>,
  ) {
    loop {
      tokio::select! {
        biased;
        event = events.recv() => match event {
          Some(event) => self.handle(event).await,
          None => break,
        },
        Some(message) = internal.recv() => self.handle_internal(message).await,
      }
    }
    debug!("Book list screen stopped");
  }

  async fn handle(&mut self, event: BookListEvent) {
    debug!(?event, "Book list event");
    match event {
      BookListEvent::Enter(list_id) => self.enter(list_id).await,
      BookListEvent::Refresh => {
        if let Some(list_id) = self.current {
          self.generation += 1;
          self.jobs.retain(|job| *job == Job::Title).await;
          self.start_books(list_id).await;
        }
      }
      BookListEvent::Back => {
        let _ = self.effects.send(BookListEffect::NavigateBack);
      }
      BookListEvent::ClickBook(book_id) => {
        let _ = self.effects.send(BookListEffect::NavigateToBook(book_id));
      }
    }
  }

  async fn handle_internal(&mut self, message: Internal) {
    match message {
      Internal::BooksLoaded { generation, ids } => {
        if generation != self.generation {
          return;
        }
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        self
          .jobs
          .retain(|job| match job {
            Job::Author(id) => wanted.contains(id),
            _ => true,
          })
          .await;
        for id in ids {
          if !self.jobs.is_running(&Job::Author(id)) {
            self.start_author(id).await;
          }
        }
      }
    }
  }

  async fn enter(&mut self, list_id: i64) {
    if self.current == Some(list_id) {
      debug!(list_id, "Already showing list");
      return;
    }

    self.current = Some(list_id);
    self.generation += 1;
    self.jobs.cancel_all().await;
    self.state.send_replace(BookListState {
      list_id: Some(list_id),
      list_title: FALLBACK_TITLE.to_string(),
      is_loading: true,
      ..Default::default()
    });

    self.start_title(list_id).await;
    self.start_books(list_id).await;
  }

  async fn start_title(&mut self, list_id: i64) {
    let repo = self.repo.clone();
    let state = self.state.clone();

    self
      .jobs
      .spawn(Job::Title, async move {
        let mut stream = repo.book_lists();
        while let Some(res) = stream.next().await {
          if let ResourceState::Success(lists) = res {
            let title = lists
              .into_iter()
              .find(|l| l.id == list_id)
              .map(|l| l.title)
              .filter(|t| !t.trim().is_empty())
              .unwrap_or_else(|| FALLBACK_TITLE.to_string());
            state.send_if_modified(|s| {
              if s.list_title == title {
                return false;
              }
              s.list_title = title;
              true
            });
          }
        }
      })
      .await;
  }

  async fn start_books(&mut self, list_id: i64) {
    let generation = self.generation;
    let repo = self.repo.clone();
    let state = self.state.clone();
    let effects = self.effects.clone();
    let internal = self.internal.clone();

    self
      .jobs
      .spawn(Job::Books, async move {
        let mut stream = repo.books_by_list(list_id);
        while let Some(res) = stream.next().await {
          match res {
            ResourceState::Loading => state.send_modify(|s| {
              s.is_loading = true;
              s.error = None;
            }),
            ResourceState::Error(msg) => {
              let msg = if msg.trim().is_empty() {
                "Failed to load books".to_string()
              } else {
                msg
              };
              state.send_modify(|s| {
                s.is_loading = false;
                s.error = Some(msg.clone());
              });
              let _ = effects.send(BookListEffect::ShowMessage(msg));
            }
            ResourceState::Success(books) => {
              let ids: Vec<i64> = books.iter().map(|b| b.id).collect();
              state.send_modify(|s| {
                let items = books
                  .iter()
                  .map(|book| {
                    let mut card = BookCard::from(book);
                    // Keep authors found earlier
                    card.author = s
                      .items
                      .iter()
                      .find(|old| old.id == book.id)
                      .and_then(|old| old.author.clone());
                    card
                  })
                  .collect();
                s.items = items;
                s.is_loading = false;
                s.error = None;
              });
              let _ = internal.send(Internal::BooksLoaded { generation, ids });
            }
          }
        }
      })
      .await;
  }

  /// Fill in one row's author from the book's details. Failures stay silent.
  async fn start_author(&mut self, book_id: i64) {
    let repo = self.repo.clone();
    let state = self.state.clone();

    self
      .jobs
      .spawn(Job::Author(book_id), async move {
        let mut stream = repo.book_details(book_id);
        while let Some(res) = stream.next().await {
          match res {
            ResourceState::Success(Some(details)) => {
              let author = match details.author {
                Some(author) if !author.trim().is_empty() => author,
                _ => continue,
              };
              state.send_if_modified(|s| match s.items.iter_mut().find(|c| c.id == book_id) {
                Some(card) if card.author.as_deref() != Some(author.as_str()) => {
                  card.author = Some(author);
                  true
                }
                _ => false,
              });
            }
            ResourceState::Error(msg) => warn!(book_id, "Author lookup failed: {}", msg),
            _ => {}
          }
        }
      })
      .await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ManualClock, SqliteStore, StalenessPolicy};
  use crate::catalog::error::FetchError;
  use crate::catalog::mock::{api_book, api_details, api_list, MockRemote};
  use crate::catalog::types::BookDetails;
  use crate::screens::testing::wait_for;
  use chrono::Utc;
  use std::time::Duration;

  struct Fixture {
    remote: Arc<MockRemote>,
    store: Arc<SqliteStore>,
    repo: BooksRepository,
  }

  fn fixture() -> Fixture {
    let remote = Arc::new(MockRemote::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = BooksRepository::new(
      remote.clone(),
      store.clone(),
      Arc::new(ManualClock::fixed()),
      StalenessPolicy::default(),
    );
    remote.set_lists(Ok(vec![api_list(7, "Sci-fi"), api_list(8, "Plays")]));
    remote.set_books(Ok(vec![
      api_book(1, 7, "Dune"),
      api_book(2, 7, "Neuromancer"),
      api_book(3, 8, "Hamlet"),
    ]));
    remote.set_details(1, Ok(api_details(1, 7, "Dune", "Frank Herbert")));
    remote.set_details(2, Ok(api_details(2, 7, "Neuromancer", "  ")));
    Fixture {
      remote,
      store,
      repo,
    }
  }

  #[tokio::test]
  async fn test_enter_loads_books_and_authors() {
    let f = fixture();
    let handle = spawn(f.repo.clone());
    handle.send(BookListEvent::Enter(7));

    let mut rx = handle.state();
    let state = wait_for(&mut rx, |s| {
      s.items.len() == 2 && s.items[0].author.is_some() && s.list_title == "Sci-fi"
    })
    .await;

    assert_eq!(state.list_id, Some(7));
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
    assert_eq!(state.items[0].title, "Dune");
    assert_eq!(state.items[0].author.as_deref(), Some("Frank Herbert"));

    // A blank author never fills the row
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state().borrow().items[1].author, None);
    assert_eq!(f.remote.details_calls(), 2);
  }

  #[tokio::test]
  async fn test_reenter_same_list_is_noop() {
    let f = fixture();
    let handle = spawn(f.repo.clone());
    handle.send(BookListEvent::Enter(7));

    let mut rx = handle.state();
    wait_for(&mut rx, |s| s.items.len() == 2 && s.items[0].author.is_some()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = (
      f.remote.list_calls(),
      f.remote.book_calls(),
      f.remote.details_calls(),
    );
    let before = rx.borrow_and_update().clone();

    handle.send(BookListEvent::Enter(7));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
      (
        f.remote.list_calls(),
        f.remote.book_calls(),
        f.remote.details_calls()
      ),
      calls
    );
    assert!(!rx.has_changed().unwrap());
    assert_eq!(*rx.borrow(), before);
  }

  #[tokio::test]
  async fn test_switching_lists_drops_pending_save() {
    let f = fixture();
    f.remote.set_delay(Duration::from_millis(100));
    let handle = spawn(f.repo.clone());

    handle.send(BookListEvent::Enter(7));
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.send(BookListEvent::Enter(8));

    let mut rx = handle.state();
    let state = wait_for(&mut rx, |s| s.items.len() == 1 && s.list_title == "Plays").await;
    assert_eq!(state.list_id, Some(8));
    assert_eq!(state.items[0].title, "Hamlet");

    tokio::time::sleep(Duration::from_millis(200)).await;
    // The fetch for list 7 was cancelled before it could be stored
    assert!(f.store.books(7, None).unwrap().is_empty());
    assert_eq!(handle.state().borrow().list_id, Some(8));
  }

  #[tokio::test]
  async fn test_author_failures_stay_silent() {
    let f = fixture();
    f.remote.set_details(1, Err(FetchError::Status(500)));
    let mut handle = spawn(f.repo.clone());
    handle.send(BookListEvent::Enter(7));

    let mut rx = handle.state();
    wait_for(&mut rx, |s| s.items.len() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = handle.state().borrow().clone();
    assert_eq!(state.error, None);
    assert!(state.items.iter().all(|c| c.author.is_none()));

    handle.send(BookListEvent::Back);
    assert_eq!(handle.next_effect().await, Some(BookListEffect::NavigateBack));
  }

  #[tokio::test]
  async fn test_same_author_publishes_nothing() {
    let f = fixture();
    let handle = spawn(f.repo.clone());
    handle.send(BookListEvent::Enter(7));

    let mut rx = handle.state();
    wait_for(&mut rx, |s| s.items.len() == 2 && s.items[0].author.is_some()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    rx.borrow_and_update();

    // New details, same author
    let ticket = f.store.begin_write(crate::cache::Partition::Details(1));
    let details = BookDetails {
      id: 1,
      list_id: 7,
      title: "Dune".to_string(),
      cover_url: String::new(),
      author: Some("Frank Herbert".to_string()),
      isbn: None,
      publication_date: None,
      description: Some("Revised".to_string()),
    };
    assert!(f.store.upsert_details(&ticket, &details, Utc::now()).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_books_error_keeps_title_and_reports() {
    let f = fixture();
    f.remote.set_books(Err(FetchError::Unreachable));
    let mut handle = spawn(f.repo.clone());
    handle.send(BookListEvent::Enter(7));

    let mut rx = handle.state();
    let state = wait_for(&mut rx, |s| s.error.is_some()).await;
    assert_eq!(state.error.as_deref(), Some("No internet connection"));
    assert!(!state.is_loading);
    assert_eq!(
      handle.next_effect().await,
      Some(BookListEffect::ShowMessage(
        "No internet connection".to_string()
      ))
    );
  }
}
