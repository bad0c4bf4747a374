//! One book in full.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{ScreenHandle, TaskScope};
use crate::cache::ResourceState;
use crate::catalog::types::BookDetails;
use crate::catalog::BooksRepository;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookDetailsEvent {
  Enter(i64),
  Retry,
  Back,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookDetailsEffect {
  NavigateBack,
  ShowMessage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookDetailsState {
  pub book_id: Option<i64>,
  pub is_loading: bool,
  pub error: Option<String>,
  pub details: Option<BookDetailsUi>,
}

/// Details ready for display; missing fields read "Unknown"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDetailsUi {
  pub id: i64,
  pub list_id: i64,
  pub title: String,
  pub author: String,
  pub isbn: String,
  pub publication_date: String,
  pub cover_url: String,
  pub description: String,
}

impl From<BookDetails> for BookDetailsUi {
  fn from(d: BookDetails) -> Self {
    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| UNKNOWN.to_string());
    Self {
      id: d.id,
      list_id: d.list_id,
      title: d.title,
      author: or_unknown(d.author),
      isbn: or_unknown(d.isbn),
      publication_date: or_unknown(d.publication_date),
      cover_url: d.cover_url,
      description: or_unknown(d.description),
    }
  }
}

pub type BookDetailsHandle = ScreenHandle<BookDetailsEvent, BookDetailsState, BookDetailsEffect>;

pub fn spawn(repo: BooksRepository) -> BookDetailsHandle {
  let (events_tx, events_rx) = mpsc::unbounded_channel();
  let (state_tx, state_rx) = watch::channel(BookDetailsState::default());
  let (effects_tx, effects_rx) = mpsc::unbounded_channel();

  let screen = BookDetailsScreen {
    repo,
    state: Arc::new(state_tx),
    effects: effects_tx,
    current: None,
    load: TaskScope::new(),
  };

  let task = tokio::spawn(screen.run(events_rx));
  ScreenHandle::new(events_tx, state_rx, effects_rx, task)
}

struct BookDetailsScreen {
  repo: BooksRepository,
  state: Arc<watch::Sender<BookDetailsState>>,
  effects: mpsc::UnboundedSender<BookDetailsEffect>,
  current: Option<i64>,
  load: TaskScope<()>,
}

impl BookDetailsScreen {
  async fn run(mut self, mut events: mpsc::UnboundedReceiver<BookDetailsEvent>) {
    while let Some(event) = events.recv().await {
      debug!(?event, "Book details event");
      match event {
        BookDetailsEvent::Enter(book_id) => {
          if self.current == Some(book_id) {
            continue;
          }
          self.current = Some(book_id);
          self.load.cancel_all().await;
          self.state.send_replace(BookDetailsState {
            book_id: Some(book_id),
            is_loading: true,
            ..Default::default()
          });
          self.start(book_id).await;
        }
        BookDetailsEvent::Retry => {
          if let Some(book_id) = self.current {
            self.start(book_id).await;
          }
        }
        BookDetailsEvent::Back => {
          let _ = self.effects.send(BookDetailsEffect::NavigateBack);
        }
      }
    }
    debug!("Book details screen stopped");
  }

  async fn start(&mut self, book_id: i64) {
    let repo = self.repo.clone();
    let state = self.state.clone();
    let effects = self.effects.clone();

    self
      .load
      .spawn((), async move {
        let mut stream = repo.book_details(book_id);
        while let Some(res) = stream.next().await {
          match res {
            ResourceState::Loading => state.send_modify(|s| {
              s.is_loading = true;
              s.error = None;
            }),
            ResourceState::Error(msg) => {
              let msg = if msg.trim().is_empty() {
                "Failed to load a book".to_string()
              } else {
                msg
              };
              // Details already on screen stay there
              state.send_modify(|s| {
                s.is_loading = false;
                s.error = Some(msg.clone());
              });
              let _ = effects.send(BookDetailsEffect::ShowMessage(msg));
            }
            ResourceState::Success(None) => state.send_modify(|s| {
              s.is_loading = false;
              s.error = Some("Book was not found".to_string());
            }),
            ResourceState::Success(Some(details)) => state.send_modify(|s| {
              s.is_loading = false;
              s.error = None;
              s.details = Some(details.into());
            }),
          }
        }
      })
      .await;
  }
}
