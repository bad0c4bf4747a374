//! Per-screen state machines.
//!
//! Each screen runs as its own task that owns a [`TaskScope`] of resource
//! subscriptions. Intents are queued and handled one at a time in arrival
//! order; resource streams fold their states into a shared `watch` channel
//! that the front end observes. Dropping a [`ScreenHandle`] tears the screen
//! and every task it started down.

pub mod book_details;
pub mod book_list;
pub mod home;
mod scope;

pub use scope::TaskScope;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::catalog::types::Book;

/// A book row as shown in previews and list views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookCard {
  pub id: i64,
  pub title: String,
  pub thumbnail_url: String,
  /// Filled in later from the book's details, when known
  pub author: Option<String>,
}

impl From<&Book> for BookCard {
  fn from(book: &Book) -> Self {
    BookCard {
      id: book.id,
      title: book.title.clone(),
      thumbnail_url: book.cover_url.clone(),
      author: None,
    }
  }
}

/// Front-end side of a running screen.
pub struct ScreenHandle<Event, State, Effect> {
  events: mpsc::UnboundedSender<Event>,
  state: watch::Receiver<State>,
  effects: mpsc::UnboundedReceiver<Effect>,
  task: JoinHandle<()>,
}

impl<Event, State, Effect> ScreenHandle<Event, State, Effect> {
  pub(crate) fn new(
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<State>,
    effects: mpsc::UnboundedReceiver<Effect>,
    task: JoinHandle<()>,
  ) -> Self {
    Self {
      events,
      state,
      effects,
      task,
    }
  }

  /// Queue an intent. Intents sent after the screen stopped are dropped.
  pub fn send(&self, event: Event) {
    let _ = self.events.send(event);
  }

  /// A receiver of the screen state, starting at the current value.
  pub fn state(&self) -> watch::Receiver<State> {
    self.state.clone()
  }

  /// Next one-shot effect (navigation, message).
  pub async fn next_effect(&mut self) -> Option<Effect> {
    self.effects.recv().await
  }
}

impl<Event, State, Effect> Drop for ScreenHandle<Event, State, Effect> {
  fn drop(&mut self) {
    self.task.abort();
  }
}
