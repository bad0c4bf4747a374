//! Lists overview: every book list as a section with a short preview.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{BookCard, ScreenHandle, TaskScope};
use crate::cache::ResourceState;
use crate::catalog::types::BookList;
use crate::catalog::BooksRepository;

/// How many books a section previews unless configured otherwise
pub const DEFAULT_PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeEvent {
  Load,
  Refresh,
  /// Re-run the preview of one section only
  RetrySection(i64),
  ClickSeeAll(i64),
  ClickBook(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeEffect {
  NavigateToList(i64),
  NavigateToBook(i64),
  ShowMessage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HomeState {
  pub is_loading: bool,
  pub sections: Vec<HomeSection>,
  pub error: Option<String>,
}

/// One list with its preview, loaded independently of the others
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeSection {
  pub list_id: i64,
  pub title: String,
  pub preview: Vec<BookCard>,
  pub is_loading: bool,
  pub error: Option<String>,
}

impl HomeSection {
  fn new(list: &BookList) -> Self {
    Self {
      list_id: list.id,
      title: list.title.clone(),
      preview: Vec::new(),
      is_loading: true,
      error: None,
    }
  }
}

pub type HomeHandle = ScreenHandle<HomeEvent, HomeState, HomeEffect>;

/// Start the home screen. It loads immediately.
pub fn spawn(repo: BooksRepository, preview_limit: usize) -> HomeHandle {
  let (events_tx, events_rx) = mpsc::unbounded_channel();
  let (state_tx, state_rx) = watch::channel(HomeState::default());
  let (effects_tx, effects_rx) = mpsc::unbounded_channel();
  let (internal_tx, internal_rx) = mpsc::unbounded_channel();

  let screen = HomeScreen {
    repo,
    preview_limit,
    state: Arc::new(state_tx),
    effects: effects_tx,
    internal: internal_tx,
    generation: 0,
    lists: TaskScope::new(),
    previews: TaskScope::new(),
  };

  let _ = events_tx.send(HomeEvent::Load);
  let task = tokio::spawn(screen.run(events_rx, internal_rx));
  ScreenHandle::new(events_tx, state_rx, effects_rx, task)
}

/// Messages from the screen's own tasks back to its loop
enum Internal {
  ListsLoaded { generation: u64, lists: Vec<BookList> },
}

struct HomeScreen {
  repo: BooksRepository,
  preview_limit: usize,
  state: Arc<watch::Sender<HomeState>>,
  effects: mpsc::UnboundedSender<HomeEffect>,
  internal: mpsc::UnboundedSender<Internal>,
  /// Bumped on every (re)load; messages from older loads are ignored
  generation: u64,
  lists: TaskScope<()>,
  previews: TaskScope<i64>,
}

impl HomeScreen {
  async fn run(
    mut self,
    mut events: mpsc::UnboundedReceiver<HomeEvent>,
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
    debug!("Home screen stopped");
  }

  async fn handle(&mut self, event: HomeEvent) {
    debug!(?event, "Home event");
    match event {
      HomeEvent::Load | HomeEvent::Refresh => self.load().await,
      HomeEvent::RetrySection(list_id) => {
        let known = self
          .state
          .borrow()
          .sections
          .iter()
          .any(|s| s.list_id == list_id);
        if known {
          self.start_preview(list_id).await;
        } else {
          debug!(list_id, "Ignoring retry for unknown section");
        }
      }
      HomeEvent::ClickSeeAll(list_id) => {
        let _ = self.effects.send(HomeEffect::NavigateToList(list_id));
      }
      HomeEvent::ClickBook(book_id) => {
        let _ = self.effects.send(HomeEffect::NavigateToBook(book_id));
      }
    }
  }

  async fn handle_internal(&mut self, message: Internal) {
    match message {
      Internal::ListsLoaded { generation, lists } => {
        if generation != self.generation {
          return;
        }
        let ids: HashSet<i64> = lists.iter().map(|l| l.id).collect();
        self.previews.retain(|id| ids.contains(id)).await;
        for list in &lists {
          if !self.previews.is_running(&list.id) {
            self.start_preview(list.id).await;
          }
        }
      }
    }
  }

  async fn load(&mut self) {
    self.generation += 1;
    self.previews.cancel_all().await;

    let generation = self.generation;
    let repo = self.repo.clone();
    let state = self.state.clone();
    let effects = self.effects.clone();
    let internal = self.internal.clone();

    self
      .lists
      .spawn((), async move {
        let mut stream = repo.book_lists();
        while let Some(res) = stream.next().await {
          match res {
            ResourceState::Loading => state.send_modify(|s| {
              s.is_loading = true;
              s.error = None;
            }),
            ResourceState::Error(msg) => {
              let msg = or_default(msg, "Failed to load lists");
              state.send_modify(|s| {
                s.is_loading = false;
                s.error = Some(msg.clone());
              });
              let _ = effects.send(HomeEffect::ShowMessage(msg));
            }
            ResourceState::Success(lists) => {
              // Sections show up at once; previews fill them in
              state.send_modify(|s| {
                s.is_loading = false;
                s.error = None;
                s.sections = merge_sections(&s.sections, &lists);
              });
              let _ = internal.send(Internal::ListsLoaded { generation, lists });
            }
          }
        }
      })
      .await;
  }

  async fn start_preview(&mut self, list_id: i64) {
    let repo = self.repo.clone();
    let state = self.state.clone();
    let effects = self.effects.clone();
    let limit = self.preview_limit;

    self
      .previews
      .spawn(list_id, async move {
        let mut stream = repo.books(list_id, limit);
        while let Some(res) = stream.next().await {
          match res {
            ResourceState::Loading => update_section(&state, list_id, |s| {
              s.is_loading = true;
              s.error = None;
            }),
            ResourceState::Error(msg) => {
              let msg = or_default(msg, "Failed to load books");
              update_section(&state, list_id, |s| {
                s.is_loading = false;
                s.error = Some(msg.clone());
              });
              let _ = effects.send(HomeEffect::ShowMessage(msg));
            }
            ResourceState::Success(books) => update_section(&state, list_id, |s| {
              s.is_loading = false;
              s.error = None;
              s.preview = books.iter().map(BookCard::from).collect();
            }),
          }
        }
      })
      .await;
  }
}

/// New sections in list order, keeping what is already known about lists
/// that were there before.
fn merge_sections(current: &[HomeSection], lists: &[BookList]) -> Vec<HomeSection> {
  lists
    .iter()
    .map(|list| match current.iter().find(|s| s.list_id == list.id) {
      Some(existing) => HomeSection {
        title: list.title.clone(),
        ..existing.clone()
      },
      None => HomeSection::new(list),
    })
    .collect()
}

fn update_section(
  state: &watch::Sender<HomeState>,
  list_id: i64,
  f: impl FnOnce(&mut HomeSection),
) {
  state.send_if_modified(|s| match s.sections.iter_mut().find(|x| x.list_id == list_id) {
    Some(section) => {
      let before = section.clone();
      f(section);
      *section != before
    }
    None => false,
  });
}

fn or_default(msg: String, fallback: &str) -> String {
  if msg.trim().is_empty() {
    fallback.to_string()
  } else {
    msg
  }
}
