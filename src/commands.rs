//! Command-line front end: runs one screen and prints what it shows.
//!
//! Every distinct state is rendered as plain text, effects are printed as
//! they happen. A screen that stays quiet (and is not loading) for the idle
//! period ends the command, as does Ctrl-C.

use color_eyre::{eyre::eyre, Result};
use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::catalog::BooksRepository;
use crate::screens::book_details::{self, BookDetailsEffect, BookDetailsEvent, BookDetailsState};
use crate::screens::book_list::{self, BookListEffect, BookListEvent, BookListState};
use crate::screens::home::{self, HomeEffect, HomeState};
use crate::screens::{BookCard, ScreenHandle};

/// Plain-text view of a screen state or effect
pub trait Render {
  fn render(&self) -> String;

  /// Whether the command should keep waiting even when nothing changes
  fn is_busy(&self) -> bool {
    false
  }
}

pub async fn run_home(
  repo: BooksRepository,
  preview_limit: usize,
  idle: Duration,
  out: &mut impl Write,
) -> Result<()> {
  let handle = home::spawn(repo, preview_limit);
  drive(handle, idle, out).await
}

pub async fn run_list(
  repo: BooksRepository,
  list_id: i64,
  idle: Duration,
  out: &mut impl Write,
) -> Result<()> {
  let handle = book_list::spawn(repo);
  handle.send(BookListEvent::Enter(list_id));
  drive(handle, idle, out).await
}

pub async fn run_book(
  repo: BooksRepository,
  book_id: i64,
  idle: Duration,
  out: &mut impl Write,
) -> Result<()> {
  let handle = book_details::spawn(repo);
  handle.send(BookDetailsEvent::Enter(book_id));
  drive(handle, idle, out).await
}

async fn drive<Ev, S, Ef>(
  mut handle: ScreenHandle<Ev, S, Ef>,
  idle: Duration,
  out: &mut impl Write,
) -> Result<()>
where
  S: Render,
  Ef: Render,
{
  let mut state = handle.state();
  let mut last = state.borrow_and_update().render();
  print(out, &last)?;

  let deadline = tokio::time::sleep(idle);
  tokio::pin!(deadline);

  loop {
    tokio::select! {
      changed = state.changed() => {
        if changed.is_err() {
          break;
        }
        let text = state.borrow_and_update().render();
        if text != last {
          print(out, &text)?;
          last = text;
        }
        deadline.as_mut().reset(Instant::now() + idle);
      }
      effect = handle.next_effect() => {
        match effect {
          Some(effect) => print(out, &format!("> {}", effect.render()))?,
          None => break,
        }
        deadline.as_mut().reset(Instant::now() + idle);
      }
      _ = &mut deadline => {
        if !state.borrow().is_busy() {
          debug!("Screen idle, exiting");
          break;
        }
        deadline.as_mut().reset(Instant::now() + idle);
      }
      _ = tokio::signal::ctrl_c() => {
        debug!("Interrupted");
        break;
      }
    }
  }

  Ok(())
}

fn print(out: &mut impl Write, text: &str) -> Result<()> {
  writeln!(out, "{}", text).map_err(|e| eyre!("Failed to write output: {}", e))?;
  out
    .flush()
    .map_err(|e| eyre!("Failed to write output: {}", e))
}

fn card_line(card: &BookCard) -> String {
  match &card.author {
    Some(author) => format!("  [{}] {} by {}", card.id, card.title, author),
    None => format!("  [{}] {}", card.id, card.title),
  }
}

impl Render for HomeState {
  fn render(&self) -> String {
    let mut s = String::from("Book lists");
    if self.is_loading {
      s.push_str(" (loading)");
    }
    if let Some(error) = &self.error {
      let _ = write!(s, "\n! {}", error);
    }
    for section in &self.sections {
      let _ = write!(s, "\n\n{} [list {}]", section.title, section.list_id);
      if section.is_loading {
        s.push_str(" (loading)");
      }
      if let Some(error) = &section.error {
        let _ = write!(s, "\n  ! {}", error);
      }
      for card in &section.preview {
        let _ = write!(s, "\n{}", card_line(card));
      }
    }
    s.push('\n');
    s
  }

  fn is_busy(&self) -> bool {
    self.is_loading || self.sections.iter().any(|s| s.is_loading)
  }
}

impl Render for BookListState {
  fn render(&self) -> String {
    let mut s = match self.list_id {
      Some(id) => format!("{} [list {}]", self.list_title, id),
      None => self.list_title.clone(),
    };
    if self.is_loading {
      s.push_str(" (loading)");
    }
    if let Some(error) = &self.error {
      let _ = write!(s, "\n! {}", error);
    }
    for card in &self.items {
      let _ = write!(s, "\n{}", card_line(card));
    }
    s.push('\n');
    s
  }

  fn is_busy(&self) -> bool {
    self.is_loading
  }
}

impl Render for BookDetailsState {
  fn render(&self) -> String {
    let mut s = match self.book_id {
      Some(id) => format!("Book {}", id),
      None => "Book".to_string(),
    };
    if self.is_loading {
      s.push_str(" (loading)");
    }
    if let Some(error) = &self.error {
      let _ = write!(s, "\n! {}", error);
    }
    if let Some(d) = &self.details {
      let _ = write!(
        s,
        "\n{}\n  Author:      {}\n  ISBN:        {}\n  Published:   {}\n  List:        {}\n  Cover:       {}\n\n{}",
        d.title, d.author, d.isbn, d.publication_date, d.list_id, d.cover_url, d.description
      );
    }
    s.push('\n');
    s
  }

  fn is_busy(&self) -> bool {
    self.is_loading
  }
}

impl Render for HomeEffect {
  fn render(&self) -> String {
    match self {
      HomeEffect::NavigateToList(id) => format!("open list {}", id),
      HomeEffect::NavigateToBook(id) => format!("open book {}", id),
      HomeEffect::ShowMessage(msg) => msg.clone(),
    }
  }
}

impl Render for BookListEffect {
  fn render(&self) -> String {
    match self {
      BookListEffect::NavigateBack => "back".to_string(),
      BookListEffect::NavigateToBook(id) => format!("open book {}", id),
      BookListEffect::ShowMessage(msg) => msg.clone(),
    }
  }
}

impl Render for BookDetailsEffect {
  fn render(&self) -> String {
    match self {
      BookDetailsEffect::NavigateBack => "back".to_string(),
      BookDetailsEffect::ShowMessage(msg) => msg.clone(),
    }
  }
}
