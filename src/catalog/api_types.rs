//! Serde-deserializable types matching the catalog API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;

use super::types::{Book, BookDetails, BookList};

// ============================================================================
// GET /lists
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiBookList {
  pub id: i64,
  #[serde(default)]
  pub title: String,
}

// ============================================================================
// GET /books
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiBook {
  pub id: i64,
  #[serde(rename = "list_id")]
  pub list_id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(rename = "img", default)]
  pub cover_url: String,
}

// ============================================================================
// GET /books/{id}
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiBookDetails {
  pub id: i64,
  #[serde(rename = "list_id")]
  pub list_id: i64,
  pub isbn: Option<String>,
  #[serde(rename = "publication_date")]
  pub publication_date: Option<String>,
  pub author: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(rename = "img", default)]
  pub cover_url: String,
  pub description: Option<String>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiBookList> for BookList {
  fn from(list: ApiBookList) -> Self {
    BookList {
      id: list.id,
      title: list.title,
    }
  }
}

impl From<ApiBook> for Book {
  fn from(book: ApiBook) -> Self {
    Book {
      id: book.id,
      list_id: book.list_id,
      title: book.title,
      cover_url: book.cover_url,
    }
  }
}

impl From<ApiBookDetails> for BookDetails {
  fn from(d: ApiBookDetails) -> Self {
    BookDetails {
      id: d.id,
      list_id: d.list_id,
      title: d.title,
      cover_url: d.cover_url,
      author: non_blank(d.author),
      isbn: non_blank(d.isbn),
      publication_date: non_blank(d.publication_date),
      description: non_blank(d.description),
    }
  }
}

/// The API sends empty strings for unknown optional fields
fn non_blank(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}
