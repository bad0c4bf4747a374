/// A named book list ("Reading now", "Classics", ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookList {
  pub id: i64,
  pub title: String,
}

/// Summary of a book for list views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
  pub id: i64,
  pub list_id: i64,
  pub title: String,
  pub cover_url: String,
}

/// Full book details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDetails {
  pub id: i64,
  pub list_id: i64,
  pub title: String,
  pub cover_url: String,
  pub author: Option<String>,
  pub isbn: Option<String>,
  /// ISO-ish date string as served by the catalog
  pub publication_date: Option<String>,
  pub description: Option<String>,
}
