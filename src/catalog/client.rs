use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::catalog::api_types::{ApiBook, ApiBookDetails, ApiBookList};
use crate::catalog::error::FetchError;
use crate::config::Config;

/// Read-only access to the remote catalog.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
  /// All books of all lists
  async fn fetch_all_books(&self) -> Result<Vec<ApiBook>, FetchError>;

  /// Details of one book. A missing book fails with [`FetchError::NotFound`].
  async fn fetch_book_details(&self, id: i64) -> Result<ApiBookDetails, FetchError>;

  /// All book lists
  async fn fetch_all_lists(&self) -> Result<Vec<ApiBookList>, FetchError>;
}

/// HTTP client for the catalog API
#[derive(Clone)]
pub struct CatalogClient {
  http: reqwest::Client,
  base_url: Url,
}

impl CatalogClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut raw = config.api.base_url.trim().to_string();
    // Url::join replaces the last path segment unless it ends with a slash
    if !raw.ends_with('/') {
      raw.push('/');
    }
    let base_url =
      Url::parse(&raw).map_err(|e| eyre!("Invalid API base URL '{}': {}", raw, e))?;

    let http = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(config.api.timeout_secs))
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| FetchError::Other(format!("Invalid request path '{}': {}", path, e)))?;

    debug!(%url, "GET");
    let response = self.http.get(url).send().await?.error_for_status()?;
    Ok(response.json::<T>().await?)
  }
}

#[async_trait]
impl RemoteSource for CatalogClient {
  async fn fetch_all_books(&self) -> Result<Vec<ApiBook>, FetchError> {
    self.get_json("books").await
  }

  async fn fetch_book_details(&self, id: i64) -> Result<ApiBookDetails, FetchError> {
    self.get_json(&format!("books/{}", id)).await
  }

  async fn fetch_all_lists(&self) -> Result<Vec<ApiBookList>, FetchError> {
    self.get_json("lists").await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_base_url_keeps_last_segment() {
    let mut config = Config::default();
    config.api.base_url = "https://example.com/owner/assignment".to_string();
    let client = CatalogClient::new(&config).unwrap();
    assert_eq!(
      client.base_url.join("books/4").unwrap().as_str(),
      "https://example.com/owner/assignment/books/4"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    let mut config = Config::default();
    config.api.base_url = "not a url".to_string();
    assert!(CatalogClient::new(&config).is_err());
  }
}
