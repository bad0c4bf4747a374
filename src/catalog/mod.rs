//! The remote book catalog and its cached repository.

pub mod api_types;
pub mod client;
pub mod error;
#[cfg(test)]
pub mod mock;
pub mod repository;
pub mod types;

pub use client::{CatalogClient, RemoteSource};
pub use repository::BooksRepository;
