//! Offline-first browser for a remote book catalog.
//!
//! Every query is served from a local SQLite cache first and refreshed from
//! the catalog when stale; screens subscribe to those queries and fold them
//! into their own state.

pub mod cache;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod screens;
