//! Database layer for casegraph
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Imported events and edges, served back as case graphs
//! - Derived prefix and timeline tables
//! - Content-hash checkpoints for incremental import

pub mod repo;
pub mod schema;

pub use repo::Database;
