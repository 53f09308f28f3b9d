//! # casegraph-core
//!
//! Core library for casegraph - prefix extraction and active-case queries
//! over graph-structured event logs.
//!
//! This library provides:
//! - Domain types for events, edges, prefixes and reconciled timelines
//! - The per-case event graph model
//! - Prefix building, timeline reconciliation and the active-case index
//! - Database storage layer with SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Layer 0 (Raw):** Graph files on disk (immutable)
//! - **Layer 1 (Imported):** Events and edges in SQLite, one row per line
//! - **Layer 2 (Derived):** Prefix table and reconciled timeline (regenerable)
//!
//! The active-case index is a view over Layer 2 and is never stored.
//!
//! ## Example
//!
//! ```rust,no_run
//! use casegraph_core::{pipeline, ActiveCaseIndex, Config, Database, PrefixBuilder};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let builder = PrefixBuilder::with_max_length(config.prefix.max_length);
//! let prefixes = pipeline::build_prefix_table(&db, &builder).expect("prefix run failed");
//! let timeline = pipeline::reconcile_timeline(&db).expect("timeline run failed");
//!
//! let index = ActiveCaseIndex::new(&timeline.timeline);
//! # let (start, finish) = (chrono::Utc::now(), chrono::Utc::now());
//! for record in index.query(start, finish).expect("invalid window") {
//!     println!("{} at {}", record.track_id, record.prefix_id);
//! }
//! # let _ = prefixes;
//! ```

// Re-export commonly used items at the crate root
pub use active::{maximal_prefixes, ActiveCaseIndex, ActivePrefix, WindowFilter};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use graph::{CaseGraph, GraphSource};
pub use ingest::{GraphLog, ImportResult, IngestCoordinator};
pub use prefix::{Prefix, PrefixBuilder, PrefixTable};
pub use timeline::TimelineReconciler;
pub use types::*;

// Public modules
pub mod active;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod format;
pub mod graph;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod prefix;
pub mod timeline;
pub mod types;
