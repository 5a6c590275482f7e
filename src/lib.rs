//! Achievement progress tracking for several local users over a shared,
//! re-orderable category taxonomy.
//!
//! Achievement codes are derived from category rank and suffix and change
//! whenever the taxonomy does; progress ledgers follow the achievements by
//! their `(name, first category, second category)` identity.

pub mod app;
pub mod backup;
pub mod catalog;
pub mod categories;
pub mod cli;
pub mod config;
pub mod encode;
pub mod error;
pub mod groups;
pub mod importer;
pub mod progress;
pub mod remap;
pub mod stats;
pub mod status;
pub mod store;

pub use error::{EngineError, Result};
