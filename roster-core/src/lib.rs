//! # roster-core
//!
//! Domain types and configuration for the roster directory reconciler.
//!
//! The reconciliation pipeline itself lives in `roster-sync`; this crate holds
//! the data model both sides agree on: source and target members, roles, the
//! persisted invitation-record schema, and the run configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
