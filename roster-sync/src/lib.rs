//! # roster-sync
//!
//! Directory membership reconciliation: drives a target organization's member
//! list to match source-directory groups, bridging the email/handle identity
//! gap with a persisted mapping store.
//!
//! Construct a [`SyncEngine`] over [`SourceDirectory`] and [`TargetDirectory`]
//! implementations and call [`SyncEngine::sync`] per pass. The diff engine
//! ([`compute_diff`]) and executor ([`execute_actions`]) are usable standalone.

pub mod action;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod json_store;
pub mod reconcile;
pub mod traits;

pub use action::{ActionOutcome, Outcome, SyncAction};
pub use diff::{compute_diff, MappingHints};
pub use engine::{SyncEngine, SyncReport, SyncSummary};
pub use error::{DirectoryError, StoreError, SyncError};
pub use executor::execute_actions;
pub use json_store::JsonMappingStore;
pub use reconcile::{ReconcileResult, Reconciler, INVITATION_EXPIRY_DAYS};
pub use traits::{MappingStore, SourceDirectory, TargetDirectory};
