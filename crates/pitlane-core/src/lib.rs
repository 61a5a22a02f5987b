//! Core library for pitlane: the assignment ledger behind race-event
//! registration.
//!
//! Kids are placed on teams and bound to race vehicles; every change is
//! logged to an append-only history.
//!
//! - `models`: typed kid, vehicle, team and history records
//! - `capacity`: pure occupancy checks and the consistency audit
//! - `engine`: assign, unassign, swap and team changes under keyed locks
//! - `history`: best-effort history writes and newest-first queries
//! - `store`: the storage contract plus memory, JSON file and Firestore backends
//! - `format`: history sentences and relative times for display
//! - `auth`, `config`: sign-in session and operator configuration

pub mod auth;
pub mod capacity;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod history;
pub mod models;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use capacity::{CapacityPolicy, InstructorPolicy, Violation};
pub use config::{Backend, Config};
pub use engine::{AssignmentEngine, Outcome};
pub use error::{AssignmentError, RollbackOutcome, ValidationError};
pub use history::{HistoryError, HistoryLedger, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
pub use store::{EntityStore, HistoryStore, StoreError};
