//! Core domain logic for puff session tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Sessions: the in-progress session and its finalized history
//! - Clustering: rebuilding sessions from a raw event log
//! - Transfer: the line-oriented timestamp import/export format

pub mod cluster;
pub mod event;
pub mod session;
pub mod transfer;
pub mod types;

pub use cluster::{Cluster, ReconcilePlan, cluster_timestamps, plan_reconciliation};
pub use event::Event;
pub use session::{ActiveSession, FinalizedSession, SessionState};
pub use transfer::{ImportBatch, format_instant, parse_import, write_export};
pub use types::{EventId, IdleTimeout, SessionId, ValidationError, normalize_instant};
