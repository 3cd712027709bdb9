//! Domain model for organizational lineage, employee state and snapshots.
//!
//! # Responsibility
//! - Define canonical data structures used by lineage, capture and query
//!   logic.
//! - Keep shape validation next to the types it protects.
//!
//! # Invariants
//! - Unit and employee identifiers are stable and never reused.
//! - Validity intervals are half-open: `[valid_from, valid_to)`, with
//!   `valid_to = None` meaning "currently valid".
//! - A captured `SnapshotCore` is never mutated after construction.

pub mod employee;
pub mod lineage;
pub mod org_unit;
pub mod query;
pub mod response;
pub mod snapshot;
pub mod time_range;
pub mod validation;
