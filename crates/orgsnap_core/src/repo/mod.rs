//! Repository layer: storage contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the collaborator contracts the core consumes (employee state,
//!   organizational state, lineage store, response store).
//! - Isolate SQL details from resolver and service orchestration.
//!
//! # Invariants
//! - Writes validate domain invariants before any SQL mutation and run in
//!   one immediate transaction; a rejected write leaves no trace.
//! - Reads return semantic errors (`NotFound`) in addition to DB transport
//!   errors.
//! - Repositories never start a transaction for reads; callers that need a
//!   consistent multi-read view open one and build repositories over it.

pub mod employee_repo;
pub mod lineage_repo;
pub mod response_repo;
pub mod state;
