//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own transaction boundaries that span several repositories.

pub mod dashboard_service;
pub mod filter_translator;
pub mod org_change_service;
pub mod response_service;
pub mod snapshot_service;
