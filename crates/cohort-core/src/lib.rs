//! Core types and error definitions for the Cohort orchestration engine.
//!
//! This crate provides the foundational pieces shared by every Cohort crate:
//! the error taxonomy surfaced to callers and the opaque entity identifiers
//! the orchestrator's arena maps are keyed by.
//!
//! # Main types
//!
//! - [`CohortError`] — Unified error enum (validation, not found, invalid state, conflict, ...).
//! - [`CohortResult`] — Convenience alias for `Result<T, CohortError>`.
//! - [`ErrorBody`] — Serializable error payload for command responses.
//! - [`AgentId`], [`TaskId`], [`WorkflowId`], [`MessageId`] — Opaque UUID-backed ids.

/// Error taxonomy.
pub mod error;
/// Entity identifiers.
pub mod id;

pub use error::{CohortError, CohortResult, ErrorBody};
pub use id::{AgentId, MessageId, TaskId, WorkflowId};
