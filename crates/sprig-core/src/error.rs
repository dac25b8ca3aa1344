//! Error taxonomy for `sprig-core`.
//!
//! Variants are split between client-correctable conditions (bad request,
//! lost race, missing resource) and operational faults. Callers mapping to
//! HTTP should consult [`Error::is_client_error`].

use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::{LifecycleState, WorkflowAction};

#[derive(Debug, Error)]
pub enum Error {
  /// The action is not in the caller's allowed set for the record's current
  /// state and assignment.
  #[error("user {user} may not perform {action} on record in state {state}")]
  UnauthorizedTransition {
    user:   String,
    action: WorkflowAction,
    state:  LifecycleState,
  },

  #[error("record not found: {0}")]
  RecordNotFound(Uuid),

  #[error("no record found for external id {0}")]
  ExternalIdNotFound(String),

  /// A uniqueness invariant was violated or a merge raced a concurrent
  /// change. The caller can retry after reconciling.
  #[error("conflict: {0}")]
  Conflict(String),

  /// The record's state structurally cannot support the attempted operation
  /// (e.g. publishing a record that is not ready for publication).
  #[error("invalid state {state} for operation: {operation}")]
  InvalidState {
    state:     LifecycleState,
    operation: String,
  },

  /// Caller-supplied input is structurally invalid.
  #[error("invalid input: {0}")]
  Validation(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the condition is correctable by the caller (4xx-equivalent)
  /// rather than an operational fault.
  pub fn is_client_error(&self) -> bool {
    !matches!(self, Self::Serialization(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
