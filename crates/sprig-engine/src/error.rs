//! Engine error type.
//!
//! Branch-store failures keep their own type so callers can distinguish a
//! merge conflict from a store fault; record-store errors are boxed because
//! the engine is generic over the backend.

use thiserror::Error;

use sprig_core::branch::BranchError;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] sprig_core::Error),

  #[error("branch service error: {0}")]
  Branch(#[from] BranchError),

  #[error("record store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  /// Whether the condition is correctable by the caller (4xx-equivalent).
  /// Branch conflicts are client-correctable: the caller reconciles and
  /// retries; remote branch faults and store faults are not.
  pub fn is_client_error(&self) -> bool {
    match self {
      Self::Core(e) => e.is_client_error(),
      Self::Branch(BranchError::Conflict { .. }) => true,
      Self::Branch(BranchError::NotFound(_)) => true,
      Self::Branch(BranchError::AlreadyExists(_)) => true,
      Self::Branch(BranchError::Remote(_)) => false,
      Self::Store(_) => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
