//! Error type for `sprig-store-sqlite`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] sprig_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown enum value in column {column}: {value:?}")]
  EnumParse { column: &'static str, value: String },

  #[error("record not found: {0}")]
  RecordNotFound(Uuid),

  /// The one-`IN_DEVELOPMENT`-version-per-external-id invariant would be
  /// violated by the write.
  #[error("an in-development version of {0} already exists")]
  DuplicateInDevelopment(String),

  /// Optimistic-concurrency check failed: the stored revision moved past
  /// the one the caller read.
  #[error("stale revision for record {id}: expected {expected}")]
  StaleRevision { id: Uuid, expected: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
