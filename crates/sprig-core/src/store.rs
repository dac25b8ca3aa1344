//! The `RecordStore` trait and supporting write types.
//!
//! The trait is implemented by storage backends (e.g. `sprig-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//! Multi-row writes that must land together (record + history + snapshot)
//! are expressed as composite methods so backends can wrap them in a single
//! transaction.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{
  EditSnapshot, Refset, StagedReplacement, WorkflowHistoryEntry,
};

// ─── Write modifiers ─────────────────────────────────────────────────────────

/// How record updates treat the revision stamp.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
  /// Reject the write when the stored revision no longer matches the
  /// revision the caller read.
  #[default]
  Optimistic,
  /// Compatibility mode reproducing the source system's lock-free,
  /// last-write-wins behaviour.
  LastWriteWins,
}

/// The snapshot row change bundled into a transition write.
#[derive(Debug, Clone)]
pub enum SnapshotOp {
  None,
  /// Save unless a snapshot already exists for the external id (one per
  /// editing cycle).
  Save(EditSnapshot),
  /// Discard the snapshot for the external id, if any.
  Delete(String),
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Sprig record store backend.
///
/// History rows are append-only; they are removed only by
/// [`remove_version`](RecordStore::remove_version) together with their
/// owning record.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Records ───────────────────────────────────────────────────────────

  fn find_by_id(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Refset>, Self::Error>> + Send + '_;

  /// All persisted versions sharing `external_id`, newest first.
  fn versions_of<'a>(
    &'a self,
    external_id: &'a str,
  ) -> impl Future<Output = Result<Vec<Refset>, Self::Error>> + Send + 'a;

  /// The `IN_DEVELOPMENT` version of `external_id`, if one exists.
  /// The store enforces that at most one ever does.
  fn find_in_development<'a>(
    &'a self,
    external_id: &'a str,
  ) -> impl Future<Output = Result<Option<Refset>, Self::Error>> + Send + 'a;

  fn list_all(
    &self,
  ) -> impl Future<Output = Result<Vec<Refset>, Self::Error>> + Send + '_;

  /// Persist a freshly created record. Fails if another `IN_DEVELOPMENT`
  /// version of the same external id already exists.
  fn add(
    &self,
    record: Refset,
  ) -> impl Future<Output = Result<Refset, Self::Error>> + Send + '_;

  /// Persist an updated record, bumping its revision stamp. Under
  /// [`ConcurrencyMode::Optimistic`] the write fails when the stored
  /// revision differs from `record.revision`.
  fn update(
    &self,
    record: Refset,
    mode: ConcurrencyMode,
  ) -> impl Future<Output = Result<Refset, Self::Error>> + Send + '_;

  // ── Workflow history ──────────────────────────────────────────────────

  fn append_history(
    &self,
    entry: WorkflowHistoryEntry,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// History for a record, oldest first.
  fn history_for(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Vec<WorkflowHistoryEntry>, Self::Error>> + Send + '_;

  // ── Edit snapshots ────────────────────────────────────────────────────

  /// Save a snapshot unless one already exists for the external id.
  /// Returns `false` when an existing snapshot made this a no-op.
  fn save_snapshot(
    &self,
    snapshot: EditSnapshot,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_snapshot<'a>(
    &'a self,
    external_id: &'a str,
  ) -> impl Future<Output = Result<Option<EditSnapshot>, Self::Error>> + Send + 'a;

  /// Returns `false` when no snapshot existed.
  fn delete_snapshot<'a>(
    &'a self,
    external_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Upgrade staging ───────────────────────────────────────────────────

  fn stage_replacement(
    &self,
    row: StagedReplacement,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn staged_replacements(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Vec<StagedReplacement>, Self::Error>> + Send + '_;

  /// Drop all staging rows for a record; returns the number removed.
  fn clear_staged(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Composite writes ──────────────────────────────────────────────────

  /// Persist a completed transition atomically: the updated record, its
  /// history row, and the snapshot change land in one transaction or not
  /// at all.
  fn persist_transition(
    &self,
    record: Refset,
    entry: WorkflowHistoryEntry,
    snapshot: SnapshotOp,
    mode: ConcurrencyMode,
  ) -> impl Future<Output = Result<Refset, Self::Error>> + Send + '_;

  /// Delete a record version together with its history, snapshot, and
  /// staging rows, in one transaction.
  fn remove_version<'a>(
    &'a self,
    record_id: Uuid,
    external_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
