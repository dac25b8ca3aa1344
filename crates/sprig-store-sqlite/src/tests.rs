//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::Utc;
use uuid::Uuid;

use sprig_core::{
  lifecycle::{LifecycleState, WorkflowAction},
  record::{
    EditSnapshot, Refset, StagedReplacement, VersionStatus, WorkflowHistoryEntry,
  },
  store::{ConcurrencyMode, RecordStore, SnapshotOp},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn record(external_id: &str) -> Refset {
  Refset {
    id: Uuid::new_v4(),
    external_id: external_id.into(),
    title: "Adverse reaction set".into(),
    narrative: "initial narrative".into(),
    lifecycle_state: LifecycleState::ReadyForEdit,
    version_status: VersionStatus::InDevelopment,
    version_date: None,
    assigned_user: None,
    edit_branch_id: None,
    refset_branch_id: format!("refset-{external_id}"),
    is_local_set: false,
    latest_published_version: false,
    has_version_in_development: false,
    revision: 0,
    created_at: Utc::now(),
  }
}

fn history(record_id: Uuid, action: WorkflowAction, state: LifecycleState) -> WorkflowHistoryEntry {
  WorkflowHistoryEntry {
    entry_id: Uuid::new_v4(),
    record_id,
    actor: "alice".into(),
    action,
    resulting_state: state,
    note: None,
    recorded_at: Utc::now(),
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_find_record() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();

  let fetched = s.find_by_id(r.id).await.unwrap().unwrap();
  assert_eq!(fetched.external_id, "1001");
  assert_eq!(fetched.lifecycle_state, LifecycleState::ReadyForEdit);
  assert_eq!(fetched.revision, 0);
}

#[tokio::test]
async fn find_missing_returns_none() {
  let s = store().await;
  assert!(s.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn second_in_development_version_is_rejected() {
  let s = store().await;
  s.add(record("1001")).await.unwrap();

  let err = s.add(record("1001")).await.unwrap_err();
  assert!(matches!(err, crate::Error::DuplicateInDevelopment(_)));
}

#[tokio::test]
async fn published_and_in_development_can_coexist() {
  let s = store().await;
  let mut published = record("1001");
  published.version_status = VersionStatus::Published;
  published.lifecycle_state = LifecycleState::Published;
  s.add(published).await.unwrap();
  s.add(record("1001")).await.unwrap();

  let versions = s.versions_of("1001").await.unwrap();
  assert_eq!(versions.len(), 2);

  let dev = s.find_in_development("1001").await.unwrap().unwrap();
  assert_eq!(dev.version_status, VersionStatus::InDevelopment);
}

#[tokio::test]
async fn update_bumps_revision() {
  let s = store().await;
  let mut r = s.add(record("1001")).await.unwrap();
  r.narrative = "changed".into();

  let updated = s.update(r, ConcurrencyMode::Optimistic).await.unwrap();
  assert_eq!(updated.revision, 1);

  let fetched = s.find_by_id(updated.id).await.unwrap().unwrap();
  assert_eq!(fetched.narrative, "changed");
  assert_eq!(fetched.revision, 1);
}

#[tokio::test]
async fn optimistic_update_rejects_stale_revision() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();

  // A concurrent writer lands first.
  s.update(r.clone(), ConcurrencyMode::Optimistic).await.unwrap();

  let err = s.update(r, ConcurrencyMode::Optimistic).await.unwrap_err();
  assert!(matches!(err, crate::Error::StaleRevision { .. }));
}

#[tokio::test]
async fn last_write_wins_ignores_stale_revision() {
  let s = store().await;
  let mut r = s.add(record("1001")).await.unwrap();

  s.update(r.clone(), ConcurrencyMode::Optimistic).await.unwrap();

  r.narrative = "late writer".into();
  let updated = s.update(r, ConcurrencyMode::LastWriteWins).await.unwrap();

  let fetched = s.find_by_id(updated.id).await.unwrap().unwrap();
  assert_eq!(fetched.narrative, "late writer");
}

#[tokio::test]
async fn update_missing_record_errors() {
  let s = store().await;
  let err = s
    .update(record("1001"), ConcurrencyMode::Optimistic)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::RecordNotFound(_)));
}

// ─── History ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_is_ordered_and_scoped() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();
  let other = s.add(record("1002")).await.unwrap();

  s.append_history(history(r.id, WorkflowAction::Create, LifecycleState::ReadyForEdit))
    .await
    .unwrap();
  s.append_history(history(r.id, WorkflowAction::Edit, LifecycleState::InEdit))
    .await
    .unwrap();
  s.append_history(history(other.id, WorkflowAction::Create, LifecycleState::ReadyForEdit))
    .await
    .unwrap();

  let entries = s.history_for(r.id).await.unwrap();
  assert_eq!(entries.len(), 2);
  assert_eq!(entries[0].action, WorkflowAction::Create);
  assert_eq!(entries[1].action, WorkflowAction::Edit);
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_save_is_once_per_external_id() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();

  let first = EditSnapshot::capture(&r).unwrap();
  assert!(s.save_snapshot(first.clone()).await.unwrap());

  // A second save within the same cycle is a no-op.
  let second = EditSnapshot::capture(&r).unwrap();
  assert!(!s.save_snapshot(second).await.unwrap());

  let stored = s.get_snapshot("1001").await.unwrap().unwrap();
  assert_eq!(stored.snapshot_id, first.snapshot_id);
}

#[tokio::test]
async fn snapshot_delete_round_trip() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();
  s.save_snapshot(EditSnapshot::capture(&r).unwrap()).await.unwrap();

  assert!(s.delete_snapshot("1001").await.unwrap());
  assert!(!s.delete_snapshot("1001").await.unwrap());
  assert!(s.get_snapshot("1001").await.unwrap().is_none());
}

// ─── Staging ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn staged_replacements_round_trip() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();

  s.stage_replacement(StagedReplacement {
    staging_id: Uuid::new_v4(),
    record_id: r.id,
    inactive_concept: "111".into(),
    replacement_concept: Some("222".into()),
    recorded_at: Utc::now(),
  })
  .await
  .unwrap();
  s.stage_replacement(StagedReplacement {
    staging_id: Uuid::new_v4(),
    record_id: r.id,
    inactive_concept: "333".into(),
    replacement_concept: None,
    recorded_at: Utc::now(),
  })
  .await
  .unwrap();

  let rows = s.staged_replacements(r.id).await.unwrap();
  assert_eq!(rows.len(), 2);

  assert_eq!(s.clear_staged(r.id).await.unwrap(), 2);
  assert!(s.staged_replacements(r.id).await.unwrap().is_empty());
}

// ─── Composite writes ────────────────────────────────────────────────────────

#[tokio::test]
async fn persist_transition_is_atomic() {
  let s = store().await;
  let mut r = s.add(record("1001")).await.unwrap();
  r.lifecycle_state = LifecycleState::InEdit;
  r.assigned_user = Some("alice".into());

  let snap = EditSnapshot::capture(&r).unwrap();
  let updated = s
    .persist_transition(
      r.clone(),
      history(r.id, WorkflowAction::Edit, LifecycleState::InEdit),
      SnapshotOp::Save(snap),
      ConcurrencyMode::Optimistic,
    )
    .await
    .unwrap();

  assert_eq!(updated.revision, 1);
  assert_eq!(s.history_for(r.id).await.unwrap().len(), 1);
  assert!(s.get_snapshot("1001").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_transition_writes_nothing() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();

  // Invalidate the caller's revision.
  s.update(r.clone(), ConcurrencyMode::Optimistic).await.unwrap();

  let snap = EditSnapshot::capture(&r).unwrap();
  let err = s
    .persist_transition(
      r.clone(),
      history(r.id, WorkflowAction::Edit, LifecycleState::InEdit),
      SnapshotOp::Save(snap),
      ConcurrencyMode::Optimistic,
    )
    .await
    .unwrap_err();

  assert!(matches!(err, crate::Error::StaleRevision { .. }));
  // Neither the history row nor the snapshot landed.
  assert!(s.history_for(r.id).await.unwrap().is_empty());
  assert!(s.get_snapshot("1001").await.unwrap().is_none());
}

#[tokio::test]
async fn remove_version_drops_all_rows() {
  let s = store().await;
  let r = s.add(record("1001")).await.unwrap();
  s.append_history(history(r.id, WorkflowAction::Create, LifecycleState::ReadyForEdit))
    .await
    .unwrap();
  s.save_snapshot(EditSnapshot::capture(&r).unwrap()).await.unwrap();
  s.stage_replacement(StagedReplacement {
    staging_id: Uuid::new_v4(),
    record_id: r.id,
    inactive_concept: "111".into(),
    replacement_concept: None,
    recorded_at: Utc::now(),
  })
  .await
  .unwrap();

  s.remove_version(r.id, "1001").await.unwrap();

  assert!(s.find_by_id(r.id).await.unwrap().is_none());
  assert!(s.history_for(r.id).await.unwrap().is_empty());
  assert!(s.get_snapshot("1001").await.unwrap().is_none());
  assert!(s.staged_replacements(r.id).await.unwrap().is_empty());
}
