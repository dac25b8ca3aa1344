//! Record types — the versioned reference set and its append-only side rows.
//!
//! A [`Refset`] is one *version* of a named record set. Versions of the same
//! logical set share an `external_id`; at most one of them may be
//! `IN_DEVELOPMENT` at a time. History and snapshot rows are immutable once
//! written and are deleted only together with their owning record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::lifecycle::{LifecycleState, WorkflowAction};

// ─── Version status ──────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
  InDevelopment,
  Published,
  Retired,
}

// ─── Refset ──────────────────────────────────────────────────────────────────

/// One version of a reference set under lifecycle management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refset {
  /// Internal identity of this version row.
  pub id: Uuid,
  /// Stable identity shared by all versions of the logical set.
  pub external_id: String,
  pub title: String,
  /// Free-text editorial description; restored from the edit snapshot on
  /// cancellation.
  pub narrative: String,
  pub lifecycle_state: LifecycleState,
  pub version_status: VersionStatus,
  /// Set exactly once, at publication.
  pub version_date: Option<NaiveDate>,
  /// Present iff the state requires exclusive assignment.
  pub assigned_user: Option<String>,
  /// Branch segment of the live edit branch, if an edit cycle is open.
  pub edit_branch_id: Option<String>,
  /// Branch segment of this version's refset branch.
  pub refset_branch_id: String,
  /// Local sets carry an extra permanent top-level branch and bypass the
  /// terminology server's own versioning.
  pub is_local_set: bool,
  pub latest_published_version: bool,
  pub has_version_in_development: bool,
  /// Monotonic stamp for optimistic-concurrency checks; incremented on
  /// every persisted update.
  pub revision: i64,
  pub created_at: DateTime<Utc>,
}

impl Refset {
  /// Check the assignment invariant: `assigned_user` is set iff the state
  /// requires exclusive assignment.
  pub fn assignment_is_consistent(&self) -> bool {
    self.lifecycle_state.requires_assignment() == self.assigned_user.is_some()
  }
}

// ─── NewRefset ───────────────────────────────────────────────────────────────

/// Input for creating a brand-new reference set.
///
/// `external_id` is `None` for local sets, whose id is minted through the
/// branch service; non-local sets arrive with an externally assigned id.
#[derive(Debug, Clone)]
pub struct NewRefset {
  pub external_id:  Option<String>,
  pub title:        String,
  pub narrative:    String,
  pub is_local_set: bool,
}

// ─── Workflow history ────────────────────────────────────────────────────────

/// Append-only log row written on every successful transition.
/// Never mutated; removed only when the owning record is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHistoryEntry {
  pub entry_id:        Uuid,
  /// Internal id of the owning record version.
  pub record_id:       Uuid,
  pub actor:           String,
  pub action:          WorkflowAction,
  pub resulting_state: LifecycleState,
  pub note:            Option<String>,
  pub recorded_at:     DateTime<Utc>,
}

// ─── Edit snapshot ───────────────────────────────────────────────────────────

/// A copy of a record's persisted fields taken at the start of an edit
/// cycle, keyed by external id. At most one exists per external id; saving
/// again within the same cycle is a no-op. Used to roll the record back on
/// `CANCEL_EDIT`/`CANCEL_UPGRADE`, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditSnapshot {
  pub snapshot_id: Uuid,
  pub external_id: String,
  /// The full serialised [`Refset`] as it stood when editing began.
  pub record:      serde_json::Value,
  pub created_at:  DateTime<Utc>,
}

impl EditSnapshot {
  pub fn capture(record: &Refset) -> crate::Result<Self> {
    Ok(Self {
      snapshot_id: Uuid::new_v4(),
      external_id: record.external_id.clone(),
      record:      serde_json::to_value(record)?,
      created_at:  Utc::now(),
    })
  }

  /// Deserialise the captured record.
  pub fn restore(&self) -> crate::Result<Refset> {
    Ok(serde_json::from_value(self.record.clone())?)
  }
}

// ─── Upgrade staging ─────────────────────────────────────────────────────────

/// A staged "replace inactive concept" decision made during `IN_UPGRADE`.
/// All staging rows for a record are discarded whenever the record leaves
/// `IN_UPGRADE`, by any path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedReplacement {
  pub staging_id:          Uuid,
  pub record_id:           Uuid,
  /// Concept id that went inactive in the newer terminology release.
  pub inactive_concept:    String,
  /// Chosen replacement, or `None` when the member is to be dropped.
  pub replacement_concept: Option<String>,
  pub recorded_at:         DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> Refset {
    Refset {
      id: Uuid::new_v4(),
      external_id: "900000000000001".into(),
      title: "Test set".into(),
      narrative: "A".into(),
      lifecycle_state: LifecycleState::ReadyForEdit,
      version_status: VersionStatus::InDevelopment,
      version_date: None,
      assigned_user: None,
      edit_branch_id: None,
      refset_branch_id: "refset-1".into(),
      is_local_set: false,
      latest_published_version: false,
      has_version_in_development: false,
      revision: 0,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn snapshot_round_trips_record_fields() {
    let mut r = record();
    r.narrative = "original narrative".into();

    let snap = EditSnapshot::capture(&r).unwrap();
    r.narrative = "mutated mid-edit".into();

    let restored = snap.restore().unwrap();
    assert_eq!(restored.narrative, "original narrative");
    assert_eq!(restored.id, r.id);
  }

  #[test]
  fn assignment_invariant_check() {
    let mut r = record();
    assert!(r.assignment_is_consistent());

    r.lifecycle_state = LifecycleState::InEdit;
    assert!(!r.assignment_is_consistent());

    r.assigned_user = Some("alice".into());
    assert!(r.assignment_is_consistent());
  }
}
