//! Column codecs and raw row types.
//!
//! Everything is stored as TEXT/INTEGER; these helpers keep the string forms
//! in one place so read and write sides cannot drift apart.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use sprig_core::{
  lifecycle::{LifecycleState, WorkflowAction},
  record::{EditSnapshot, Refset, StagedReplacement, WorkflowHistoryEntry},
};

use crate::{Error, Result};

// ─── Scalar codecs ───────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String {
  id.to_string()
}

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Ok(Uuid::parse_str(s)?)
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn encode_date(d: NaiveDate) -> String {
  d.format("%Y-%m-%d").to_string()
}

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::EnumParse { column, value: s.to_owned() })
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `refsets` row as it comes off the wire.
pub struct RawRefset {
  pub id:                         String,
  pub external_id:                String,
  pub title:                      String,
  pub narrative:                  String,
  pub lifecycle_state:            String,
  pub version_status:             String,
  pub version_date:               Option<String>,
  pub assigned_user:              Option<String>,
  pub edit_branch_id:             Option<String>,
  pub refset_branch_id:           String,
  pub is_local_set:               bool,
  pub latest_published_version:   bool,
  pub has_version_in_development: bool,
  pub revision:                   i64,
  pub created_at:                 String,
}

impl RawRefset {
  pub fn into_refset(self) -> Result<Refset> {
    Ok(Refset {
      id: decode_uuid(&self.id)?,
      external_id: self.external_id,
      title: self.title,
      narrative: self.narrative,
      lifecycle_state: decode_enum("lifecycle_state", &self.lifecycle_state)?,
      version_status: decode_enum("version_status", &self.version_status)?,
      version_date: self.version_date.as_deref().map(decode_date).transpose()?,
      assigned_user: self.assigned_user,
      edit_branch_id: self.edit_branch_id,
      refset_branch_id: self.refset_branch_id,
      is_local_set: self.is_local_set,
      latest_published_version: self.latest_published_version,
      has_version_in_development: self.has_version_in_development,
      revision: self.revision,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// A `workflow_history` row.
pub struct RawHistoryEntry {
  pub entry_id:        String,
  pub record_id:       String,
  pub actor:           String,
  pub action:          String,
  pub resulting_state: String,
  pub note:            Option<String>,
  pub recorded_at:     String,
}

impl RawHistoryEntry {
  pub fn into_entry(self) -> Result<WorkflowHistoryEntry> {
    Ok(WorkflowHistoryEntry {
      entry_id:        decode_uuid(&self.entry_id)?,
      record_id:       decode_uuid(&self.record_id)?,
      actor:           self.actor,
      action:          decode_enum::<WorkflowAction>("action", &self.action)?,
      resulting_state: decode_enum::<LifecycleState>(
        "resulting_state",
        &self.resulting_state,
      )?,
      note:            self.note,
      recorded_at:     decode_dt(&self.recorded_at)?,
    })
  }
}

/// An `edit_snapshots` row.
pub struct RawSnapshot {
  pub snapshot_id: String,
  pub external_id: String,
  pub record_json: String,
  pub created_at:  String,
}

impl RawSnapshot {
  pub fn into_snapshot(self) -> Result<EditSnapshot> {
    Ok(EditSnapshot {
      snapshot_id: decode_uuid(&self.snapshot_id)?,
      external_id: self.external_id,
      record:      serde_json::from_str(&self.record_json)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// A `staged_replacements` row.
pub struct RawStagedReplacement {
  pub staging_id:          String,
  pub record_id:           String,
  pub inactive_concept:    String,
  pub replacement_concept: Option<String>,
  pub recorded_at:         String,
}

impl RawStagedReplacement {
  pub fn into_staged(self) -> Result<StagedReplacement> {
    Ok(StagedReplacement {
      staging_id:          decode_uuid(&self.staging_id)?,
      record_id:           decode_uuid(&self.record_id)?,
      inactive_concept:    self.inactive_concept,
      replacement_concept: self.replacement_concept,
      recorded_at:         decode_dt(&self.recorded_at)?,
    })
  }
}

// ─── Write-side parameter bundles ────────────────────────────────────────────

/// The `refsets` column values for a record, in insert order.
pub fn refset_params(record: &Refset) -> [RefsetParam; 15] {
  [
    RefsetParam::Text(encode_uuid(record.id)),
    RefsetParam::Text(record.external_id.clone()),
    RefsetParam::Text(record.title.clone()),
    RefsetParam::Text(record.narrative.clone()),
    RefsetParam::Text(record.lifecycle_state.to_string()),
    RefsetParam::Text(record.version_status.to_string()),
    RefsetParam::OptText(record.version_date.map(encode_date)),
    RefsetParam::OptText(record.assigned_user.clone()),
    RefsetParam::OptText(record.edit_branch_id.clone()),
    RefsetParam::Text(record.refset_branch_id.clone()),
    RefsetParam::Bool(record.is_local_set),
    RefsetParam::Bool(record.latest_published_version),
    RefsetParam::Bool(record.has_version_in_development),
    RefsetParam::Int(record.revision),
    RefsetParam::Text(encode_dt(record.created_at)),
  ]
}

/// Owned parameter value that maps onto rusqlite's `ToSql`.
pub enum RefsetParam {
  Text(String),
  OptText(Option<String>),
  Bool(bool),
  Int(i64),
}

impl rusqlite::ToSql for RefsetParam {
  fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
    match self {
      Self::Text(s) => s.to_sql(),
      Self::OptText(s) => s.to_sql(),
      Self::Bool(b) => b.to_sql(),
      Self::Int(i) => i.to_sql(),
    }
  }
}
