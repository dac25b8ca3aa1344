//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use sprig_core::{
  record::{EditSnapshot, Refset, StagedReplacement, WorkflowHistoryEntry},
  store::{ConcurrencyMode, RecordStore, SnapshotOp},
};

use crate::{
  encode::{
    RawHistoryEntry, RawRefset, RawSnapshot, RawStagedReplacement,
    encode_dt, encode_uuid, refset_params,
  },
  schema::SCHEMA,
  Error, Result,
};

const REFSET_COLUMNS: &str =
  "id, external_id, title, narrative, lifecycle_state, version_status, \
   version_date, assigned_user, edit_branch_id, refset_branch_id, \
   is_local_set, latest_published_version, has_version_in_development, \
   revision, created_at";

fn map_refset_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRefset> {
  Ok(RawRefset {
    id:                         row.get(0)?,
    external_id:                row.get(1)?,
    title:                      row.get(2)?,
    narrative:                  row.get(3)?,
    lifecycle_state:            row.get(4)?,
    version_status:             row.get(5)?,
    version_date:               row.get(6)?,
    assigned_user:              row.get(7)?,
    edit_branch_id:             row.get(8)?,
    refset_branch_id:           row.get(9)?,
    is_local_set:               row.get(10)?,
    latest_published_version:   row.get(11)?,
    has_version_in_development: row.get(12)?,
    revision:                   row.get(13)?,
    created_at:                 row.get(14)?,
  })
}

/// Result of a guarded record write, carried out of the `conn.call` closure
/// so it can be mapped to the right error on the async side.
enum WriteOutcome {
  Done,
  Missing,
  Stale,
}

/// Update all mutable columns of a record, bumping the revision stamp.
/// Under optimistic mode the write only lands when the stored revision still
/// equals the one the caller read.
fn update_record(
  conn: &rusqlite::Connection,
  record: &Refset,
  mode: ConcurrencyMode,
) -> rusqlite::Result<WriteOutcome> {
  let expected = record.revision;
  let mut bumped = record.clone();
  bumped.revision = expected + 1;
  let p = refset_params(&bumped);

  let sql_base = "UPDATE refsets SET
       external_id = ?2, title = ?3, narrative = ?4, lifecycle_state = ?5,
       version_status = ?6, version_date = ?7, assigned_user = ?8,
       edit_branch_id = ?9, refset_branch_id = ?10, is_local_set = ?11,
       latest_published_version = ?12, has_version_in_development = ?13,
       revision = ?14, created_at = ?15
     WHERE id = ?1";

  let changed = match mode {
    ConcurrencyMode::Optimistic => {
      let sql = format!("{sql_base} AND revision = ?16");
      let mut stmt = conn.prepare(&sql)?;
      let mut values: Vec<&dyn rusqlite::ToSql> =
        p.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
      values.push(&expected);
      stmt.execute(values.as_slice())?
    }
    ConcurrencyMode::LastWriteWins => {
      let mut stmt = conn.prepare(sql_base)?;
      let values: Vec<&dyn rusqlite::ToSql> =
        p.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
      stmt.execute(values.as_slice())?
    }
  };

  if changed > 0 {
    return Ok(WriteOutcome::Done);
  }

  let id_str = encode_uuid(record.id);
  let exists: bool = conn
    .query_row(
      "SELECT 1 FROM refsets WHERE id = ?1",
      rusqlite::params![id_str],
      |_| Ok(true),
    )
    .optional()?
    .unwrap_or(false);

  Ok(if exists { WriteOutcome::Stale } else { WriteOutcome::Missing })
}

fn insert_history(
  conn: &rusqlite::Connection,
  entry: &WorkflowHistoryEntry,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO workflow_history
       (entry_id, record_id, actor, action, resulting_state, note, recorded_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    rusqlite::params![
      encode_uuid(entry.entry_id),
      encode_uuid(entry.record_id),
      entry.actor,
      entry.action.to_string(),
      entry.resulting_state.to_string(),
      entry.note,
      encode_dt(entry.recorded_at),
    ],
  )?;
  Ok(())
}

/// Save-unless-present; returns whether a row was written.
fn insert_snapshot(
  conn: &rusqlite::Connection,
  snapshot: &EditSnapshot,
  record_json: &str,
) -> rusqlite::Result<bool> {
  let changed = conn.execute(
    "INSERT OR IGNORE INTO edit_snapshots
       (snapshot_id, external_id, record_json, created_at)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      encode_uuid(snapshot.snapshot_id),
      snapshot.external_id,
      record_json,
      encode_dt(snapshot.created_at),
    ],
  )?;
  Ok(changed > 0)
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Sprig record store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  // ── Records ────────────────────────────────────────────────────────────

  async fn find_by_id(&self, id: Uuid) -> Result<Option<Refset>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawRefset> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {REFSET_COLUMNS} FROM refsets WHERE id = ?1"),
              rusqlite::params![id_str],
              map_refset_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawRefset::into_refset).transpose()
  }

  async fn versions_of(&self, external_id: &str) -> Result<Vec<Refset>> {
    let ext = external_id.to_owned();
    let raws: Vec<RawRefset> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REFSET_COLUMNS} FROM refsets
           WHERE external_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![ext], map_refset_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRefset::into_refset).collect()
  }

  async fn find_in_development(&self, external_id: &str) -> Result<Option<Refset>> {
    let ext = external_id.to_owned();
    let raw: Option<RawRefset> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {REFSET_COLUMNS} FROM refsets
                 WHERE external_id = ?1 AND version_status = 'IN_DEVELOPMENT'"
              ),
              rusqlite::params![ext],
              map_refset_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawRefset::into_refset).transpose()
  }

  async fn list_all(&self) -> Result<Vec<Refset>> {
    let raws: Vec<RawRefset> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REFSET_COLUMNS} FROM refsets ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map([], map_refset_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRefset::into_refset).collect()
  }

  async fn add(&self, record: Refset) -> Result<Refset> {
    // Uniqueness pre-check; the partial unique index is the backstop.
    if record.version_status == sprig_core::record::VersionStatus::InDevelopment
      && self.find_in_development(&record.external_id).await?.is_some()
    {
      return Err(Error::DuplicateInDevelopment(record.external_id));
    }

    let stored = record.clone();
    self
      .conn
      .call(move |conn| {
        let p = refset_params(&record);
        let values: Vec<&dyn rusqlite::ToSql> =
          p.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        let mut stmt = conn.prepare(
          "INSERT INTO refsets VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;
        stmt.execute(values.as_slice())?;
        Ok(())
      })
      .await?;
    Ok(stored)
  }

  async fn update(&self, record: Refset, mode: ConcurrencyMode) -> Result<Refset> {
    let mut bumped = record.clone();
    bumped.revision += 1;

    let outcome = self
      .conn
      .call(move |conn| Ok(update_record(conn, &record, mode)?))
      .await?;

    match outcome {
      WriteOutcome::Done => Ok(bumped),
      WriteOutcome::Missing => Err(Error::RecordNotFound(bumped.id)),
      WriteOutcome::Stale => Err(Error::StaleRevision {
        id:       bumped.id,
        expected: bumped.revision - 1,
      }),
    }
  }

  // ── Workflow history ───────────────────────────────────────────────────

  async fn append_history(&self, entry: WorkflowHistoryEntry) -> Result<()> {
    self
      .conn
      .call(move |conn| Ok(insert_history(conn, &entry)?))
      .await?;
    Ok(())
  }

  async fn history_for(&self, record_id: Uuid) -> Result<Vec<WorkflowHistoryEntry>> {
    let id_str = encode_uuid(record_id);
    let raws: Vec<RawHistoryEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, record_id, actor, action, resulting_state, note, recorded_at
           FROM workflow_history WHERE record_id = ?1 ORDER BY recorded_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawHistoryEntry {
              entry_id:        row.get(0)?,
              record_id:       row.get(1)?,
              actor:           row.get(2)?,
              action:          row.get(3)?,
              resulting_state: row.get(4)?,
              note:            row.get(5)?,
              recorded_at:     row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawHistoryEntry::into_entry).collect()
  }

  // ── Edit snapshots ─────────────────────────────────────────────────────

  async fn save_snapshot(&self, snapshot: EditSnapshot) -> Result<bool> {
    let record_json = snapshot.record.to_string();
    let written = self
      .conn
      .call(move |conn| Ok(insert_snapshot(conn, &snapshot, &record_json)?))
      .await?;
    Ok(written)
  }

  async fn get_snapshot(&self, external_id: &str) -> Result<Option<EditSnapshot>> {
    let ext = external_id.to_owned();
    let raw: Option<RawSnapshot> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT snapshot_id, external_id, record_json, created_at
               FROM edit_snapshots WHERE external_id = ?1",
              rusqlite::params![ext],
              |row| {
                Ok(RawSnapshot {
                  snapshot_id: row.get(0)?,
                  external_id: row.get(1)?,
                  record_json: row.get(2)?,
                  created_at:  row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn delete_snapshot(&self, external_id: &str) -> Result<bool> {
    let ext = external_id.to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM edit_snapshots WHERE external_id = ?1",
          rusqlite::params![ext],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Upgrade staging ────────────────────────────────────────────────────

  async fn stage_replacement(&self, row: StagedReplacement) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO staged_replacements
             (staging_id, record_id, inactive_concept, replacement_concept, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            encode_uuid(row.staging_id),
            encode_uuid(row.record_id),
            row.inactive_concept,
            row.replacement_concept,
            encode_dt(row.recorded_at),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn staged_replacements(&self, record_id: Uuid) -> Result<Vec<StagedReplacement>> {
    let id_str = encode_uuid(record_id);
    let raws: Vec<RawStagedReplacement> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT staging_id, record_id, inactive_concept, replacement_concept, recorded_at
           FROM staged_replacements WHERE record_id = ?1 ORDER BY recorded_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawStagedReplacement {
              staging_id:          row.get(0)?,
              record_id:           row.get(1)?,
              inactive_concept:    row.get(2)?,
              replacement_concept: row.get(3)?,
              recorded_at:         row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws
      .into_iter()
      .map(RawStagedReplacement::into_staged)
      .collect()
  }

  async fn clear_staged(&self, record_id: Uuid) -> Result<usize> {
    let id_str = encode_uuid(record_id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM staged_replacements WHERE record_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(changed)
  }

  // ── Composite writes ───────────────────────────────────────────────────

  async fn persist_transition(
    &self,
    record: Refset,
    entry: WorkflowHistoryEntry,
    snapshot: SnapshotOp,
    mode: ConcurrencyMode,
  ) -> Result<Refset> {
    let mut bumped = record.clone();
    bumped.revision += 1;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let outcome = update_record(&tx, &record, mode)?;
        if !matches!(outcome, WriteOutcome::Done) {
          // Nothing written; the transaction drops without committing.
          return Ok(outcome);
        }
        insert_history(&tx, &entry)?;
        match &snapshot {
          SnapshotOp::None => {}
          SnapshotOp::Save(snap) => {
            let json = snap.record.to_string();
            insert_snapshot(&tx, snap, &json)?;
          }
          SnapshotOp::Delete(external_id) => {
            tx.execute(
              "DELETE FROM edit_snapshots WHERE external_id = ?1",
              rusqlite::params![external_id],
            )?;
          }
        }
        tx.commit()?;
        Ok(WriteOutcome::Done)
      })
      .await?;

    match outcome {
      WriteOutcome::Done => Ok(bumped),
      WriteOutcome::Missing => Err(Error::RecordNotFound(bumped.id)),
      WriteOutcome::Stale => Err(Error::StaleRevision {
        id:       bumped.id,
        expected: bumped.revision - 1,
      }),
    }
  }

  async fn remove_version(&self, record_id: Uuid, external_id: &str) -> Result<()> {
    let id_str = encode_uuid(record_id);
    let ext = external_id.to_owned();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM workflow_history WHERE record_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.execute(
          "DELETE FROM staged_replacements WHERE record_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.execute(
          "DELETE FROM edit_snapshots WHERE external_id = ?1",
          rusqlite::params![ext],
        )?;
        tx.execute(
          "DELETE FROM refsets WHERE id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
