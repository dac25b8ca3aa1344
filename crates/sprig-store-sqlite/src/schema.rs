//! SQL schema for the Sprig SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS refsets (
    id                         TEXT PRIMARY KEY,
    external_id                TEXT NOT NULL,
    title                      TEXT NOT NULL,
    narrative                  TEXT NOT NULL DEFAULT '',
    lifecycle_state            TEXT NOT NULL,   -- READY_FOR_EDIT .. PUBLISHED
    version_status             TEXT NOT NULL,   -- IN_DEVELOPMENT | PUBLISHED | RETIRED
    version_date               TEXT,            -- ISO date; set only at publication
    assigned_user              TEXT,            -- set iff state requires assignment
    edit_branch_id             TEXT,            -- live edit-branch segment, if any
    refset_branch_id           TEXT NOT NULL,
    is_local_set               INTEGER NOT NULL DEFAULT 0,
    latest_published_version   INTEGER NOT NULL DEFAULT 0,
    has_version_in_development INTEGER NOT NULL DEFAULT 0,
    revision                   INTEGER NOT NULL DEFAULT 0,
    created_at                 TEXT NOT NULL
);

-- At most one IN_DEVELOPMENT version may exist per external id.
CREATE UNIQUE INDEX IF NOT EXISTS refsets_one_in_dev
    ON refsets(external_id) WHERE version_status = 'IN_DEVELOPMENT';

-- Workflow history is strictly append-only.
-- Rows are removed only together with their owning record.
CREATE TABLE IF NOT EXISTS workflow_history (
    entry_id        TEXT PRIMARY KEY,
    record_id       TEXT NOT NULL REFERENCES refsets(id),
    actor           TEXT NOT NULL,
    action          TEXT NOT NULL,
    resulting_state TEXT NOT NULL,
    note            TEXT,
    recorded_at     TEXT NOT NULL
);

-- One rollback snapshot per external id, taken at the start of an edit
-- cycle and deleted when the cycle ends.
CREATE TABLE IF NOT EXISTS edit_snapshots (
    snapshot_id TEXT PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    record_json TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- 'Replace inactive concept' decisions staged during IN_UPGRADE; discarded
-- whenever the record leaves that state.
CREATE TABLE IF NOT EXISTS staged_replacements (
    staging_id          TEXT PRIMARY KEY,
    record_id           TEXT NOT NULL REFERENCES refsets(id),
    inactive_concept    TEXT NOT NULL,
    replacement_concept TEXT,
    recorded_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS refsets_external_idx   ON refsets(external_id);
CREATE INDEX IF NOT EXISTS history_record_idx     ON workflow_history(record_id);
CREATE INDEX IF NOT EXISTS staged_record_idx      ON staged_replacements(record_id);

PRAGMA user_version = 1;
";
