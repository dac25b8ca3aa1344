//! Branch paths and the `BranchService` trait.
//!
//! Branches form a hierarchical path namespace owned by an external
//! terminology server. [`BranchPath`] is the single place paths are
//! composed — callers never concatenate strings themselves — and
//! [`BranchLineage`] encodes the fixed topology
//! `edition → project → [local root] → refset → edit`.

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Refset;

// ─── Path ────────────────────────────────────────────────────────────────────

/// A `/`-separated branch path. Parent/child relations are purely
/// positional; the branch store is the source of truth for what exists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchPath(String);

impl BranchPath {
  /// A root (edition) path, e.g. `MAIN`.
  pub fn root(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn child(&self, name: &str) -> Self {
    Self(format!("{}/{name}", self.0))
  }

  pub fn parent(&self) -> Option<Self> {
    self.0.rsplit_once('/').map(|(parent, _)| Self(parent.to_owned()))
  }

  /// The final path segment.
  pub fn name(&self) -> &str {
    self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, name)| name)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_ancestor_of(&self, other: &Self) -> bool {
    other.0.len() > self.0.len()
      && other.0.starts_with(&self.0)
      && other.0.as_bytes()[self.0.len()] == b'/'
  }
}

impl std::fmt::Display for BranchPath {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Lineage ─────────────────────────────────────────────────────────────────

/// The branch topology for one deployment: the edition root, the project
/// branch beneath it, and the permanent local-set root beneath that.
///
/// Record-specific paths (`refset`, `edit`) hang off the lineage using the
/// branch ids stored on the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchLineage {
  edition:    BranchPath,
  project:    BranchPath,
  local_root: BranchPath,
}

/// Segment name of the permanent top-level branch local sets publish into.
pub const LOCAL_ROOT_SEGMENT: &str = "LOCAL";

impl BranchLineage {
  pub fn new(edition: &str, project: &str) -> Self {
    let edition = BranchPath::root(edition);
    let project = edition.child(project);
    let local_root = project.child(LOCAL_ROOT_SEGMENT);
    Self { edition, project, local_root }
  }

  pub fn edition(&self) -> &BranchPath {
    &self.edition
  }

  pub fn project(&self) -> &BranchPath {
    &self.project
  }

  pub fn local_root(&self) -> &BranchPath {
    &self.local_root
  }

  /// The branch a record's refset branch is created under.
  pub fn refset_parent(&self, is_local_set: bool) -> &BranchPath {
    if is_local_set { &self.local_root } else { &self.project }
  }

  /// The refset branch for `record`.
  pub fn refset(&self, record: &Refset) -> BranchPath {
    self
      .refset_parent(record.is_local_set)
      .child(&record.refset_branch_id)
  }

  /// The live edit branch for `record`, if an edit cycle is open.
  pub fn edit(&self, record: &Refset) -> Option<BranchPath> {
    record
      .edit_branch_id
      .as_deref()
      .map(|id| self.refset(record).child(id))
  }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failures from the external branch store. `Conflict` is surfaced, never
/// auto-resolved.
#[derive(Debug, Error)]
pub enum BranchError {
  #[error("branch not found: {0}")]
  NotFound(BranchPath),

  #[error("branch already exists: {0}")]
  AlreadyExists(BranchPath),

  #[error("merge conflict between {source_branch} and {target}: {detail}")]
  Conflict {
    source_branch: BranchPath,
    target: BranchPath,
    detail: String,
  },

  /// Transport or server-side failure from the terminology server.
  #[error("branch service error: {0}")]
  Remote(String),
}

// ─── Service trait ───────────────────────────────────────────────────────────

/// The external terminology server's branch operations.
///
/// All calls are remote and blocking from the engine's point of view; the
/// engine never proceeds past a branch side effect until it completes or
/// fails.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait BranchService: Send + Sync {
  fn exists<'a>(
    &'a self,
    path: &'a BranchPath,
  ) -> impl Future<Output = Result<bool, BranchError>> + Send + 'a;

  /// Create `name` under `parent`. Fails with [`BranchError::NotFound`] if
  /// the parent does not exist and [`BranchError::AlreadyExists`] if the
  /// child already does — callers are expected to check `exists` first.
  fn create<'a>(
    &'a self,
    parent: &'a BranchPath,
    name: &'a str,
  ) -> impl Future<Output = Result<BranchPath, BranchError>> + Send + 'a;

  /// Merge content between two branches.
  ///
  /// `rebase = true` pulls `target`'s newer content down into `source`
  /// (keeping a working branch current); `rebase = false` promotes
  /// `source`'s changes up into `target` (finalising them). Conflicting
  /// changes fail with [`BranchError::Conflict`].
  fn merge<'a>(
    &'a self,
    source: &'a BranchPath,
    target: &'a BranchPath,
    comment: &'a str,
    rebase: bool,
  ) -> impl Future<Output = Result<(), BranchError>> + Send + 'a;

  /// Delete a branch. Returns `false` if it did not exist.
  fn delete<'a>(
    &'a self,
    path: &'a BranchPath,
  ) -> impl Future<Output = Result<bool, BranchError>> + Send + 'a;

  fn list_children<'a>(
    &'a self,
    path: &'a BranchPath,
  ) -> impl Future<Output = Result<Vec<BranchPath>, BranchError>> + Send + 'a;

  /// Mint a stable external id for a new local set, using `temp_branch` as
  /// the namespace the server allocates against.
  fn generate_new_external_id<'a>(
    &'a self,
    temp_branch: &'a BranchPath,
  ) -> impl Future<Output = Result<String, BranchError>> + Send + 'a;

  /// The version date of the latest available release of the edition —
  /// stamped onto records at publication.
  fn latest_version_date<'a>(
    &'a self,
    edition: &'a BranchPath,
  ) -> impl Future<Output = Result<NaiveDate, BranchError>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn path_composition() {
    let main = BranchPath::root("MAIN");
    let project = main.child("SPRIG");
    assert_eq!(project.as_str(), "MAIN/SPRIG");
    assert_eq!(project.name(), "SPRIG");
    assert_eq!(project.parent(), Some(main.clone()));
    assert_eq!(main.parent(), None);
  }

  #[test]
  fn ancestry() {
    let main = BranchPath::root("MAIN");
    let project = main.child("SPRIG");
    let sibling = BranchPath::root("MAIN-OTHER");
    assert!(main.is_ancestor_of(&project));
    assert!(!project.is_ancestor_of(&main));
    assert!(!main.is_ancestor_of(&sibling));
    assert!(!main.is_ancestor_of(&main));
  }

  #[test]
  fn lineage_topology() {
    let lineage = BranchLineage::new("MAIN", "SPRIG");
    assert_eq!(lineage.project().as_str(), "MAIN/SPRIG");
    assert_eq!(lineage.local_root().as_str(), "MAIN/SPRIG/LOCAL");
    assert_eq!(lineage.refset_parent(false), lineage.project());
    assert_eq!(lineage.refset_parent(true), lineage.local_root());
  }
}
