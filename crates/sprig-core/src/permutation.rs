//! The permutation table: `(role, current state, action) → next state`.
//!
//! The table is an immutable value constructed during engine initialisation
//! and passed in — never a static singleton — so tests can substitute their
//! own rule sets. Lookup walks the caller's ordered role list front to back
//! and takes the first matching entry; with the [`default_table`] rule set
//! every pair of roles that matches the same `(state, action)` agrees on the
//! outcome, and [`PermutationTable::verify_consistent`] lets callers prove
//! that property for custom tables instead of depending on role order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::lifecycle::{LifecycleState, Role, WorkflowAction};

use LifecycleState::*;
use Role::*;
use WorkflowAction::*;

// ─── Entry ───────────────────────────────────────────────────────────────────

/// One row of the permutation table.
///
/// `next` of `None` means the action is permitted but changes no state —
/// used for side-effect-only actions such as recording a note mid-edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationEntry {
  pub role:    Role,
  pub current: LifecycleState,
  pub action:  WorkflowAction,
  pub next:    Option<LifecycleState>,
}

impl PermutationEntry {
  pub const fn new(
    role: Role,
    current: LifecycleState,
    action: WorkflowAction,
    next: Option<LifecycleState>,
  ) -> Self {
    Self { role, current, action, next }
  }
}

// ─── Table ───────────────────────────────────────────────────────────────────

/// A conflicting pair of entries: two roles matching the same
/// `(state, action)` but disagreeing on the next state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationConflict {
  pub current: LifecycleState,
  pub action:  WorkflowAction,
  pub a:       PermutationEntry,
  pub b:       PermutationEntry,
}

/// The loaded transition rule set. Read-only after construction; safe for
/// unsynchronised concurrent reads.
#[derive(Debug, Clone)]
pub struct PermutationTable {
  entries: Vec<PermutationEntry>,
}

impl PermutationTable {
  pub fn new(entries: Vec<PermutationEntry>) -> Self {
    Self { entries }
  }

  /// Resolve the outcome for a caller with the given *ordered* roles.
  ///
  /// Returns `None` when no role of the caller has an entry for
  /// `(current, action)` — the action is disallowed. Returns
  /// `Some(None)` for permitted actions with no state change.
  pub fn lookup(
    &self,
    roles: &[Role],
    current: LifecycleState,
    action: WorkflowAction,
  ) -> Option<Option<LifecycleState>> {
    for role in roles {
      if let Some(entry) = self
        .entries
        .iter()
        .find(|e| e.role == *role && e.current == current && e.action == action)
      {
        return Some(entry.next);
      }
    }
    None
  }

  /// All actions any of the given roles may take from `current`.
  pub fn actions_for(
    &self,
    roles: &[Role],
    current: LifecycleState,
  ) -> BTreeSet<WorkflowAction> {
    self
      .entries
      .iter()
      .filter(|e| e.current == current && roles.contains(&e.role))
      .map(|e| e.action)
      .collect()
  }

  /// Every `(state, action)` pair that appears in the table, deduplicated.
  pub fn state_action_pairs(&self) -> BTreeSet<(LifecycleState, WorkflowAction)> {
    self.entries.iter().map(|e| (e.current, e.action)).collect()
  }

  /// Report every `(state, action)` pair whose matching roles disagree on
  /// the next state. An empty result means lookup outcome is independent of
  /// the caller's role order.
  pub fn verify_consistent(&self) -> Vec<PermutationConflict> {
    let mut conflicts = Vec::new();
    for (i, a) in self.entries.iter().enumerate() {
      for b in &self.entries[i + 1..] {
        if a.current == b.current && a.action == b.action && a.next != b.next {
          conflicts.push(PermutationConflict {
            current: a.current,
            action:  a.action,
            a:       *a,
            b:       *b,
          });
        }
      }
    }
    conflicts
  }

  pub fn entries(&self) -> &[PermutationEntry] {
    &self.entries
  }
}

// ─── Default rule set ────────────────────────────────────────────────────────

/// The standard editorial rule set.
///
/// Authors drive the edit/upgrade cycle, reviewers drive review, admins hold
/// the union plus publication and the override actions. Admin rows that
/// shadow author/reviewer rows agree on the next state by construction.
pub fn default_table() -> PermutationTable {
  let author: &[(LifecycleState, WorkflowAction, Option<LifecycleState>)] = &[
    (ReadyForEdit, Edit, Some(InEdit)),
    (ReadyForEdit, Upgrade, Some(InUpgrade)),
    // Mid-edit note: permitted, no state change.
    (InEdit, Edit, None),
    (InEdit, FinishEdit, Some(ReadyForEdit)),
    (InEdit, CancelEdit, Some(ReadyForEdit)),
    (InEdit, RequestReview, Some(ReadyForReview)),
    (InEdit, RequestPublication, Some(ReadyForPublication)),
    (InUpgrade, FinishUpgrade, Some(ReadyForEdit)),
    (InUpgrade, CancelUpgrade, Some(ReadyForEdit)),
    // Pulling a record back out of the review queue.
    (ReadyForReview, Edit, Some(InEdit)),
    (ReviewCompleted, Edit, Some(InEdit)),
    (ReviewCompleted, RequestPublication, Some(ReadyForPublication)),
  ];

  let reviewer: &[(LifecycleState, WorkflowAction, Option<LifecycleState>)] = &[
    (ReadyForReview, Review, Some(InReview)),
    (InReview, AcceptReview, Some(ReviewCompleted)),
    (InReview, RejectReview, Some(ReadyForEdit)),
    (InReview, Unassign, Some(ReadyForReview)),
  ];

  let admin_only: &[(LifecycleState, WorkflowAction, Option<LifecycleState>)] = &[
    (InEdit, Unassign, Some(ReadyForEdit)),
    (InUpgrade, Unassign, Some(ReadyForEdit)),
    (ReadyForPublication, PublishRefset, Some(Published)),
    (ReadyForPublication, FailsRvf, Some(ReadyForEdit)),
  ];

  let mut entries = Vec::new();
  for &(state, action, next) in author {
    entries.push(PermutationEntry::new(Author, state, action, next));
    entries.push(PermutationEntry::new(Admin, state, action, next));
  }
  for &(state, action, next) in reviewer {
    entries.push(PermutationEntry::new(Reviewer, state, action, next));
    entries.push(PermutationEntry::new(Admin, state, action, next));
  }
  for &(state, action, next) in admin_only {
    entries.push(PermutationEntry::new(Admin, state, action, next));
  }

  PermutationTable::new(entries)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_table_is_conflict_free() {
    assert!(default_table().verify_consistent().is_empty());
  }

  #[test]
  fn lookup_respects_role_order_but_default_agrees() {
    let table = default_table();
    // Both orders resolve identically because overlapping rows agree.
    let forward = table.lookup(&[Author, Admin], ReadyForEdit, Edit);
    let backward = table.lookup(&[Admin, Author], ReadyForEdit, Edit);
    assert_eq!(forward, Some(Some(InEdit)));
    assert_eq!(forward, backward);
  }

  #[test]
  fn unmatched_role_is_disallowed() {
    let table = default_table();
    assert_eq!(table.lookup(&[Reviewer], ReadyForEdit, Edit), None);
    assert_eq!(table.lookup(&[], ReadyForEdit, Edit), None);
  }

  #[test]
  fn mid_edit_note_has_no_state_change() {
    let table = default_table();
    assert_eq!(table.lookup(&[Author], InEdit, Edit), Some(None));
  }

  #[test]
  fn verify_consistent_flags_disagreeing_roles() {
    let table = PermutationTable::new(vec![
      PermutationEntry::new(Author, ReadyForEdit, Edit, Some(InEdit)),
      PermutationEntry::new(Admin, ReadyForEdit, Edit, Some(InUpgrade)),
    ]);
    let conflicts = table.verify_consistent();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].current, ReadyForEdit);
    assert_eq!(conflicts[0].action, Edit);
  }

  #[test]
  fn actions_for_enumerates_per_role() {
    let table = default_table();

    let author_actions = table.actions_for(&[Author], ReadyForEdit);
    assert!(author_actions.contains(&Edit));
    assert!(author_actions.contains(&Upgrade));
    assert!(!author_actions.contains(&PublishRefset));

    let admin_actions = table.actions_for(&[Admin], ReadyForPublication);
    assert!(admin_actions.contains(&PublishRefset));
    assert!(admin_actions.contains(&FailsRvf));
  }
}
