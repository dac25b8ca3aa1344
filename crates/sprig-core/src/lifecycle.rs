//! Lifecycle states, workflow actions, and editorial roles.
//!
//! The eight states form a total order from `READY_FOR_EDIT` to `PUBLISHED`;
//! the order is only used for display/reporting — legal movement between
//! states is governed entirely by the [`PermutationTable`](crate::permutation).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The editorial state of a record version.
///
/// `Published` is terminal for the version; continuing work spawns a fresh
/// `IN_DEVELOPMENT` version starting over at `ReadyForEdit`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
  Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
  ReadyForEdit,
  InEdit,
  InUpgrade,
  ReadyForReview,
  InReview,
  ReviewCompleted,
  ReadyForPublication,
  Published,
}

impl LifecycleState {
  /// States in which exactly one user holds the record exclusively.
  /// While in one of these states `assigned_user` must be set; in every
  /// other state it must be cleared.
  pub fn requires_assignment(&self) -> bool {
    matches!(self, Self::InEdit | Self::InUpgrade | Self::InReview)
  }
}

/// An action a caller can request against a record.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
  Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowAction {
  Create,
  Edit,
  CancelEdit,
  FinishEdit,
  Upgrade,
  CancelUpgrade,
  FinishUpgrade,
  RequestReview,
  Review,
  RejectReview,
  AcceptReview,
  Unassign,
  RequestPublication,
  FailsRvf,
  PublishRefset,
}

impl WorkflowAction {
  /// Actions an admin may take on an exclusively-assigned record even when
  /// they are not the assigned user.
  pub fn is_admin_override(&self) -> bool {
    matches!(
      self,
      Self::CancelEdit
        | Self::FinishEdit
        | Self::CancelUpgrade
        | Self::FinishUpgrade
        | Self::Unassign
    )
  }
}

/// An editorial role held by a user.
///
/// A user carries an *ordered* list of roles; permutation lookup walks that
/// list front to back and takes the first matching entry, so the order is
/// the role-precedence order.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash,
  Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
  Admin,
  Author,
  Reviewer,
}

/// A caller identity: a stable username plus their ordered roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub username: String,
  /// Role-precedence order; see [`Role`].
  pub roles:    Vec<Role>,
}

impl User {
  pub fn new(username: impl Into<String>, roles: Vec<Role>) -> Self {
    Self { username: username.into(), roles }
  }

  pub fn has_role(&self, role: Role) -> bool {
    self.roles.contains(&role)
  }

  pub fn is_admin(&self) -> bool {
    self.has_role(Role::Admin)
  }
}
