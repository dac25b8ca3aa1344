//! [`WorkflowEngine`] — authorization and transition execution.
//!
//! A transition runs in strict phases: authorize against the permutation
//! table and assignment rules, execute every branch side effect, then
//! persist the record + history + snapshot change in one transaction. Branch
//! failures abort the transition before anything is persisted; the engine
//! performs no partial rollback of branch operations that already ran (that
//! is an operator concern, logged at error severity by the branch service's
//! callers).

use std::{collections::BTreeSet, sync::Arc};

use chrono::Utc;
use uuid::Uuid;

use sprig_core::{
  branch::{BranchLineage, BranchPath, BranchService, LOCAL_ROOT_SEGMENT},
  lifecycle::{LifecycleState, Role, User, WorkflowAction},
  permutation::PermutationTable,
  record::{EditSnapshot, Refset, VersionStatus, WorkflowHistoryEntry},
  store::{RecordStore, SnapshotOp},
};

use crate::{
  cache::{BranchCache, FieldToggle},
  config::EngineConfig,
  error::{Error, Result},
  external::{
    GroupSync, NotificationEvent, Notifier, notify_best_effort, sync_best_effort,
  },
};

/// Field toggled inside cached payloads when edit results are promoted to
/// refset results.
const EDITING_FLAG: &str = "editing";

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct WorkflowEngine<S, B> {
  pub(crate) store:    Arc<S>,
  pub(crate) branches: Arc<B>,
  pub(crate) cache:    Arc<BranchCache>,
  pub(crate) lineage:  BranchLineage,
  pub(crate) config:   EngineConfig,
  table:      PermutationTable,
  notifier:   Option<Arc<dyn Notifier>>,
  group_sync: Option<Arc<dyn GroupSync>>,
}

impl<S, B> std::fmt::Debug for WorkflowEngine<S, B> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkflowEngine")
      .field("lineage", &self.lineage)
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl<S, B> WorkflowEngine<S, B>
where
  S: RecordStore,
  B: BranchService,
{
  /// Build an engine over the given backends.
  ///
  /// Fails with a conflict when the permutation table contains entries for
  /// the same `(state, action)` that disagree on the next state — such a
  /// table would make outcomes depend on role ordering.
  pub fn new(
    store: Arc<S>,
    branches: Arc<B>,
    cache: Arc<BranchCache>,
    table: PermutationTable,
    config: EngineConfig,
  ) -> Result<Self> {
    let conflicts = table.verify_consistent();
    if let Some(first) = conflicts.first() {
      return Err(Error::Core(sprig_core::Error::Conflict(format!(
        "permutation table has {} conflicting entries; first: \
         ({}, {}) maps to both {:?} and {:?}",
        conflicts.len(),
        first.current,
        first.action,
        first.a.next,
        first.b.next,
      ))));
    }

    let lineage = BranchLineage::new(&config.edition, &config.project);
    Ok(Self {
      store,
      branches,
      cache,
      lineage,
      config,
      table,
      notifier: None,
      group_sync: None,
    })
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = Some(notifier);
    self
  }

  pub fn with_group_sync(mut self, sync: Arc<dyn GroupSync>) -> Self {
    self.group_sync = Some(sync);
    self
  }

  pub fn lineage(&self) -> &BranchLineage {
    &self.lineage
  }

  pub fn cache(&self) -> &Arc<BranchCache> {
    &self.cache
  }

  // ── Authorization ──────────────────────────────────────────────────────

  /// The set of actions `user` may currently take on `record`.
  pub fn compute_allowed_actions(
    &self,
    user: &User,
    record: &Refset,
  ) -> BTreeSet<WorkflowAction> {
    // A published version only offers starting a fresh edit cycle (which
    // spawns a new in-development version).
    if record.version_status == VersionStatus::Published {
      return if user.has_role(Role::Author) || user.is_admin() {
        [WorkflowAction::Edit, WorkflowAction::Upgrade].into()
      } else {
        BTreeSet::new()
      };
    }

    let state = record.lifecycle_state;
    if state.requires_assignment() {
      let is_assigned =
        record.assigned_user.as_deref() == Some(user.username.as_str());
      if is_assigned {
        return self.table.actions_for(&user.roles, state);
      }
      if user.is_admin() {
        // Admins may only intervene, not continue someone else's work.
        return self
          .table
          .actions_for(&[Role::Admin], state)
          .into_iter()
          .filter(WorkflowAction::is_admin_override)
          .collect();
      }
      return BTreeSet::new();
    }

    self.table.actions_for(&user.roles, state)
  }

  // ── Transition ─────────────────────────────────────────────────────────

  /// Validate and execute `action` on the record, running all branch side
  /// effects before anything is persisted.
  ///
  /// On a published record, `EDIT`/`UPGRADE` first spawn a fresh
  /// in-development version and the transition continues on that version.
  pub async fn transition(
    &self,
    user: &User,
    record_id: Uuid,
    action: WorkflowAction,
    note: Option<String>,
  ) -> Result<Refset> {
    let mut record = self
      .store
      .find_by_id(record_id)
      .await
      .map_err(Error::store)?
      .ok_or(sprig_core::Error::RecordNotFound(record_id))?;

    if record.version_status == VersionStatus::Published {
      let allowed = self.compute_allowed_actions(user, &record);
      if !allowed.contains(&action) {
        return Err(self.unauthorized(user, &record, action));
      }
      if self
        .store
        .find_in_development(&record.external_id)
        .await
        .map_err(Error::store)?
        .is_some()
      {
        return Err(Error::Core(sprig_core::Error::Conflict(format!(
          "an in-development version of {} already exists; edit that version",
          record.external_id
        ))));
      }
      record = self.spawn_new_version(user, &record).await?;
    }

    let current = record.lifecycle_state;
    let allowed = self.compute_allowed_actions(user, &record);
    if !allowed.contains(&action) {
      return Err(self.unauthorized(user, &record, action));
    }
    let Some(next) = self.table.lookup(&user.roles, current, action) else {
      return Err(self.unauthorized(user, &record, action));
    };
    let resulting_state = next.unwrap_or(current);

    tracing::info!(
      record = %record.external_id,
      %action,
      from = %current,
      to = %resulting_state,
      actor = %user.username,
      "workflow transition"
    );

    // Phase: branch side effects. Any failure here aborts the transition
    // with nothing persisted.
    let mut updated = record.clone();
    let mut snapshot_op = SnapshotOp::None;

    let entering_edit = !current.requires_assignment()
      && matches!(next, Some(LifecycleState::InEdit | LifecycleState::InUpgrade));
    let leaving_edit_cycle =
      matches!(current, LifecycleState::InEdit | LifecycleState::InUpgrade)
        && next.is_some_and(|n| n != current);

    if entering_edit {
      self.start_edit_cycle(&record, &mut updated).await?;
      snapshot_op = SnapshotOp::Save(EditSnapshot::capture(&record)?);
    } else if leaving_edit_cycle {
      match action {
        WorkflowAction::FinishEdit
        | WorkflowAction::FinishUpgrade
        | WorkflowAction::RequestReview
        | WorkflowAction::RequestPublication => {
          self.promote_edit_branch(&record, &mut updated).await?;
        }
        // Cancellation and admin unassignment both discard the edit work.
        WorkflowAction::CancelEdit
        | WorkflowAction::CancelUpgrade
        | WorkflowAction::Unassign => {
          self.discard_edit_branch(&record, &mut updated).await?;
        }
        _ => {}
      }
      snapshot_op = SnapshotOp::Delete(record.external_id.clone());
    }

    // Leaving IN_UPGRADE by any path discards pending replacement staging.
    if current == LifecycleState::InUpgrade && next.is_some_and(|n| n != current)
    {
      let dropped = self
        .store
        .clear_staged(record.id)
        .await
        .map_err(Error::store)?;
      if dropped > 0 {
        tracing::debug!(record = %record.external_id, dropped, "staged replacements discarded");
      }
    }

    // Assignment follows the resulting state.
    updated.assigned_user = if resulting_state.requires_assignment() {
      if current.requires_assignment() {
        updated.assigned_user
      } else {
        Some(user.username.clone())
      }
    } else {
      None
    };

    if next == Some(LifecycleState::Published) {
      let date = self
        .branches
        .latest_version_date(self.lineage.edition())
        .await?;
      self.apply_publication(&mut updated, date).await?;
    }
    updated.lifecycle_state = resulting_state;

    // Phase: persist record + history + snapshot atomically.
    let entry = WorkflowHistoryEntry {
      entry_id: Uuid::new_v4(),
      record_id: updated.id,
      actor: user.username.clone(),
      action,
      resulting_state,
      note,
      recorded_at: Utc::now(),
    };
    let persisted = self
      .store
      .persist_transition(updated, entry, snapshot_op, self.config.concurrency)
      .await
      .map_err(Error::store)?;

    if next == Some(LifecycleState::Published) {
      self
        .clear_prior_latest(&persisted.external_id, persisted.id)
        .await?;
    }

    self.dispatch_events(user, &record, &persisted, action);
    Ok(persisted)
  }

  fn unauthorized(
    &self,
    user: &User,
    record: &Refset,
    action: WorkflowAction,
  ) -> Error {
    Error::Core(sprig_core::Error::UnauthorizedTransition {
      user:   user.username.clone(),
      action,
      state:  record.lifecycle_state,
    })
  }

  // ── Branch side effects ────────────────────────────────────────────────

  /// Make sure the fixed part of the lineage (project, local root) exists.
  pub(crate) async fn ensure_lineage(&self, is_local_set: bool) -> Result<()> {
    let project = self.lineage.project();
    if !self.branches.exists(project).await? {
      self
        .branches
        .create(self.lineage.edition(), &self.config.project)
        .await?;
    }
    if is_local_set {
      let local_root = self.lineage.local_root();
      if !self.branches.exists(local_root).await? {
        self.branches.create(project, LOCAL_ROOT_SEGMENT).await?;
      }
    }
    Ok(())
  }

  pub(crate) async fn ensure_refset_branch(
    &self,
    record: &Refset,
  ) -> Result<BranchPath> {
    let path = self.lineage.refset(record);
    if !self.branches.exists(&path).await? {
      self
        .branches
        .create(
          self.lineage.refset_parent(record.is_local_set),
          &record.refset_branch_id,
        )
        .await?;
    }
    Ok(path)
  }

  /// Rebase the lineage top-down, then open a fresh edit branch.
  async fn start_edit_cycle(
    &self,
    record: &Refset,
    updated: &mut Refset,
  ) -> Result<()> {
    self.ensure_lineage(record.is_local_set).await?;
    let refset_path = self.ensure_refset_branch(record).await?;

    let edition = self.lineage.edition();
    let project = self.lineage.project();
    self
      .branches
      .merge(project, edition, "Rebase project from edition", true)
      .await?;
    if record.is_local_set {
      self
        .branches
        .merge(
          self.lineage.local_root(),
          project,
          "Rebase local root from project",
          true,
        )
        .await?;
    }
    self
      .branches
      .merge(
        &refset_path,
        self.lineage.refset_parent(record.is_local_set),
        "Rebase refset branch",
        true,
      )
      .await?;

    let edit_name = format!("edit-{}", Uuid::new_v4().simple());
    let edit_path = self.branches.create(&refset_path, &edit_name).await?;
    tracing::debug!(branch = %edit_path, "edit branch created");
    updated.edit_branch_id = Some(edit_name);
    Ok(())
  }

  /// Promote the edit branch into the refset branch, carry its cache over
  /// (clearing the in-edit flag), then tear the branch down.
  async fn promote_edit_branch(
    &self,
    record: &Refset,
    updated: &mut Refset,
  ) -> Result<()> {
    let edit_path = self.lineage.edit(record).ok_or_else(|| {
      sprig_core::Error::InvalidState {
        state:     record.lifecycle_state,
        operation: "finish edit without an open edit branch".into(),
      }
    })?;
    let refset_path = self.lineage.refset(record);

    self
      .branches
      .merge(&edit_path, &refset_path, "Promote edit branch", false)
      .await?;
    self.cache.copy_and_rekey(
      &edit_path,
      &refset_path,
      Some(&FieldToggle::new(EDITING_FLAG, false)),
    );
    self.branches.delete(&edit_path).await?;
    self.cache.invalidate(&edit_path);
    updated.edit_branch_id = None;
    Ok(())
  }

  /// Drop the edit branch without merging and roll the record's content
  /// fields back to the pre-edit snapshot.
  async fn discard_edit_branch(
    &self,
    record: &Refset,
    updated: &mut Refset,
  ) -> Result<()> {
    if let Some(edit_path) = self.lineage.edit(record) {
      self.cache.invalidate(&edit_path);
      self.branches.delete(&edit_path).await?;
    }

    match self
      .store
      .get_snapshot(&record.external_id)
      .await
      .map_err(Error::store)?
    {
      Some(snapshot) => {
        let saved = snapshot.restore()?;
        updated.title = saved.title;
        updated.narrative = saved.narrative;
      }
      None => {
        tracing::warn!(
          record = %record.external_id,
          "cancel without edit snapshot; content fields left as-is"
        );
      }
    }
    updated.edit_branch_id = None;
    Ok(())
  }

  /// Publication side effects shared by the `PUBLISH_REFSET` transition and
  /// [`complete_publication`](Self::complete_publication).
  pub(crate) async fn apply_publication(
    &self,
    updated: &mut Refset,
    version_date: chrono::NaiveDate,
  ) -> Result<()> {
    if updated.is_local_set {
      // Local sets version through the permanent local root instead of the
      // terminology server's own release process.
      let refset_path = self.lineage.refset(updated);
      self
        .branches
        .merge(
          &refset_path,
          self.lineage.local_root(),
          "Promote refset for publication",
          false,
        )
        .await?;
    }
    updated.version_date = Some(version_date);
    updated.version_status = VersionStatus::Published;
    updated.latest_published_version = true;
    updated.has_version_in_development = false;
    Ok(())
  }

  /// Demote whichever other version was the latest published one.
  pub(crate) async fn clear_prior_latest(
    &self,
    external_id: &str,
    except: Uuid,
  ) -> Result<()> {
    let versions = self
      .store
      .versions_of(external_id)
      .await
      .map_err(Error::store)?;
    for mut version in versions {
      if version.id != except && version.latest_published_version {
        version.latest_published_version = false;
        version.has_version_in_development = false;
        self
          .store
          .update(version, self.config.concurrency)
          .await
          .map_err(Error::store)?;
      }
    }
    Ok(())
  }

  // ── Post-persist collaborators ─────────────────────────────────────────

  fn dispatch_events(
    &self,
    user: &User,
    before: &Refset,
    after: &Refset,
    action: WorkflowAction,
  ) {
    if action == WorkflowAction::RequestReview {
      notify_best_effort(
        self.notifier.as_deref(),
        NotificationEvent::ReviewRequested {
          external_id:  after.external_id.clone(),
          title:        after.title.clone(),
          requested_by: user.username.clone(),
        },
      );
    }
    if after.lifecycle_state == LifecycleState::Published
      && before.lifecycle_state != LifecycleState::Published
    {
      notify_best_effort(
        self.notifier.as_deref(),
        NotificationEvent::Published {
          external_id: after.external_id.clone(),
          title:       after.title.clone(),
        },
      );
    }
    if before.assigned_user != after.assigned_user {
      notify_best_effort(
        self.notifier.as_deref(),
        NotificationEvent::AssignmentChanged {
          external_id: after.external_id.clone(),
          assigned_to: after.assigned_user.clone(),
        },
      );
      sync_best_effort(
        self.group_sync.as_deref(),
        after,
        after.assigned_user.as_deref(),
      );
    }
  }
}
