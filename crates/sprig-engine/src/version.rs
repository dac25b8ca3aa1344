//! Version lifecycle operations: creating sets, spawning new versions of
//! published sets, completing publication out-of-band, and deleting
//! in-development versions.
//!
//! Lives in a separate `impl` block so the transition machinery in
//! `workflow` stays focused on the permutation-table path.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use sprig_core::{
  branch::BranchService,
  lifecycle::{LifecycleState, User, WorkflowAction},
  record::{
    NewRefset, Refset, StagedReplacement, VersionStatus, WorkflowHistoryEntry,
  },
  store::{RecordStore, SnapshotOp},
};

use crate::{
  error::{Error, Result},
  workflow::WorkflowEngine,
};

impl<S, B> WorkflowEngine<S, B>
where
  S: RecordStore,
  B: BranchService,
{
  /// Create a brand-new reference set in `READY_FOR_EDIT`.
  ///
  /// Local sets have their external id minted by the branch service;
  /// non-local sets must arrive with one. The record's refset branch is
  /// created eagerly so the first edit cycle has somewhere to rebase from.
  pub async fn create_refset(
    &self,
    user: &User,
    input: NewRefset,
  ) -> Result<Refset> {
    self.ensure_lineage(input.is_local_set).await?;

    let external_id = match input.external_id {
      Some(id) => id,
      None if input.is_local_set => {
        self
          .branches
          .generate_new_external_id(self.lineage.local_root())
          .await?
      }
      None => {
        return Err(Error::Core(sprig_core::Error::Validation(
          "non-local sets require an externally assigned id".into(),
        )));
      }
    };

    if self
      .store
      .find_in_development(&external_id)
      .await
      .map_err(Error::store)?
      .is_some()
    {
      return Err(Error::Core(sprig_core::Error::Conflict(format!(
        "an in-development version of {external_id} already exists"
      ))));
    }

    let record = Refset {
      id: Uuid::new_v4(),
      external_id,
      title: input.title,
      narrative: input.narrative,
      lifecycle_state: LifecycleState::ReadyForEdit,
      version_status: VersionStatus::InDevelopment,
      version_date: None,
      assigned_user: None,
      edit_branch_id: None,
      refset_branch_id: fresh_refset_branch_id(),
      is_local_set: input.is_local_set,
      latest_published_version: false,
      has_version_in_development: false,
      revision: 0,
      created_at: Utc::now(),
    };
    self.ensure_refset_branch(&record).await?;

    let record = self.store.add(record).await.map_err(Error::store)?;
    self.record_creation(user, &record).await?;
    tracing::info!(record = %record.external_id, "reference set created");
    Ok(record)
  }

  /// Spawn a fresh `IN_DEVELOPMENT` version of a published record.
  ///
  /// The new version copies the published content, gets its own refset
  /// branch, and starts in `READY_FOR_EDIT`; the prior version is flagged
  /// as having a version in development.
  pub async fn create_new_version(
    &self,
    user: &User,
    record_id: Uuid,
  ) -> Result<Refset> {
    let prior = self
      .store
      .find_by_id(record_id)
      .await
      .map_err(Error::store)?
      .ok_or(sprig_core::Error::RecordNotFound(record_id))?;
    self.spawn_new_version(user, &prior).await
  }

  pub(crate) async fn spawn_new_version(
    &self,
    user: &User,
    prior: &Refset,
  ) -> Result<Refset> {
    if prior.version_status != VersionStatus::Published {
      return Err(Error::Core(sprig_core::Error::InvalidState {
        state:     prior.lifecycle_state,
        operation: "create a new version of an unpublished record".into(),
      }));
    }
    if self
      .store
      .find_in_development(&prior.external_id)
      .await
      .map_err(Error::store)?
      .is_some()
    {
      return Err(Error::Core(sprig_core::Error::Conflict(format!(
        "an in-development version of {} already exists",
        prior.external_id
      ))));
    }

    self.ensure_lineage(prior.is_local_set).await?;
    let record = Refset {
      id: Uuid::new_v4(),
      external_id: prior.external_id.clone(),
      title: prior.title.clone(),
      narrative: prior.narrative.clone(),
      lifecycle_state: LifecycleState::ReadyForEdit,
      version_status: VersionStatus::InDevelopment,
      version_date: None,
      assigned_user: None,
      edit_branch_id: None,
      // Each version owns its own branch; the prior version's branch stays
      // behind as the published baseline.
      refset_branch_id: fresh_refset_branch_id(),
      is_local_set: prior.is_local_set,
      latest_published_version: false,
      has_version_in_development: false,
      revision: 0,
      created_at: Utc::now(),
    };
    self.ensure_refset_branch(&record).await?;

    let record = self.store.add(record).await.map_err(Error::store)?;

    let mut flagged = prior.clone();
    flagged.has_version_in_development = true;
    self
      .store
      .update(flagged, self.config.concurrency)
      .await
      .map_err(Error::store)?;

    self.record_creation(user, &record).await?;
    tracing::info!(
      record = %record.external_id,
      "new in-development version spawned"
    );
    Ok(record)
  }

  /// Publish a record that reached `READY_FOR_PUBLICATION`, stamping an
  /// explicitly chosen version date instead of the edition's latest release.
  ///
  /// Calling this twice fails: the first call leaves the record in
  /// `PUBLISHED`, which is not a valid starting state here.
  pub async fn complete_publication(
    &self,
    user: &User,
    record_id: Uuid,
    version_date: NaiveDate,
  ) -> Result<Refset> {
    let record = self
      .store
      .find_by_id(record_id)
      .await
      .map_err(Error::store)?
      .ok_or(sprig_core::Error::RecordNotFound(record_id))?;
    if record.lifecycle_state != LifecycleState::ReadyForPublication {
      return Err(Error::Core(sprig_core::Error::InvalidState {
        state:     record.lifecycle_state,
        operation: "complete publication".into(),
      }));
    }

    let mut updated = record.clone();
    self.apply_publication(&mut updated, version_date).await?;
    updated.lifecycle_state = LifecycleState::Published;

    let entry = WorkflowHistoryEntry {
      entry_id: Uuid::new_v4(),
      record_id: updated.id,
      actor: user.username.clone(),
      action: WorkflowAction::PublishRefset,
      resulting_state: LifecycleState::Published,
      note: None,
      recorded_at: Utc::now(),
    };
    let persisted = self
      .store
      .persist_transition(updated, entry, SnapshotOp::None, self.config.concurrency)
      .await
      .map_err(Error::store)?;

    self
      .clear_prior_latest(&persisted.external_id, persisted.id)
      .await?;
    tracing::info!(record = %persisted.external_id, date = %version_date, "published");
    Ok(persisted)
  }

  /// Delete an in-development version and its branch artifacts.
  ///
  /// The edit branch (if any) is always torn down; `delete_underlying`
  /// additionally deletes the version's refset branch. Cached results for
  /// every discarded branch are invalidated. If a published version of the
  /// set remains, its development flag is cleared.
  pub async fn delete_in_development_version(
    &self,
    record_id: Uuid,
    delete_underlying: bool,
  ) -> Result<()> {
    let record = self
      .store
      .find_by_id(record_id)
      .await
      .map_err(Error::store)?
      .ok_or(sprig_core::Error::RecordNotFound(record_id))?;
    if record.version_status != VersionStatus::InDevelopment {
      return Err(Error::Core(sprig_core::Error::InvalidState {
        state:     record.lifecycle_state,
        operation: "delete a version that is not in development".into(),
      }));
    }

    if let Some(edit_path) = self.lineage.edit(&record) {
      self.cache.invalidate(&edit_path);
      self.branches.delete(&edit_path).await?;
    }
    if delete_underlying {
      let refset_path = self.lineage.refset(&record);
      self.cache.invalidate(&refset_path);
      self.branches.delete(&refset_path).await?;
    }

    self
      .store
      .remove_version(record.id, &record.external_id)
      .await
      .map_err(Error::store)?;

    // The remaining versions no longer have development in flight; make
    // sure the newest published one carries the latest flag.
    let remaining = self
      .store
      .versions_of(&record.external_id)
      .await
      .map_err(Error::store)?;
    let has_latest = remaining.iter().any(|v| v.latest_published_version);
    let newest_published = remaining
      .iter()
      .filter(|v| v.version_status == VersionStatus::Published)
      .max_by_key(|v| v.version_date)
      .map(|v| v.id);
    for mut version in remaining {
      let mark_latest =
        !has_latest && newest_published == Some(version.id);
      if version.has_version_in_development || mark_latest {
        version.has_version_in_development = false;
        version.latest_published_version |= mark_latest;
        self
          .store
          .update(version, self.config.concurrency)
          .await
          .map_err(Error::store)?;
      }
    }

    tracing::info!(record = %record.external_id, "in-development version deleted");
    Ok(())
  }

  /// Stage a "replace inactive concept" decision for a record in
  /// `IN_UPGRADE`. Staging rows live only as long as the upgrade cycle.
  pub async fn stage_replacement(
    &self,
    user: &User,
    record_id: Uuid,
    inactive_concept: String,
    replacement_concept: Option<String>,
  ) -> Result<StagedReplacement> {
    let record = self
      .store
      .find_by_id(record_id)
      .await
      .map_err(Error::store)?
      .ok_or(sprig_core::Error::RecordNotFound(record_id))?;
    if record.lifecycle_state != LifecycleState::InUpgrade {
      return Err(Error::Core(sprig_core::Error::InvalidState {
        state:     record.lifecycle_state,
        operation: "stage a replacement outside an upgrade cycle".into(),
      }));
    }
    if record.assigned_user.as_deref() != Some(user.username.as_str()) {
      return Err(Error::Core(sprig_core::Error::UnauthorizedTransition {
        user:   user.username.clone(),
        action: WorkflowAction::Upgrade,
        state:  record.lifecycle_state,
      }));
    }

    let row = StagedReplacement {
      staging_id: Uuid::new_v4(),
      record_id: record.id,
      inactive_concept,
      replacement_concept,
      recorded_at: Utc::now(),
    };
    self
      .store
      .stage_replacement(row.clone())
      .await
      .map_err(Error::store)?;
    Ok(row)
  }

  /// Pending replacement decisions for a record's upgrade cycle.
  pub async fn staged_replacements(
    &self,
    record_id: Uuid,
  ) -> Result<Vec<StagedReplacement>> {
    self
      .store
      .staged_replacements(record_id)
      .await
      .map_err(Error::store)
  }

  /// Append the `CREATE` history row for a freshly added record.
  async fn record_creation(&self, user: &User, record: &Refset) -> Result<()> {
    self
      .store
      .append_history(WorkflowHistoryEntry {
        entry_id: Uuid::new_v4(),
        record_id: record.id,
        actor: user.username.clone(),
        action: WorkflowAction::Create,
        resulting_state: record.lifecycle_state,
        note: None,
        recorded_at: Utc::now(),
      })
      .await
      .map_err(Error::store)
  }
}

fn fresh_refset_branch_id() -> String {
  format!("refset-{}", Uuid::new_v4().simple())
}
