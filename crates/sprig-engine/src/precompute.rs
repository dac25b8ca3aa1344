//! Bulk cache warming with bounded parallelism.
//!
//! The warm pass runs one compute unit per record against that record's
//! refset branch path. Units run concurrently up to the configured
//! parallelism; a failing unit is logged and counted, never propagated, so
//! one bad record cannot abort the pass.

use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};

use sprig_core::{branch::BranchService, record::Refset, store::RecordStore};

use crate::{
  cache::QueryFingerprint,
  error::{Error, Result},
  workflow::WorkflowEngine,
};

/// Outcome counts of one warm pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmSummary {
  pub completed: usize,
  pub failed:    usize,
}

impl<S, B> WorkflowEngine<S, B>
where
  S: RecordStore,
  B: BranchService,
{
  /// Precompute cached query results for every record in the store.
  ///
  /// `compute` receives each record and produces the fingerprint/value pair
  /// to cache under the record's refset branch path.
  pub async fn warm_cache<F, Fut, E>(&self, compute: F) -> Result<WarmSummary>
  where
    F: Fn(Refset) -> Fut,
    Fut: Future<Output = std::result::Result<(QueryFingerprint, serde_json::Value), E>>
      + Send
      + 'static,
    E: std::fmt::Display + Send + 'static,
  {
    let records = self.store.list_all().await.map_err(Error::store)?;
    let total = records.len();
    tracing::info!(total, "cache warm pass starting");

    let semaphore =
      Arc::new(Semaphore::new(self.config.precompute_parallelism.max(1)));
    let mut tasks = JoinSet::new();

    for record in records {
      let path = self.lineage.refset(&record);
      let external_id = record.external_id.clone();
      let unit = compute(record);
      let cache = Arc::clone(&self.cache);
      let semaphore = Arc::clone(&semaphore);

      tasks.spawn(async move {
        // The semaphore is never closed, so acquisition only fails if the
        // pass is being torn down; treat that as a failed unit.
        let Ok(_permit) = semaphore.acquire_owned().await else {
          return false;
        };
        match unit.await {
          Ok((fingerprint, value)) => {
            cache.put(&path, fingerprint, value);
            true
          }
          Err(err) => {
            tracing::warn!(
              record = %external_id,
              branch = %path,
              %err,
              "cache warm unit failed"
            );
            false
          }
        }
      });
    }

    let mut summary = WarmSummary::default();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(true) => summary.completed += 1,
        Ok(false) => summary.failed += 1,
        Err(err) => {
          tracing::warn!(%err, "cache warm unit panicked");
          summary.failed += 1;
        }
      }
    }

    tracing::info!(
      completed = summary.completed,
      failed = summary.failed,
      "cache warm pass finished"
    );
    Ok(summary)
  }
}
