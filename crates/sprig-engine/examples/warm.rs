//! Stand up an engine over an in-memory store, run a record through one
//! edit cycle, and warm the cache.
//!
//!     cargo run -p sprig-engine --example warm

use std::sync::Arc;

use sprig_branch_mem::MemoryBranchService;
use sprig_core::{
  lifecycle::{Role, User, WorkflowAction},
  permutation::default_table,
  record::NewRefset,
};
use sprig_engine::{BranchCache, EngineConfig, QueryFingerprint, WorkflowEngine};
use sprig_store_sqlite::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into()),
    )
    .init();

  let config = EngineConfig::load(None)?;
  let store = Arc::new(SqliteStore::open_in_memory().await?);
  let branches = Arc::new(MemoryBranchService::new(&config.edition));
  let engine = WorkflowEngine::new(
    store,
    branches,
    Arc::new(BranchCache::new()),
    default_table(),
    config,
  )?;

  let author = User::new("alice", vec![Role::Author]);
  let record = engine
    .create_refset(&author, NewRefset {
      external_id:  Some("447562003".into()),
      title:        "Chronic conditions".into(),
      narrative:    "All chronic condition codes".into(),
      is_local_set: false,
    })
    .await?;

  let record = engine
    .transition(&author, record.id, WorkflowAction::Edit, None)
    .await?;
  let record = engine
    .transition(&author, record.id, WorkflowAction::FinishEdit, None)
    .await?;
  println!("record {} is {}", record.external_id, record.lifecycle_state);

  let summary = engine
    .warm_cache(|record| async move {
      let fingerprint = QueryFingerprint::of(&("members", &record.external_id))
        .map_err(|e| e.to_string())?;
      Ok::<_, String>((
        fingerprint,
        serde_json::json!({ "editing": false, "external_id": record.external_id }),
      ))
    })
    .await?;
  println!("warmed {} entries ({} failed)", summary.completed, summary.failed);

  Ok(())
}
