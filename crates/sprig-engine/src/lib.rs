//! The Sprig workflow and branch lifecycle engine.
//!
//! Governs the editorial lifecycle of versioned reference sets: who may take
//! which action from which state (the permutation table), the branch
//! create/rebase/promote/discard protocol that accompanies every transition,
//! versioning and publication, and the per-branch-path derived-data cache.
//!
//! The engine is a library; the HTTP layer consuming it lives elsewhere.
//! Storage and the terminology server are reached through the
//! [`RecordStore`](sprig_core::store::RecordStore) and
//! [`BranchService`](sprig_core::branch::BranchService) seams.

pub mod cache;
pub mod config;
pub mod error;
pub mod external;
pub mod precompute;
pub mod workflow;

mod version;

pub use cache::{BranchCache, FieldToggle, QueryFingerprint};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use precompute::WarmSummary;
pub use workflow::WorkflowEngine;
