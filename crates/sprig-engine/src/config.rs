//! Engine configuration.
//!
//! A plain serde struct; [`EngineConfig::load`] layers an optional TOML file
//! under `SPRIG_`-prefixed environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use sprig_core::store::ConcurrencyMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Root (edition) branch of the terminology server, e.g. `MAIN`.
  pub edition: String,
  /// Project branch segment created under the edition.
  pub project: String,
  /// Revision-stamp handling for record writes. `last_write_wins` is the
  /// compatibility mode matching deployments that predate the stamp.
  pub concurrency: ConcurrencyMode,
  /// Upper bound on concurrent per-record computations in the bulk cache
  /// warm pass.
  pub precompute_parallelism: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      edition:                "MAIN".into(),
      project:                "SPRIG".into(),
      concurrency:            ConcurrencyMode::Optimistic,
      precompute_parallelism: 4,
    }
  }
}

impl EngineConfig {
  /// Load configuration from an optional file plus the environment.
  pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
      builder = builder.add_source(config::File::from(path).required(false));
    }
    builder
      .add_source(config::Environment::with_prefix("SPRIG"))
      .build()?
      .try_deserialize()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_apply_without_sources() {
    let cfg = EngineConfig::load(None).unwrap();
    assert_eq!(cfg.edition, "MAIN");
    assert_eq!(cfg.concurrency, ConcurrencyMode::Optimistic);
    assert_eq!(cfg.precompute_parallelism, 4);
  }
}
