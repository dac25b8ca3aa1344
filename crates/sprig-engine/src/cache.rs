//! Per-branch-path derived-data cache.
//!
//! Results computed against a branch (concept expansions, taxonomy views,
//! member lists) are keyed by `(branch path, query fingerprint)`. A branch
//! owns its entries: when its content is replaced by a merge the entries are
//! copied to the merge target (optionally patching an embedded flag), and
//! every branch-discarding transition pairs with an invalidation of that
//! same path so deleted branches never retain entries.
//!
//! The cache is an explicit service object handed to the engine — never a
//! process-wide static — so invalidation ordering stays testable.

use std::{
  collections::HashMap,
  sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use sha2::{Digest, Sha256};

use sprig_core::branch::BranchPath;

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// Stable identity of a query: the SHA-256 of its serialised form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
  pub fn of<Q: Serialize>(query: &Q) -> sprig_core::Result<Self> {
    let bytes = serde_json::to_vec(query)?;
    Ok(Self(hex::encode(Sha256::digest(&bytes))))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for QueryFingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Field toggle ────────────────────────────────────────────────────────────

/// A boolean field rewritten inside every payload during
/// [`BranchCache::copy_and_rekey`] — e.g. flipping `editing` off when edit
/// results become refset results.
#[derive(Debug, Clone)]
pub struct FieldToggle {
  pub field: String,
  pub value: bool,
}

impl FieldToggle {
  pub fn new(field: impl Into<String>, value: bool) -> Self {
    Self { field: field.into(), value }
  }

  /// Set the field on every JSON object that carries it, at any depth.
  fn apply(&self, payload: &mut serde_json::Value) {
    match payload {
      serde_json::Value::Object(map) => {
        if map.contains_key(&self.field) {
          map.insert(self.field.clone(), serde_json::Value::Bool(self.value));
        }
        for value in map.values_mut() {
          self.apply(value);
        }
      }
      serde_json::Value::Array(items) => {
        for item in items {
          self.apply(item);
        }
      }
      _ => {}
    }
  }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

type PathEntries = HashMap<QueryFingerprint, serde_json::Value>;

/// Shared, mutable, path-keyed cache of computed results.
///
/// Writers only ever write to the path of their own edit context;
/// [`invalidate`](Self::invalidate) and
/// [`copy_and_rekey`](Self::copy_and_rekey) are the only cross-path
/// mutations, and the engine triggers them only on completed transitions.
#[derive(Debug, Default)]
pub struct BranchCache {
  inner: RwLock<HashMap<String, PathEntries>>,
}

impl BranchCache {
  pub fn new() -> Self {
    Self::default()
  }

  // Entries are plain JSON values with no interior invariants, so a lock
  // poisoned by a panicking reader/writer is safe to recover.
  fn read_map(&self) -> RwLockReadGuard<'_, HashMap<String, PathEntries>> {
    self.inner.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<String, PathEntries>> {
    self.inner.write().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get(
    &self,
    path: &BranchPath,
    fingerprint: &QueryFingerprint,
  ) -> Option<serde_json::Value> {
    self
      .read_map()
      .get(path.as_str())
      .and_then(|entries| entries.get(fingerprint))
      .cloned()
  }

  pub fn put(
    &self,
    path: &BranchPath,
    fingerprint: QueryFingerprint,
    value: serde_json::Value,
  ) {
    self
      .write_map()
      .entry(path.as_str().to_owned())
      .or_default()
      .insert(fingerprint, value);
  }

  /// Drop all entries for a path. Idempotent; returns how many entries were
  /// removed.
  pub fn invalidate(&self, path: &BranchPath) -> usize {
    self
      .write_map()
      .remove(path.as_str())
      .map(|entries| entries.len())
      .unwrap_or(0)
  }

  /// Make `from`'s entries become `to`'s entries, replacing whatever `to`
  /// held. With a [`FieldToggle`] every copied payload has the named
  /// embedded boolean rewritten. Returns the number of entries copied.
  ///
  /// `from`'s own entries are left in place; the caller pairs this with
  /// [`invalidate`](Self::invalidate) when `from` is being discarded.
  pub fn copy_and_rekey(
    &self,
    from: &BranchPath,
    to: &BranchPath,
    toggle: Option<&FieldToggle>,
  ) -> usize {
    let mut inner = self.write_map();
    let Some(source) = inner.get(from.as_str()).cloned() else {
      // Nothing cached for the source; the target's view is still stale.
      inner.remove(to.as_str());
      return 0;
    };

    let mut copied: PathEntries = HashMap::with_capacity(source.len());
    for (fingerprint, mut value) in source {
      if let Some(toggle) = toggle {
        toggle.apply(&mut value);
      }
      copied.insert(fingerprint, value);
    }
    let count = copied.len();
    inner.insert(to.as_str().to_owned(), copied);
    count
  }

  /// Number of entries cached for a path.
  pub fn entry_count(&self, path: &BranchPath) -> usize {
    self
      .read_map()
      .get(path.as_str())
      .map(|entries| entries.len())
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn path(s: &str) -> BranchPath {
    BranchPath::root(s)
  }

  fn fp(n: u32) -> QueryFingerprint {
    QueryFingerprint::of(&n).unwrap()
  }

  #[test]
  fn fingerprint_is_stable_and_distinct() {
    assert_eq!(fp(1), fp(1));
    assert_ne!(fp(1), fp(2));
    assert_eq!(fp(7).as_str().len(), 64);
  }

  #[test]
  fn put_get_invalidate() {
    let cache = BranchCache::new();
    let p = path("MAIN/a");
    cache.put(&p, fp(1), json!({"members": 3}));

    assert_eq!(cache.get(&p, &fp(1)), Some(json!({"members": 3})));
    assert_eq!(cache.invalidate(&p), 1);
    assert_eq!(cache.get(&p, &fp(1)), None);
  }

  #[test]
  fn invalidate_is_idempotent() {
    let cache = BranchCache::new();
    let p = path("MAIN/a");
    cache.put(&p, fp(1), json!(1));

    cache.invalidate(&p);
    assert_eq!(cache.invalidate(&p), 0);
    assert_eq!(cache.entry_count(&p), 0);
  }

  #[test]
  fn copy_and_rekey_replaces_target() {
    let cache = BranchCache::new();
    let edit = path("MAIN/r/edit");
    let refset = path("MAIN/r");
    cache.put(&refset, fp(9), json!("stale"));
    cache.put(&edit, fp(1), json!({"editing": true, "rows": [1, 2]}));

    let copied = cache.copy_and_rekey(
      &edit,
      &refset,
      Some(&FieldToggle::new("editing", false)),
    );
    assert_eq!(copied, 1);
    // Stale target entry is gone; the copied payload has the flag flipped.
    assert_eq!(cache.get(&refset, &fp(9)), None);
    assert_eq!(
      cache.get(&refset, &fp(1)),
      Some(json!({"editing": false, "rows": [1, 2]}))
    );
  }

  #[test]
  fn toggle_rewrites_nested_payloads() {
    let mut value = json!({
      "outer": {"editing": true},
      "list": [{"editing": true}, {"other": 1}]
    });
    FieldToggle::new("editing", false).apply(&mut value);
    assert_eq!(value["outer"]["editing"], json!(false));
    assert_eq!(value["list"][0]["editing"], json!(false));
  }

  #[test]
  fn empty_source_still_clears_target() {
    let cache = BranchCache::new();
    let edit = path("MAIN/r/edit");
    let refset = path("MAIN/r");
    cache.put(&refset, fp(9), json!("stale"));

    assert_eq!(cache.copy_and_rekey(&edit, &refset, None), 0);
    assert_eq!(cache.entry_count(&refset), 0);
  }
}
