//! In-memory [`BranchService`] backend for tests and local development.
//!
//! Branches carry real content (a key → value map) with per-key version
//! stamps and a per-branch record of the versions inherited from the parent,
//! so rebase and promote follow genuine three-way semantics: a merge only
//! conflicts when both sides changed the same key to different values since
//! they diverged.

use std::{
  collections::BTreeMap,
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};

use chrono::NaiveDate;
use sprig_core::branch::{BranchError, BranchPath, BranchService};

// ─── Content model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
  value:   String,
  /// Stamp from the service-wide counter; newer writes carry higher stamps.
  version: u64,
}

#[derive(Debug, Clone, Default)]
struct Node {
  content: BTreeMap<String, Entry>,
  /// Per-key versions as inherited from the parent at creation or the last
  /// rebase. A key whose current version differs was changed locally.
  base:    BTreeMap<String, u64>,
}

impl Node {
  fn changed_locally(&self, key: &str) -> bool {
    match (self.content.get(key), self.base.get(key)) {
      (Some(entry), Some(base)) => entry.version != *base,
      (Some(_), None) => true,       // added locally
      (None, Some(_)) => true,       // removed locally
      (None, None) => false,
    }
  }
}

#[derive(Debug, Default)]
struct Inner {
  branches: BTreeMap<String, Node>,
}

// ─── Service ─────────────────────────────────────────────────────────────────

/// An in-memory branch store rooted at a single edition branch.
pub struct MemoryBranchService {
  inner:        Mutex<Inner>,
  counter:      AtomicU64,
  next_id:      AtomicU64,
  version_date: Mutex<NaiveDate>,
}

impl MemoryBranchService {
  /// Create a service with `edition` pre-created as the root branch.
  pub fn new(edition: &str) -> Self {
    let mut inner = Inner::default();
    inner.branches.insert(edition.to_owned(), Node::default());
    Self {
      inner:        Mutex::new(inner),
      counter:      AtomicU64::new(1),
      next_id:      AtomicU64::new(1),
      version_date: Mutex::new(
        NaiveDate::from_ymd_opt(2026, 1, 31).unwrap_or_default(),
      ),
    }
  }

  fn next_version(&self) -> u64 {
    self.counter.fetch_add(1, Ordering::SeqCst)
  }

  /// Overwrite the date reported by `latest_version_date`.
  pub fn set_version_date(&self, date: NaiveDate) {
    *self.version_date.lock().expect("lock poisoned") = date;
  }

  /// Author a key on a branch — the test stand-in for editing content
  /// through the terminology server.
  pub fn set_content(
    &self,
    path: &BranchPath,
    key: &str,
    value: &str,
  ) -> Result<(), BranchError> {
    let version = self.next_version();
    let mut inner = self.inner.lock().expect("lock poisoned");
    let node = inner
      .branches
      .get_mut(path.as_str())
      .ok_or_else(|| BranchError::NotFound(path.clone()))?;
    node
      .content
      .insert(key.to_owned(), Entry { value: value.to_owned(), version });
    Ok(())
  }

  /// Read a key's value on a branch, if present.
  pub fn content(
    &self,
    path: &BranchPath,
    key: &str,
  ) -> Result<Option<String>, BranchError> {
    let inner = self.inner.lock().expect("lock poisoned");
    let node = inner
      .branches
      .get(path.as_str())
      .ok_or_else(|| BranchError::NotFound(path.clone()))?;
    Ok(node.content.get(key).map(|e| e.value.clone()))
  }

  fn get_pair(
    inner: &mut Inner,
    source: &BranchPath,
    target: &BranchPath,
  ) -> Result<(Node, Node), BranchError> {
    let src = inner
      .branches
      .get(source.as_str())
      .cloned()
      .ok_or_else(|| BranchError::NotFound(source.clone()))?;
    let tgt = inner
      .branches
      .get(target.as_str())
      .cloned()
      .ok_or_else(|| BranchError::NotFound(target.clone()))?;
    Ok((src, tgt))
  }
}

impl BranchService for MemoryBranchService {
  async fn exists(&self, path: &BranchPath) -> Result<bool, BranchError> {
    let inner = self.inner.lock().expect("lock poisoned");
    Ok(inner.branches.contains_key(path.as_str()))
  }

  async fn create(
    &self,
    parent: &BranchPath,
    name: &str,
  ) -> Result<BranchPath, BranchError> {
    let path = parent.child(name);
    let mut inner = self.inner.lock().expect("lock poisoned");
    let parent_node = inner
      .branches
      .get(parent.as_str())
      .ok_or_else(|| BranchError::NotFound(parent.clone()))?;
    if inner.branches.contains_key(path.as_str()) {
      return Err(BranchError::AlreadyExists(path));
    }

    // The child starts as a copy of the parent and remembers the versions
    // it inherited.
    let base = parent_node
      .content
      .iter()
      .map(|(k, e)| (k.clone(), e.version))
      .collect();
    let node = Node { content: parent_node.content.clone(), base };
    inner.branches.insert(path.as_str().to_owned(), node);
    Ok(path)
  }

  async fn merge(
    &self,
    source: &BranchPath,
    target: &BranchPath,
    _comment: &str,
    rebase: bool,
  ) -> Result<(), BranchError> {
    let mut inner = self.inner.lock().expect("lock poisoned");
    let (mut src, mut tgt) = Self::get_pair(&mut inner, source, target)?;

    if rebase {
      // Pull target's newer content down into source.
      for (key, tgt_entry) in &tgt.content {
        let inherited = src.base.get(key).copied();
        if inherited == Some(tgt_entry.version) {
          continue; // source already has this version
        }
        if src.changed_locally(key) {
          let local = src.content.get(key);
          if local.map(|e| e.value.as_str()) != Some(tgt_entry.value.as_str()) {
            return Err(BranchError::Conflict {
              source_branch: source.clone(),
              target: target.clone(),
              detail: format!("both sides changed {key:?}"),
            });
          }
        }
        src.content.insert(key.clone(), tgt_entry.clone());
        src.base.insert(key.clone(), tgt_entry.version);
      }
      inner.branches.insert(source.as_str().to_owned(), src);
    } else {
      // Promote source's local changes up into target.
      let candidates: std::collections::BTreeSet<String> =
        src.content.keys().chain(src.base.keys()).cloned().collect();
      let changed: Vec<String> = candidates
        .into_iter()
        .filter(|k| src.changed_locally(k))
        .collect();

      for key in changed {
        let inherited = src.base.get(&key).copied();
        let current = tgt.content.get(&key).map(|e| e.version);
        let src_value = src.content.get(&key).map(|e| e.value.clone());
        if current != inherited {
          // Target moved since the source diverged; only identical values
          // merge cleanly.
          let tgt_value = tgt.content.get(&key).map(|e| e.value.clone());
          if tgt_value != src_value {
            return Err(BranchError::Conflict {
              source_branch: source.clone(),
              target: target.clone(),
              detail: format!("both sides changed {key:?}"),
            });
          }
          continue;
        }
        match src_value {
          Some(value) => {
            let version = self.counter.fetch_add(1, Ordering::SeqCst);
            tgt.content.insert(key.clone(), Entry { value, version });
          }
          None => {
            tgt.content.remove(&key);
          }
        }
      }
      inner.branches.insert(target.as_str().to_owned(), tgt);
    }
    Ok(())
  }

  async fn delete(&self, path: &BranchPath) -> Result<bool, BranchError> {
    let mut inner = self.inner.lock().expect("lock poisoned");
    if !inner.branches.contains_key(path.as_str()) {
      return Ok(false);
    }
    // Drop the branch and its whole subtree.
    inner
      .branches
      .retain(|key, _| {
        key != path.as_str()
          && !path.is_ancestor_of(&BranchPath::root(key.clone()))
      });
    Ok(true)
  }

  async fn list_children(
    &self,
    path: &BranchPath,
  ) -> Result<Vec<BranchPath>, BranchError> {
    let inner = self.inner.lock().expect("lock poisoned");
    if !inner.branches.contains_key(path.as_str()) {
      return Err(BranchError::NotFound(path.clone()));
    }
    let prefix = format!("{}/", path.as_str());
    Ok(
      inner
        .branches
        .keys()
        .filter(|k| {
          k.starts_with(&prefix) && !k[prefix.len()..].contains('/')
        })
        .map(|k| BranchPath::root(k.clone()))
        .collect(),
    )
  }

  async fn generate_new_external_id(
    &self,
    temp_branch: &BranchPath,
  ) -> Result<String, BranchError> {
    {
      let inner = self.inner.lock().expect("lock poisoned");
      if !inner.branches.contains_key(temp_branch.as_str()) {
        return Err(BranchError::NotFound(temp_branch.clone()));
      }
    }
    let n = self.next_id.fetch_add(1, Ordering::SeqCst);
    Ok(format!("90000000000{n:04}"))
  }

  async fn latest_version_date(
    &self,
    edition: &BranchPath,
  ) -> Result<NaiveDate, BranchError> {
    let inner = self.inner.lock().expect("lock poisoned");
    if !inner.branches.contains_key(edition.as_str()) {
      return Err(BranchError::NotFound(edition.clone()));
    }
    Ok(*self.version_date.lock().expect("lock poisoned"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn svc() -> (MemoryBranchService, BranchPath) {
    (MemoryBranchService::new("MAIN"), BranchPath::root("MAIN"))
  }

  #[tokio::test]
  async fn create_requires_parent() {
    let (svc, main) = svc();
    let missing = BranchPath::root("ELSEWHERE");
    assert!(matches!(
      svc.create(&missing, "child").await,
      Err(BranchError::NotFound(_))
    ));

    let project = svc.create(&main, "SPRIG").await.unwrap();
    assert!(svc.exists(&project).await.unwrap());
    assert!(matches!(
      svc.create(&main, "SPRIG").await,
      Err(BranchError::AlreadyExists(_))
    ));
  }

  #[tokio::test]
  async fn child_inherits_parent_content() {
    let (svc, main) = svc();
    svc.set_content(&main, "concept:1", "active").unwrap();
    let child = svc.create(&main, "work").await.unwrap();
    assert_eq!(
      svc.content(&child, "concept:1").unwrap().as_deref(),
      Some("active")
    );
  }

  #[tokio::test]
  async fn promote_carries_changes_up() {
    let (svc, main) = svc();
    let work = svc.create(&main, "work").await.unwrap();
    svc.set_content(&work, "concept:1", "added").unwrap();

    svc.merge(&work, &main, "promote", false).await.unwrap();
    assert_eq!(
      svc.content(&main, "concept:1").unwrap().as_deref(),
      Some("added")
    );
  }

  #[tokio::test]
  async fn rebase_pulls_newer_parent_content() {
    let (svc, main) = svc();
    let work = svc.create(&main, "work").await.unwrap();
    svc.set_content(&main, "concept:1", "newer").unwrap();

    svc.merge(&work, &main, "rebase", true).await.unwrap();
    assert_eq!(
      svc.content(&work, "concept:1").unwrap().as_deref(),
      Some("newer")
    );
  }

  #[tokio::test]
  async fn diverging_edits_conflict() {
    let (svc, main) = svc();
    svc.set_content(&main, "concept:1", "original").unwrap();
    let work = svc.create(&main, "work").await.unwrap();
    svc.set_content(&work, "concept:1", "mine").unwrap();
    svc.set_content(&main, "concept:1", "theirs").unwrap();

    assert!(matches!(
      svc.merge(&work, &main, "promote", false).await,
      Err(BranchError::Conflict { .. })
    ));
    assert!(matches!(
      svc.merge(&work, &main, "rebase", true).await,
      Err(BranchError::Conflict { .. })
    ));
  }

  #[tokio::test]
  async fn identical_edits_merge_cleanly() {
    let (svc, main) = svc();
    let work = svc.create(&main, "work").await.unwrap();
    svc.set_content(&work, "concept:1", "same").unwrap();
    svc.set_content(&main, "concept:1", "same").unwrap();

    svc.merge(&work, &main, "promote", false).await.unwrap();
    assert_eq!(
      svc.content(&main, "concept:1").unwrap().as_deref(),
      Some("same")
    );
  }

  #[tokio::test]
  async fn delete_removes_subtree() {
    let (svc, main) = svc();
    let work = svc.create(&main, "work").await.unwrap();
    let nested = svc.create(&work, "edit-1").await.unwrap();

    assert!(svc.delete(&work).await.unwrap());
    assert!(!svc.exists(&work).await.unwrap());
    assert!(!svc.exists(&nested).await.unwrap());
    assert!(!svc.delete(&work).await.unwrap());
  }

  #[tokio::test]
  async fn list_children_is_direct_only() {
    let (svc, main) = svc();
    let a = svc.create(&main, "a").await.unwrap();
    svc.create(&main, "b").await.unwrap();
    svc.create(&a, "deep").await.unwrap();

    let children = svc.list_children(&main).await.unwrap();
    let names: Vec<&str> = children.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
  }

  #[tokio::test]
  async fn external_ids_are_unique() {
    let (svc, main) = svc();
    let a = svc.generate_new_external_id(&main).await.unwrap();
    let b = svc.generate_new_external_id(&main).await.unwrap();
    assert_ne!(a, b);
  }
}
