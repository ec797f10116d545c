//! Identity-based diffing of a local entity list against a remote one.

use std::collections::{HashMap, HashSet};

use super::traits::Cacheable;

/// Changes needed to turn a local list into a remote one.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<T> {
  /// In remote, not in local (remote order)
  pub new: Vec<T>,
  /// In both, with content that differs (remote order)
  pub updated: Vec<T>,
  /// Keys in local, not in remote (local order)
  pub removed: Vec<String>,
}

impl<T> Diff<T> {
  pub fn is_empty(&self) -> bool {
    self.new.is_empty() && self.updated.is_empty() && self.removed.is_empty()
  }
}

/// Compare `local` against `remote` by cache key.
///
/// `changed(local, remote)` decides whether an entity present on both sides
/// counts as updated. No I/O.
pub fn diff_by_key<T, F>(local: &[T], remote: &[T], changed: F) -> Diff<T>
where
  T: Cacheable,
  F: Fn(&T, &T) -> bool,
{
  let local_by_key: HashMap<String, &T> = local.iter().map(|e| (e.cache_key(), e)).collect();
  let remote_keys: HashSet<String> = remote.iter().map(Cacheable::cache_key).collect();

  let mut new = Vec::new();
  let mut updated = Vec::new();

  for remote_entity in remote {
    match local_by_key.get(&remote_entity.cache_key()) {
      None => new.push(remote_entity.clone()),
      Some(local_entity) if changed(*local_entity, remote_entity) => {
        updated.push(remote_entity.clone())
      }
      Some(_) => {}
    }
  }

  let removed = local
    .iter()
    .map(Cacheable::cache_key)
    .filter(|key| !remote_keys.contains(key))
    .collect();

  Diff {
    new,
    updated,
    removed,
  }
}
