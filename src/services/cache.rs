//! Caching implementations for service types.

use crate::cache::{diff_by_key, Cacheable, Diff};

use super::mapper::is_truthy;
use super::types::ApiService;

impl Cacheable for ApiService {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "services"
  }
}

/// Shallow comparison of the fields callers see.
///
/// A missing `value` compares equal to an empty one.
pub fn content_changed(local: &ApiService, remote: &ApiService) -> bool {
  local.label != remote.label
    || local.value.as_deref().unwrap_or("") != remote.value.as_deref().unwrap_or("")
    || is_truthy(&local.status) != is_truthy(&remote.status)
}

/// Compare a local service list against the remote one by `_id`.
pub fn diff(local: &[ApiService], remote: &[ApiService]) -> Diff<ApiService> {
  diff_by_key(local, remote, content_changed)
}
