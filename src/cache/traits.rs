//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Trait for entities that can be cached.
///
/// Implementors provide a unique cache key; writing an entity whose key is
/// already stored replaces the stored record in place.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity (e.g., a service `_id`)
  fn cache_key(&self) -> String;

  /// Partition name for storage organization (e.g., "services")
  fn entity_type() -> &'static str;
}

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Clock backed by the system time.
pub fn system_clock() -> Clock {
  Arc::new(Utc::now)
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was saved (if from cache)
  pub saved_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      saved_at: None,
    }
  }

  /// Create a new cache result from fresh cached data.
  pub fn from_cache(data: T, saved_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      saved_at: Some(saved_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, saved_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      saved_at,
    }
  }
}

impl<T: Default> CacheResult<T> {
  /// Nothing cached and the network unavailable.
  pub fn empty() -> Self {
    Self {
      data: T::default(),
      source: CacheSource::Empty,
      saved_at: None,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache within its TTL; a revalidation runs in the background
  CacheFresh,
  /// Network unavailable, serving whatever was stored regardless of age
  Offline,
  /// Network unavailable and nothing stored
  Empty,
}

/// The cache's view of a partition's freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// No `saved_at` stamp
  Empty,
  /// `now - saved_at <= ttl`
  Fresh,
  /// `now - saved_at > ttl`; evicted on the next read
  Stale,
}

impl std::fmt::Display for Freshness {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Freshness::Empty => "empty",
      Freshness::Fresh => "fresh",
      Freshness::Stale => "stale",
    };
    f.write_str(name)
  }
}
