//! Cache layer that orchestrates the staleness policy with network fetching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::diff::{diff_by_key, Diff};
use super::storage::{CacheStorage, Snapshot};
use super::traits::{system_clock, CacheResult, Cacheable, Clock, Freshness};

/// How long a full replace stays fresh unless configured otherwise.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Outcome of reading a partition under the TTL policy.
#[derive(Debug)]
pub enum Lookup<T> {
  /// Within TTL and non-empty
  Fresh(Snapshot<T>),
  /// Nothing usable. `evicted` holds what an expiry just deleted from storage.
  Miss { evicted: Option<Snapshot<T>> },
}

/// Point-in-time view of a partition, without eviction side effects.
#[derive(Debug, Clone)]
pub struct CacheStatus {
  pub freshness: Freshness,
  pub entities: usize,
  pub saved_at: Option<DateTime<Utc>>,
  pub age: Option<Duration>,
}

/// Counts applied by an incremental sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub added: usize,
  pub updated: usize,
  pub removed: usize,
}

impl<T> From<&Diff<T>> for SyncReport {
  fn from(diff: &Diff<T>) -> Self {
    Self {
      added: diff.new.len(),
      updated: diff.updated.len(),
      removed: diff.removed.len(),
    }
  }
}

/// Cache layer that manages the TTL policy and network fetching.
///
/// This layer sits between the application and the network client,
/// providing stale-while-revalidate reads with offline fallback. Reads never
/// fail: storage errors count as a miss, fetch errors fall back to whatever is
/// stored, and both are logged.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// How long after a full replace cached data is served without a fetch
  ttl: Duration,
  clock: Clock,
  /// Detached revalidation tasks, kept only so callers can wait for them
  background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      ttl: Duration::days(DEFAULT_TTL_DAYS),
      clock: system_clock(),
      background: Arc::new(Mutex::new(Vec::new())),
    }
  }

  /// Set the time-to-live for cached data.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  fn now(&self) -> DateTime<Utc> {
    (self.clock)()
  }

  /// Check if data saved at `saved_at` has outlived the TTL.
  fn is_expired(&self, saved_at: DateTime<Utc>) -> bool {
    self.now() - saved_at > self.ttl
  }

  /// Read the partition under the TTL policy.
  ///
  /// An expired partition is evicted (entities and `saved_at`) before
  /// reporting a miss.
  pub fn lookup<T: Cacheable>(&self) -> Lookup<T> {
    let partition = T::entity_type();

    let saved_at = match self.storage.saved_at::<T>() {
      Ok(Some(saved_at)) => saved_at,
      Ok(None) => return Lookup::Miss { evicted: None },
      Err(e) => {
        warn!(partition, error = %e, "cache read failed, treating as miss");
        return Lookup::Miss { evicted: None };
      }
    };

    if self.is_expired(saved_at) {
      let evicted = self
        .storage
        .get_all::<T>()
        .ok()
        .map(|entities| Snapshot { entities, saved_at });
      if let Err(e) = self.storage.clear::<T>() {
        warn!(partition, error = %e, "failed to evict expired cache");
      }
      debug!(partition, %saved_at, "evicted expired cache");
      return Lookup::Miss { evicted };
    }

    match self.storage.get_all::<T>() {
      Ok(entities) if !entities.is_empty() => Lookup::Fresh(Snapshot { entities, saved_at }),
      Ok(_) => Lookup::Miss { evicted: None },
      Err(e) => {
        warn!(partition, error = %e, "cache read failed, treating as miss");
        Lookup::Miss { evicted: None }
      }
    }
  }

  /// Fetch a list with stale-while-revalidate.
  ///
  /// 1. Fresh cache - return it, revalidate in a detached task
  /// 2. Miss - fetch from network and replace the cache
  /// 3. Network failure - serve what an expiry just evicted, else anything stored, else empty
  pub async fn fetch_list<T, F, Fut>(&self, fetcher: F) -> CacheResult<Vec<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
  {
    match self.lookup::<T>() {
      Lookup::Fresh(snapshot) => {
        debug!(
          partition = T::entity_type(),
          count = snapshot.entities.len(),
          "serving fresh cache"
        );
        self.spawn_refresh(fetcher);
        CacheResult::from_cache(snapshot.entities, snapshot.saved_at)
      }
      Lookup::Miss { evicted } => match self.fetch_and_store(fetcher).await {
        Some(data) => CacheResult::from_network(data),
        None => match evicted {
          Some(snapshot) if !snapshot.entities.is_empty() => {
            warn!(
              partition = T::entity_type(),
              saved_at = %snapshot.saved_at,
              "serving expired snapshot, remote source unavailable"
            );
            CacheResult::offline(snapshot.entities, Some(snapshot.saved_at))
          }
          _ => self.fallback(),
        },
      },
    }
  }

  /// Fetch from network and replace the cache, ignoring freshness.
  ///
  /// On failure the cache is left untouched and whatever it holds is returned,
  /// regardless of age.
  pub async fn refresh<T, F, Fut>(&self, fetcher: F) -> CacheResult<Vec<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    match self.fetch_and_store(fetcher).await {
      Some(data) => CacheResult::from_network(data),
      None => self.fallback(),
    }
  }

  /// Fetch, diff against the cache and apply only the changes.
  ///
  /// Unlike the read path this reports fetch and storage errors.
  pub async fn sync<T, F, Fut, C>(&self, fetcher: F, changed: C) -> Result<SyncReport>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
    C: Fn(&T, &T) -> bool,
  {
    let remote = fetcher().await?;
    let local = self.storage.get_all::<T>()?;
    let diff = diff_by_key(&local, &remote, changed);

    let upserts: Vec<T> = diff.new.iter().chain(&diff.updated).cloned().collect();
    self
      .storage
      .apply_changes(&upserts, &diff.removed, self.now())?;

    let report = SyncReport::from(&diff);
    debug!(partition = T::entity_type(), ?report, "incremental sync applied");
    Ok(report)
  }

  /// Report freshness without evicting anything.
  pub fn status<T: Cacheable>(&self) -> Result<CacheStatus> {
    let saved_at = self.storage.saved_at::<T>()?;
    let entities = self.storage.get_all_keys::<T>()?.len();
    let now = self.now();

    let freshness = match saved_at {
      None => Freshness::Empty,
      Some(at) if now - at > self.ttl => Freshness::Stale,
      Some(_) => Freshness::Fresh,
    };

    Ok(CacheStatus {
      freshness,
      entities,
      saved_at,
      age: saved_at.map(|at| now - at),
    })
  }

  /// Drop every cached entity of the partition and its `saved_at`.
  pub fn clear<T: Cacheable>(&self) -> Result<()> {
    self.storage.clear::<T>()
  }

  /// Wait for revalidations spawned so far.
  pub async fn settle(&self) {
    let handles = std::mem::take(
      &mut *self
        .background
        .lock()
        .unwrap_or_else(PoisonError::into_inner),
    );
    for handle in handles {
      let _ = handle.await;
    }
  }

  /// Run the fetcher; on success replace the cache (best effort) and return the data.
  async fn fetch_and_store<T, F, Fut>(&self, fetcher: F) -> Option<Vec<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let partition = T::entity_type();

    let data = match fetcher().await {
      Ok(data) => data,
      Err(e) => {
        error!(partition, error = %e, "failed to fetch from remote source");
        return None;
      }
    };

    if let Err(e) = self.storage.replace_all(&data, self.now()) {
      warn!(partition, error = %e, "failed to persist fetched entities");
    }

    Some(data)
  }

  /// Whatever is stored, ignoring TTL.
  fn fallback<T: Cacheable>(&self) -> CacheResult<Vec<T>> {
    let entities = match self.storage.get_all::<T>() {
      Ok(entities) => entities,
      Err(e) => {
        warn!(partition = T::entity_type(), error = %e, "fallback cache read failed");
        Vec::new()
      }
    };

    if entities.is_empty() {
      return CacheResult::empty();
    }

    let saved_at = self.storage.saved_at::<T>().ok().flatten();
    CacheResult::offline(entities, saved_at)
  }

  /// Revalidate in a detached task. Failures and panics are logged and dropped.
  fn spawn_refresh<T, F, Fut>(&self, fetcher: F)
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
  {
    let layer = self.clone();
    let task = async move {
      let refreshed = AssertUnwindSafe(layer.fetch_and_store::<T, F, Fut>(fetcher))
        .catch_unwind()
        .await;
      match refreshed {
        Ok(Some(data)) => {
          debug!(partition = T::entity_type(), count = data.len(), "background refresh stored")
        }
        Ok(None) => {}
        Err(_) => error!(partition = T::entity_type(), "background refresh panicked"),
      }
    };

    let handle = tokio::spawn(task);
    let mut tasks = self
      .background
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    tasks.retain(|task| !task.is_finished());
    tasks.push(handle);
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      ttl: self.ttl,
      clock: Arc::clone(&self.clock),
      background: Arc::clone(&self.background),
    }
  }
}
