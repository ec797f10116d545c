//! Cached services client that wraps a RemoteSource with transparent caching.

use color_eyre::{Report, Result};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{
  CacheLayer, CacheResult, CacheStatus, CacheStorage, NoopStorage, SqliteStorage, StorageBackend,
  SyncReport,
};
use crate::config::Config;
use crate::session::SessionContext;

use super::cache::content_changed;
use super::client::{RemoteSource, ServicesClient};
use super::mapper::map_enabled;
use super::types::{ApiService, Service};

/// Services client with transparent caching support.
///
/// Reads never fail: network and storage errors are logged and the best
/// available list is returned, possibly empty. Only enabled services are
/// surfaced.
pub struct CachedServicesClient<S: CacheStorage> {
  remote: Arc<dyn RemoteSource>,
  cache: CacheLayer<S>,
}

impl<S: CacheStorage> Clone for CachedServicesClient<S> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: self.cache.clone(),
    }
  }
}

impl CachedServicesClient<StorageBackend> {
  /// Create a cached client from configuration.
  pub fn from_config(config: &Config) -> Result<Self> {
    let remote = Arc::new(ServicesClient::new(&config.api)?);

    let storage = if config.cache.enabled {
      StorageBackend::Sqlite(SqliteStorage::open(&config.cache.db_path()?)?)
    } else {
      StorageBackend::Disabled(NoopStorage)
    };

    let cache = CacheLayer::new(storage).with_ttl(config.cache.ttl());
    Ok(Self::new(remote, cache))
  }
}

impl<S: CacheStorage + 'static> CachedServicesClient<S> {
  pub fn new(remote: Arc<dyn RemoteSource>, cache: CacheLayer<S>) -> Self {
    Self { remote, cache }
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  /// Fetcher for the cache layer; owns everything it needs so it can run detached.
  fn fetcher(
    &self,
    token: Option<&str>,
  ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Vec<ApiService>>> + Send + 'static
  {
    let remote = Arc::clone(&self.remote);
    let token = token.map(String::from);
    move || {
      Box::pin(async move {
        remote
          .fetch_services(token.as_deref())
          .await
          .map_err(Report::from)
      })
    }
  }

  /// Enabled services: cached if fresh (revalidated in the background), fetched otherwise.
  pub async fn get_services(&self, token: Option<&str>) -> Vec<Service> {
    let result = self.cache.fetch_list(self.fetcher(token)).await;
    Self::surface(result)
  }

  /// Same as [`get_services`](Self::get_services) with the session's token.
  pub async fn get_services_for(&self, session: &SessionContext) -> Vec<Service> {
    self.get_services(session.token().as_deref()).await
  }

  /// Fetch now and replace the cache; falls back to anything cached on failure.
  pub async fn refresh(&self, token: Option<&str>) -> Vec<Service> {
    let result = self.cache.refresh(self.fetcher(token)).await;
    Self::surface(result)
  }

  /// Apply only the differences between the remote list and the cache.
  pub async fn sync(&self, token: Option<&str>) -> Result<SyncReport> {
    self.cache.sync(self.fetcher(token), content_changed).await
  }

  pub fn status(&self) -> Result<CacheStatus> {
    self.cache.status::<ApiService>()
  }

  pub fn clear(&self) -> Result<()> {
    self.cache.clear::<ApiService>()
  }

  /// Wait for background revalidations to finish.
  pub async fn settle(&self) {
    self.cache.settle().await;
  }

  fn surface(result: CacheResult<Vec<ApiService>>) -> Vec<Service> {
    let services = map_enabled(&result.data);
    debug!(
      source = ?result.source,
      total = result.data.len(),
      enabled = services.len(),
      "services resolved"
    );
    services
  }
}
