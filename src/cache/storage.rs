//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::traits::Cacheable;

/// Version stamped into `PRAGMA user_version` after bootstrapping.
const SCHEMA_VERSION: i64 = 1;

/// Entities of one partition together with their `saved_at` stamp.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
  /// The cached entities in insertion order
  pub entities: Vec<T>,
  /// When the partition was last fully replaced
  pub saved_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Every method is a single atomic transaction: the entity partition and its
/// `saved_at` metadata are updated together or not at all.
pub trait CacheStorage: Send + Sync {
  /// Get a single entity by key.
  fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>>;

  /// Get all entities of the partition, in insertion order.
  fn get_all<T: Cacheable>(&self) -> Result<Vec<T>>;

  /// Get all keys of the partition, in insertion order.
  fn get_all_keys<T: Cacheable>(&self) -> Result<Vec<String>>;

  /// Upsert a single entity. Does not touch `saved_at`.
  fn put<T: Cacheable>(&self, entity: &T) -> Result<()>;

  /// Delete entities by key. Does not touch `saved_at`.
  fn delete<T: Cacheable>(&self, keys: &[String]) -> Result<()>;

  /// When the partition was last stamped, if ever.
  fn saved_at<T: Cacheable>(&self) -> Result<Option<DateTime<Utc>>>;

  /// Clear the partition, insert `entities` and stamp `saved_at`.
  fn replace_all<T: Cacheable>(&self, entities: &[T], saved_at: DateTime<Utc>) -> Result<()>;

  /// Upsert `upserts`, delete `removed` and stamp `saved_at`.
  fn apply_changes<T: Cacheable>(
    &self,
    upserts: &[T],
    removed: &[String],
    saved_at: DateTime<Utc>,
  ) -> Result<()>;

  /// Remove every entity of the partition and its `saved_at` stamp.
  fn clear<T: Cacheable>(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get<T: Cacheable>(&self, _key: &str) -> Result<Option<T>> {
    Ok(None) // Always miss
  }

  fn get_all<T: Cacheable>(&self) -> Result<Vec<T>> {
    Ok(Vec::new())
  }

  fn get_all_keys<T: Cacheable>(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn put<T: Cacheable>(&self, _entity: &T) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete<T: Cacheable>(&self, _keys: &[String]) -> Result<()> {
    Ok(())
  }

  fn saved_at<T: Cacheable>(&self) -> Result<Option<DateTime<Utc>>> {
    Ok(None)
  }

  fn replace_all<T: Cacheable>(&self, _entities: &[T], _saved_at: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn apply_changes<T: Cacheable>(
    &self,
    _upserts: &[T],
    _removed: &[String],
    _saved_at: DateTime<Utc>,
  ) -> Result<()> {
    Ok(())
  }

  fn clear<T: Cacheable>(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    run_migrations(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("svcache").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Entity partitions (stores serialized JSON, preserves insertion order)
CREATE TABLE IF NOT EXISTS entities (
    partition TEXT NOT NULL,
    id TEXT NOT NULL,
    data BLOB NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (partition, id)
);

CREATE INDEX IF NOT EXISTS idx_entities_position ON entities(partition, position);

-- Lightweight metadata (saved_at stamps in ms since epoch)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

/// Create the tables if absent and stamp the schema version.
fn run_migrations(conn: &Connection) -> Result<()> {
  let version: i64 = conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read cache schema version: {}", e))?;

  if version > SCHEMA_VERSION {
    return Err(eyre!(
      "Cache database schema v{} is newer than supported v{}",
      version,
      SCHEMA_VERSION
    ));
  }

  conn
    .execute_batch(CACHE_SCHEMA)
    .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
  conn
    .pragma_update(None, "user_version", SCHEMA_VERSION)
    .map_err(|e| eyre!("Failed to stamp cache schema version: {}", e))?;

  Ok(())
}

fn meta_key(partition: &str) -> String {
  format!("{}_saved_at", partition)
}

fn encode<T: Cacheable>(entity: &T) -> Result<Vec<u8>> {
  serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))
}

/// Insert or replace one row; new keys are appended after the current last position.
fn upsert_row(conn: &Connection, partition: &str, key: &str, data: &[u8]) -> Result<()> {
  conn
    .execute(
      "INSERT INTO entities (partition, id, data, position)
       VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(position), -1) + 1 FROM entities WHERE partition = ?1))
       ON CONFLICT (partition, id) DO UPDATE SET data = excluded.data",
      params![partition, key, data],
    )
    .map_err(|e| eyre!("Failed to store entity: {}", e))?;
  Ok(())
}

fn delete_rows(conn: &Connection, partition: &str, keys: &[String]) -> Result<()> {
  let mut stmt = conn
    .prepare("DELETE FROM entities WHERE partition = ?1 AND id = ?2")
    .map_err(|e| eyre!("Failed to prepare delete: {}", e))?;
  for key in keys {
    stmt
      .execute(params![partition, key])
      .map_err(|e| eyre!("Failed to delete entity {}: {}", key, e))?;
  }
  Ok(())
}

fn stamp(conn: &Connection, partition: &str, saved_at: DateTime<Utc>) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
      params![meta_key(partition), saved_at.timestamp_millis()],
    )
    .map_err(|e| eyre!("Failed to stamp saved_at: {}", e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>> {
    let conn = self.lock()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM entities WHERE partition = ?1 AND id = ?2",
        params![T::entity_type(), key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entity {}: {}", key, e))?;

    data
      .map(|data| {
        serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity {}: {}", key, e))
      })
      .transpose()
  }

  fn get_all<T: Cacheable>(&self) -> Result<Vec<T>> {
    let conn = self.lock()?;
    let partition = T::entity_type();

    let mut stmt = conn
      .prepare("SELECT id, data FROM entities WHERE partition = ?1 ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare entity query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map(params![partition], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query entities: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entity row: {}", e))?;

    let entities = rows
      .into_iter()
      .filter_map(|(id, data)| match serde_json::from_slice(&data) {
        Ok(entity) => Some(entity),
        Err(e) => {
          warn!(partition, id = %id, error = %e, "skipping undecodable cached entity");
          None
        }
      })
      .collect();

    Ok(entities)
  }

  fn get_all_keys<T: Cacheable>(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT id FROM entities WHERE partition = ?1 ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map(params![T::entity_type()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    Ok(keys)
  }

  fn put<T: Cacheable>(&self, entity: &T) -> Result<()> {
    let conn = self.lock()?;
    upsert_row(&conn, T::entity_type(), &entity.cache_key(), &encode(entity)?)
  }

  fn delete<T: Cacheable>(&self, keys: &[String]) -> Result<()> {
    if keys.is_empty() {
      return Ok(());
    }
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    delete_rows(&tx, T::entity_type(), keys)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn saved_at<T: Cacheable>(&self) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;

    let millis: Option<i64> = conn
      .query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![meta_key(T::entity_type())],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query saved_at: {}", e))?;

    match millis {
      Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
        .map(Some)
        .ok_or_else(|| eyre!("Stored saved_at {} is out of range", ms)),
      None => Ok(None),
    }
  }

  fn replace_all<T: Cacheable>(&self, entities: &[T], saved_at: DateTime<Utc>) -> Result<()> {
    let partition = T::entity_type();
    let encoded = entities
      .iter()
      .map(|entity| Ok((entity.cache_key(), encode(entity)?)))
      .collect::<Result<Vec<_>>>()?;

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entities WHERE partition = ?1", params![partition])
      .map_err(|e| eyre!("Failed to clear partition {}: {}", partition, e))?;
    for (key, data) in &encoded {
      upsert_row(&tx, partition, key, data)?;
    }
    stamp(&tx, partition, saved_at)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(partition, count = encoded.len(), "replaced cached partition");
    Ok(())
  }

  fn apply_changes<T: Cacheable>(
    &self,
    upserts: &[T],
    removed: &[String],
    saved_at: DateTime<Utc>,
  ) -> Result<()> {
    let partition = T::entity_type();
    let encoded = upserts
      .iter()
      .map(|entity| Ok((entity.cache_key(), encode(entity)?)))
      .collect::<Result<Vec<_>>>()?;

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, data) in &encoded {
      upsert_row(&tx, partition, key, data)?;
    }
    delete_rows(&tx, partition, removed)?;
    stamp(&tx, partition, saved_at)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn clear<T: Cacheable>(&self) -> Result<()> {
    let partition = T::entity_type();
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entities WHERE partition = ?1", params![partition])
      .map_err(|e| eyre!("Failed to clear partition {}: {}", partition, e))?;
    tx.execute("DELETE FROM meta WHERE key = ?1", params![meta_key(partition)])
      .map_err(|e| eyre!("Failed to clear saved_at: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }
}

/// Storage selected at runtime: SQLite, or no caching at all.
pub enum StorageBackend {
  Sqlite(SqliteStorage),
  Disabled(NoopStorage),
}

macro_rules! dispatch {
  ($self:ident, $storage:ident => $call:expr) => {
    match $self {
      StorageBackend::Sqlite($storage) => $call,
      StorageBackend::Disabled($storage) => $call,
    }
  };
}

impl CacheStorage for StorageBackend {
  fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>> {
    dispatch!(self, s => s.get::<T>(key))
  }

  fn get_all<T: Cacheable>(&self) -> Result<Vec<T>> {
    dispatch!(self, s => s.get_all::<T>())
  }

  fn get_all_keys<T: Cacheable>(&self) -> Result<Vec<String>> {
    dispatch!(self, s => s.get_all_keys::<T>())
  }

  fn put<T: Cacheable>(&self, entity: &T) -> Result<()> {
    dispatch!(self, s => s.put(entity))
  }

  fn delete<T: Cacheable>(&self, keys: &[String]) -> Result<()> {
    dispatch!(self, s => s.delete::<T>(keys))
  }

  fn saved_at<T: Cacheable>(&self) -> Result<Option<DateTime<Utc>>> {
    dispatch!(self, s => s.saved_at::<T>())
  }

  fn replace_all<T: Cacheable>(&self, entities: &[T], saved_at: DateTime<Utc>) -> Result<()> {
    dispatch!(self, s => s.replace_all(entities, saved_at))
  }

  fn apply_changes<T: Cacheable>(
    &self,
    upserts: &[T],
    removed: &[String],
    saved_at: DateTime<Utc>,
  ) -> Result<()> {
    dispatch!(self, s => s.apply_changes(upserts, removed, saved_at))
  }

  fn clear<T: Cacheable>(&self) -> Result<()> {
    dispatch!(self, s => s.clear::<T>())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: String,
    label: String,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "items"
    }
  }

  fn item(id: &str, label: &str) -> Item {
    Item {
      id: id.to_string(),
      label: label.to_string(),
    }
  }

  fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
  }

  #[test]
  fn test_put_same_entity_twice_keeps_one_record() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let a = item("1", "A");

    storage.put(&a).unwrap();
    storage.put(&a).unwrap();

    assert_eq!(storage.get_all::<Item>().unwrap(), vec![a]);
    assert_eq!(storage.get_all_keys::<Item>().unwrap(), vec!["1".to_string()]);
  }

  #[test]
  fn test_put_replaces_in_place() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put(&item("1", "A")).unwrap();
    storage.put(&item("2", "B")).unwrap();
    storage.put(&item("1", "A2")).unwrap();

    let all = storage.get_all::<Item>().unwrap();
    assert_eq!(all, vec![item("1", "A2"), item("2", "B")]);
    assert_eq!(storage.get::<Item>("1").unwrap(), Some(item("1", "A2")));
    assert_eq!(storage.get::<Item>("3").unwrap(), None);
  }

  #[test]
  fn test_replace_all_leaves_no_residue() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .replace_all(&[item("1", "A"), item("2", "B"), item("3", "C")], at(1_000))
      .unwrap();

    let next = vec![item("9", "Z"), item("2", "B2")];
    storage.replace_all(&next, at(2_000)).unwrap();

    assert_eq!(storage.get_all::<Item>().unwrap(), next);
    assert_eq!(storage.saved_at::<Item>().unwrap(), Some(at(2_000)));
  }

  #[test]
  fn test_saved_at_absent_until_first_replace() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put(&item("1", "A")).unwrap();

    assert_eq!(storage.saved_at::<Item>().unwrap(), None);
  }

  #[test]
  fn test_clear_removes_entities_and_saved_at() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.replace_all(&[item("1", "A")], at(5)).unwrap();

    storage.clear::<Item>().unwrap();

    assert!(storage.get_all::<Item>().unwrap().is_empty());
    assert_eq!(storage.saved_at::<Item>().unwrap(), None);
  }

  #[test]
  fn test_apply_changes_upserts_deletes_and_stamps() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .replace_all(&[item("1", "A"), item("2", "B")], at(10))
      .unwrap();

    storage
      .apply_changes(&[item("2", "B2"), item("3", "C")], &["1".to_string()], at(20))
      .unwrap();

    assert_eq!(
      storage.get_all::<Item>().unwrap(),
      vec![item("2", "B2"), item("3", "C")]
    );
    assert_eq!(storage.saved_at::<Item>().unwrap(), Some(at(20)));
  }

  #[test]
  fn test_delete_leaves_saved_at() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .replace_all(&[item("1", "A"), item("2", "B")], at(10))
      .unwrap();

    storage.delete::<Item>(&["2".to_string()]).unwrap();

    assert_eq!(storage.get_all_keys::<Item>().unwrap(), vec!["1".to_string()]);
    assert_eq!(storage.saved_at::<Item>().unwrap(), Some(at(10)));
  }

  #[test]
  fn test_undecodable_rows_are_skipped() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put(&item("1", "A")).unwrap();
    {
      let conn = storage.lock().unwrap();
      upsert_row(&conn, "items", "bad", b"not json").unwrap();
    }

    assert_eq!(storage.get_all::<Item>().unwrap(), vec![item("1", "A")]);
    assert_eq!(storage.get_all_keys::<Item>().unwrap().len(), 2);
  }

  #[test]
  fn test_reopen_keeps_data_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.replace_all(&[item("1", "A")], at(42)).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.get_all::<Item>().unwrap(), vec![item("1", "A")]);
    assert_eq!(storage.saved_at::<Item>().unwrap(), Some(at(42)));
  }

  #[test]
  fn test_newer_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
      let conn = Connection::open(&path).unwrap();
      conn.pragma_update(None, "user_version", 99).unwrap();
    }

    assert!(SqliteStorage::open(&path).is_err());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = StorageBackend::Disabled(NoopStorage);
    storage.replace_all(&[item("1", "A")], at(1)).unwrap();

    assert!(storage.get_all::<Item>().unwrap().is_empty());
    assert_eq!(storage.saved_at::<Item>().unwrap(), None);
  }
}
