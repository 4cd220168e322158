//! SQLite implementation of the cache capability.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use super::traits::{CacheEntryInfo, CacheStorage, CacheStore, CachedResponse};
use crate::http::{Request, RequestKey, Response};

/// SQLite-based cache storage. Stores persist in the database file until it
/// is removed.
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Cache database that lives only as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = lock(&self.conn)?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cache_stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    -- set when a batch commits; a store whose install failed stays NULL
    installed_at TEXT
);

-- rowid order is insertion order; a replaced entry moves to the end
CREATE TABLE IF NOT EXISTS cache_entries (
    store_id INTEGER NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_url TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    body_sha256 TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (store_id, request_key),
    FOREIGN KEY (store_id) REFERENCES cache_stores(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

const ENTRY_COLUMNS: &str =
  "status, status_text, response_url, headers, body, cached_at";

/// Raw entry columns, decoded outside the rusqlite row closure.
type EntryRow = (u16, String, String, Vec<u8>, Vec<u8>, String);

impl CacheStorage for SqliteStorage {
  type Store = SqliteCache;

  fn open(&self, name: &str) -> Result<SqliteCache> {
    let conn = lock(&self.conn)?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create cache store '{}': {}", name, e))?;

    let id: i64 = conn
      .query_row(
        "SELECT id FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to open cache store '{}': {}", name, e))?;

    Ok(SqliteCache {
      conn: Arc::clone(&self.conn),
      id,
      name: name.to_string(),
    })
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT id FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache stores: {}", e))?;

    Ok(found.is_some())
  }

  fn installed(&self, name: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;

    let installed_at: Option<Option<String>> = conn
      .query_row(
        "SELECT installed_at FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache stores: {}", e))?;

    Ok(installed_at.flatten().is_some())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let stores: Vec<(i64, String)> = {
      let conn = lock(&self.conn)?;
      let mut stmt = conn
        .prepare("SELECT id, name FROM cache_stores ORDER BY id")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read cache store: {}", e))?;
      rows
    };

    for (id, name) in stores {
      let store = SqliteCache {
        conn: Arc::clone(&self.conn),
        id,
        name,
      };
      if let Some(hit) = store.match_request(request)? {
        return Ok(Some(hit));
      }
    }

    Ok(None)
  }
}

/// Handle to one named store inside a [`SqliteStorage`].
pub struct SqliteCache {
  conn: Arc<Mutex<Connection>>,
  id: i64,
  name: String,
}

impl CacheStore for SqliteCache {
  fn name(&self) -> &str {
    &self.name
  }

  fn put_all(&self, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = lock(&self.conn)?;

    // Dropping the transaction without commit rolls the whole batch back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      let headers = serde_json::to_vec(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (store_id, request_key, status, status_text, response_url, headers, body, body_sha256, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          self.id,
          key.as_str(),
          response.status,
          response.status_text,
          response.url.as_str(),
          headers,
          response.body,
          body_digest(&response.body),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;
    }

    tx.execute(
      "UPDATE cache_stores SET installed_at = datetime('now') WHERE id = ?",
      params![self.id],
    )
    .map_err(|e| eyre!("Failed to mark '{}' installed: {}", self.name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let Some(key) = request.cache_key() else {
      return Ok(None);
    };
    let conn = lock(&self.conn)?;

    let row: Option<EntryRow> = conn
      .query_row(
        &format!(
          "SELECT {ENTRY_COLUMNS} FROM cache_entries
           WHERE store_id = ? AND request_key = ?"
        ),
        params![self.id, key.as_str()],
        read_entry_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in '{}': {}", key, self.name, e))?;

    row.map(decode_entry).transpose()
  }

  fn keys(&self) -> Result<Vec<CacheEntryInfo>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT request_key, status, length(body), body_sha256, cached_at
         FROM cache_entries WHERE store_id = ? ORDER BY rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![self.id], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of '{}': {}", self.name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry of '{}': {}", self.name, e))?;

    rows
      .into_iter()
      .map(|(key, status, size, digest, cached_at)| {
        Ok(CacheEntryInfo {
          key: RequestKey::from_url(&parse_url(&key)?),
          status,
          size: usize::try_from(size).unwrap_or_default(),
          digest,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
  conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn decode_entry(row: EntryRow) -> Result<CachedResponse> {
  let (status, status_text, url, headers, body, cached_at) = row;

  let headers: Vec<(String, Vec<u8>)> = serde_json::from_slice(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  Ok(CachedResponse {
    response: Response {
      status,
      status_text,
      url: parse_url(&url)?,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

/// Hex SHA-256 of a response body.
pub fn body_digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

fn parse_url(s: &str) -> Result<Url> {
  Url::parse(s).map_err(|e| eyre!("Failed to parse stored URL '{}': {}", s, e))
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
