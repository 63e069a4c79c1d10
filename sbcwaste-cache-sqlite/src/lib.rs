//! SQLite-backed cache for sbcwaste lookups.
//!
//! Entries live in a single `cache` table. Keys are stored as SHA-256 hex
//! digests, timestamps as Unix seconds.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use sbcwaste_core::cache::{Cache, CacheError, CachedValue, hash_key};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    value BLOB,
    expiration INTEGER,
    created INTEGER
)";

/// Databases written before entry ages were tracked lack this column.
const ADD_CREATED_COLUMN: &str = "ALTER TABLE cache ADD COLUMN created INTEGER";

/// Row counts reported by [`SqliteCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// All stored rows.
    pub entries: u64,
    /// Rows whose expiry has passed but have not been read since.
    pub expired: u64,
}

/// Persistent cache stored in a SQLite database file.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) the database at `path` and ensure the table exists.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(backend)?;
        debug!(path = %path.display(), "opened sqlite cache");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if SQLite refuses the connection.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute(SCHEMA, []).map_err(backend)?;
        match conn.execute(ADD_CREATED_COLUMN, []) {
            Ok(_) => debug!("added created column to legacy cache table"),
            Err(err) if err.to_string().contains("duplicate column name") => {}
            Err(err) => return Err(backend(err)),
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Count stored and expired rows.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the query fails.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let (entries, expired): (i64, i64) = self
            .lock()?
            .query_row(
                "SELECT COUNT(*), COUNT(CASE WHEN expiration <= ?1 THEN 1 END) FROM cache",
                params![Utc::now().timestamp()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(backend)?;
        Ok(CacheStats {
            entries: entries.unsigned_abs(),
            expired: expired.unsigned_abs(),
        })
    }

    /// Delete every row and return how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the delete fails.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM cache", [])
            .map_err(backend)?;
        debug!(removed, "cleared sqlite cache");
        Ok(removed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|_poisoned| CacheError::Backend("sqlite connection lock poisoned".into()))
    }
}

#[async_trait]
impl Cache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let hashed = hash_key(key);
        let conn = self.lock()?;
        let row: Option<(Vec<u8>, i64, Option<i64>)> = conn
            .query_row(
                "SELECT CAST(value AS BLOB), expiration, created FROM cache WHERE key = ?1",
                params![hashed],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(backend)?;

        let Some((bytes, expiration, created)) = row else {
            return Ok(None);
        };
        if Utc::now().timestamp() >= expiration {
            conn.execute("DELETE FROM cache WHERE key = ?1", params![hashed])
                .map_err(backend)?;
            debug!(key, "removed expired cache entry");
            return Ok(None);
        }

        // rows from before the migration have no creation time and are refetched
        let Some(created) = created.and_then(|secs| DateTime::from_timestamp(secs, 0)) else {
            debug!(key, "ignoring cache entry without creation time");
            return Ok(None);
        };
        Ok(Some(CachedValue { bytes, created }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: TimeDelta) -> Result<(), CacheError> {
        let now = Utc::now();
        let expiration = (now + ttl).timestamp();
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO cache (key, value, expiration, created) VALUES (?1, ?2, ?3, ?4)",
                params![hash_key(key), value, expiration, now.timestamp()],
            )
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: rusqlite::Error) -> CacheError {
    CacheError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_count(cache: &SqliteCache) -> i64 {
        cache
            .lock()
            .expect("lock")
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
            .expect("count")
    }

    #[tokio::test]
    async fn entries_survive_reopening() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sbcwaste.db");
        let value = br#"{"address":"Test Address","collections":[]}"#;

        {
            let cache = SqliteCache::open(&path).expect("open");
            cache
                .set("12345", value, TimeDelta::hours(1))
                .await
                .expect("set");
        }

        let cache = SqliteCache::open(&path).expect("reopen");
        let cached = cache.get("12345").await.expect("get").expect("hit");
        assert_eq!(cached.bytes, value);
        assert!(cached.age() >= TimeDelta::zero());
        assert!(cached.age() < TimeDelta::minutes(1));
    }

    #[tokio::test]
    async fn keys_are_stored_hashed() {
        let cache = SqliteCache::open_in_memory().expect("open");
        let url = "https://www.swindon.gov.uk/site/images/bin.png";
        cache
            .set(url, b"icon", TimeDelta::days(7))
            .await
            .expect("set");

        let stored: String = cache
            .lock()
            .expect("lock")
            .query_row("SELECT key FROM cache", [], |row| row.get(0))
            .expect("key");
        assert_eq!(stored, hash_key(url));
    }

    #[tokio::test]
    async fn expired_entries_are_deleted_on_read() {
        let cache = SqliteCache::open_in_memory().expect("open");
        cache
            .set("54321", b"stale", TimeDelta::hours(-1))
            .await
            .expect("set");
        assert_eq!(row_count(&cache), 1);

        assert_eq!(cache.get("54321").await.expect("get"), None);
        assert_eq!(row_count(&cache), 0);
    }

    #[tokio::test]
    async fn set_replaces_existing_value() {
        let cache = SqliteCache::open_in_memory().expect("open");
        cache
            .set("12345", b"old", TimeDelta::hours(1))
            .await
            .expect("first set");
        cache
            .set("12345", b"new", TimeDelta::hours(1))
            .await
            .expect("second set");

        let cached = cache.get("12345").await.expect("get").expect("hit");
        assert_eq!(cached.bytes, b"new");
        assert_eq!(row_count(&cache), 1);
    }

    #[tokio::test]
    async fn legacy_schema_is_migrated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sbcwaste.db");
        {
            let conn = Connection::open(&path).expect("legacy db");
            conn.execute(
                "CREATE TABLE cache (key TEXT PRIMARY KEY, value TEXT, expiration INTEGER)",
                [],
            )
            .expect("legacy table");
            conn.execute(
                "INSERT INTO cache (key, value, expiration) VALUES (?1, ?2, ?3)",
                params![hash_key("12345"), "{}", Utc::now().timestamp() + 3600],
            )
            .expect("legacy row");
        }

        let cache = SqliteCache::open(&path).expect("open migrates");
        assert_eq!(cache.get("12345").await.expect("legacy get"), None);

        cache
            .set("12345", b"fresh", TimeDelta::hours(1))
            .await
            .expect("set after migration");
        let cached = cache.get("12345").await.expect("get").expect("hit");
        assert_eq!(cached.bytes, b"fresh");

        drop(cache);
        SqliteCache::open(&path).expect("reopening a migrated db");
    }

    #[tokio::test]
    async fn stats_and_clear() {
        let cache = SqliteCache::open_in_memory().expect("open");
        cache
            .set("live", b"a", TimeDelta::hours(1))
            .await
            .expect("live");
        cache
            .set("stale", b"b", TimeDelta::hours(-1))
            .await
            .expect("stale");

        assert_eq!(
            cache.stats().expect("stats"),
            CacheStats {
                entries: 2,
                expired: 1,
            }
        );
        assert_eq!(cache.clear().expect("clear"), 2);
        assert_eq!(
            cache.stats().expect("stats"),
            CacheStats {
                entries: 0,
                expired: 0,
            }
        );
    }

    #[tokio::test]
    async fn unknown_keys_are_misses() {
        let cache = SqliteCache::open_in_memory().expect("open");
        assert_eq!(cache.get("missing").await.expect("get"), None);
    }

    #[test]
    fn unopenable_path_is_a_backend_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("sbcwaste.db");
        assert!(matches!(
            SqliteCache::open(path),
            Err(CacheError::Backend(_))
        ));
    }
}
