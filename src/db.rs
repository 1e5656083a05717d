use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CachedPayload, PayloadCache};
use crate::errors::{AppError, AppResult};
use crate::models::GeoPoint;

/// SQLite-backed cache for raw payloads and geocode results.
///
/// Each table is keyed by its natural key and written with `INSERT OR REPLACE`; WAL mode
/// lets readers run while the single pipeline writer holds the connection.
#[derive(Clone)]
pub struct CacheStore {
    connection: Arc<Mutex<Connection>>,
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeocodeEntry {
    pub point: GeoPoint,
    pub fetched_at: DateTime<Utc>,
}

impl CacheStore {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(path, flags)?;
        apply_pragmas(&connection)?;
        run_migrations(&connection)?;
        info!(
            target: "cache_store",
            path = %path.display(),
            "cache store ready"
        );
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_wikidata(&self, tconst: &str) -> AppResult<Option<CachedPayload>> {
        self.get_payload("wikidata_locations", tconst)
    }

    pub fn set_wikidata(&self, tconst: &str, payload: &Value) -> AppResult<()> {
        self.set_payload("wikidata_locations", tconst, payload)
    }

    pub fn get_rapidapi_locations(&self, tconst: &str) -> AppResult<Option<CachedPayload>> {
        self.get_payload("rapidapi_locations", tconst)
    }

    pub fn set_rapidapi_locations(&self, tconst: &str, payload: &Value) -> AppResult<()> {
        self.set_payload("rapidapi_locations", tconst, payload)
    }

    pub fn get_geocode(&self, query: &str) -> AppResult<Option<GeocodeEntry>> {
        let conn = self.connection.lock();
        let row: Option<(Option<f64>, Option<f64>, i64)> = conn
            .query_row(
                "SELECT lat, lon, fetched_at FROM geocode_cache WHERE query = ?1",
                [query],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row.and_then(|(lat, lon, fetched_at)| {
            GeoPoint::from_parts(lat, lon).map(|point| GeocodeEntry {
                point,
                fetched_at: timestamp(fetched_at),
            })
        }))
    }

    pub fn set_geocode(&self, query: &str, point: GeoPoint, provider: &str) -> AppResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            "INSERT OR REPLACE INTO geocode_cache (query, lat, lon, provider, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5)",
            (query, point.lat, point.lon, provider, Utc::now().timestamp()),
        )?;
        Ok(())
    }

    fn get_payload(&self, table: &str, tconst: &str) -> AppResult<Option<CachedPayload>> {
        let conn = self.connection.lock();
        let sql = format!("SELECT payload_json, fetched_at FROM {table} WHERE tconst = ?1");
        let row: Option<(String, i64)> = conn
            .query_row(&sql, [tconst], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((payload_json, fetched_at)) = row else {
            return Ok(None);
        };
        let payload = serde_json::from_str(&payload_json)
            .map_err(|err| AppError::Parse(format!("corrupt {table} entry for {tconst}: {err}")))?;
        Ok(Some(CachedPayload {
            fetched_at: timestamp(fetched_at),
            payload,
        }))
    }

    fn set_payload(&self, table: &str, tconst: &str, payload: &Value) -> AppResult<()> {
        let conn = self.connection.lock();
        let sql = format!(
            "INSERT OR REPLACE INTO {table} (tconst, payload_json, fetched_at) VALUES (?1, ?2, ?3)"
        );
        conn.execute(
            &sql,
            (tconst, serde_json::to_string(payload)?, Utc::now().timestamp()),
        )?;
        Ok(())
    }
}

/// The `rapidapi_locations` table as an alternative to the file cache.
impl PayloadCache for CacheStore {
    fn get(&self, key: &str) -> Option<CachedPayload> {
        match self.get_rapidapi_locations(key) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(target: "cache_store", key, ?err, "unreadable cache row; treating as miss");
                None
            }
        }
    }

    fn set(&self, key: &str, payload: &Value) -> AppResult<()> {
        self.set_rapidapi_locations(key, payload)
    }
}

fn apply_pragmas(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(())
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS wikidata_locations (
            tconst TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (tconst)
        );

        CREATE TABLE IF NOT EXISTS rapidapi_locations (
            tconst TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (tconst)
        );

        CREATE TABLE IF NOT EXISTS geocode_cache (
            query TEXT PRIMARY KEY,
            lat REAL,
            lon REAL,
            provider TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}
