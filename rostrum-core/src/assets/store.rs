//! Persistent keyed blob store for model assets (SQLite).
//!
//! One table, keyed by asset name. Each row carries a sha256 of its payload;
//! a row whose digest no longer matches is treated as absent, so a corrupt
//! cache degrades to a re-download instead of a broken session.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Result, RostrumError};

/// Device-local blob store backing [`ModelCache`](crate::assets::ModelCache).
#[derive(Debug, Clone)]
pub struct AssetStore {
    db_path: PathBuf,
}

impl AssetStore {
    pub fn default_db_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            std::env::var_os("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Lattice Labs")
                .join("Rostrum")
                .join("assets.db")
        }
        #[cfg(not(target_os = "windows"))]
        {
            std::env::var_os("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    std::env::var_os("HOME")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("/tmp"))
                        .join(".local")
                        .join("share")
                })
                .join("rostrum")
                .join("assets.db")
        }
    }

    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(storage_err)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS model_assets (
              name TEXT PRIMARY KEY,
              payload BLOB NOT NULL,
              byte_len INTEGER NOT NULL,
              sha256 TEXT NOT NULL,
              fetched_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Fetch a cached payload by name. Returns `None` for missing rows and
    /// for rows failing digest verification (which are deleted on the spot).
    pub fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.open()?;
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT payload, sha256 FROM model_assets WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err)?;

        let Some((payload, stored_digest)) = row else {
            return Ok(None);
        };

        if hex_sha256(&payload) != stored_digest {
            warn!(name, "cached asset failed digest check, evicting");
            conn.execute("DELETE FROM model_assets WHERE name = ?1", params![name])
                .map_err(storage_err)?;
            return Ok(None);
        }

        Ok(Some(payload))
    }

    /// Store a complete payload under `name`, replacing any previous row.
    pub fn put(&self, name: &str, payload: &[u8]) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO model_assets (name, payload, byte_len, sha256, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(name) DO UPDATE SET
                payload = excluded.payload,
                byte_len = excluded.byte_len,
                sha256 = excluded.sha256,
                fetched_at = excluded.fetched_at
            "#,
            params![
                name,
                payload,
                payload.len() as i64,
                hex_sha256(payload),
                Utc::now().timestamp(),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        let conn = self.open()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM model_assets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(found.is_some())
    }

    /// Names of all cached assets, oldest fetch first.
    pub fn cached_names(&self) -> Result<Vec<String>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT name FROM model_assets ORDER BY fetched_at ASC")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        let mut out = Vec::new();
        for name in rows {
            out.push(name.map_err(storage_err)?);
        }
        Ok(out)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM model_assets WHERE name = ?1", params![name])
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn storage_err(e: rusqlite::Error) -> RostrumError {
    RostrumError::Storage(e.to_string())
}

fn hex_sha256(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
