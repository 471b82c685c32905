//! Share-link persistence
//!
//! A keyed blob store for code snippets: short opaque keys, dedupe by
//! content, retry on key collision. SQLite-backed.

use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::warn;

const KEY_LENGTH: usize = 5;
const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";
const MAX_KEY_RETRIES: usize = 3;

/// Largest accepted snippet, in bytes.
pub const MAX_SHARE_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no code found")]
    NotFound,

    #[error("could not generate an id")]
    KeyExhausted,

    #[error("share code is too large")]
    TooLarge,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct ShareStore {
    pool: SqlitePool,
}

impl ShareStore {
    /// Open (creating if missing) the share database.
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StoreError::Database(sqlx::Error::Io(err))
                })?;
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{database_path}"))
            .or_else(|_| SqliteConnectOptions::from_str(database_path))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS shares (id TEXT NOT NULL PRIMARY KEY, code TEXT UNIQUE)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    /// Fetch a stored snippet by key.
    pub async fn get(&self, id: &str) -> Result<String, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT code FROM shares WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Store a snippet and return its key. Identical snippets share a key;
    /// collisions on fresh keys are retried a few times.
    pub async fn create(&self, code: &str) -> Result<String, StoreError> {
        if code.len() > MAX_SHARE_BYTES {
            return Err(StoreError::TooLarge);
        }

        if let Some(existing) = sqlx::query_scalar::<_, String>("SELECT id FROM shares WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(existing);
        }

        for _ in 0..=MAX_KEY_RETRIES {
            let key = random_key(KEY_LENGTH);
            match sqlx::query("INSERT INTO shares(id, code) VALUES(?, ?)")
                .bind(&key)
                .bind(code)
                .execute(&self.pool)
                .await
            {
                Ok(_) => return Ok(key),
                Err(err) => {
                    warn!(error = %err, "could not insert share key, retrying");
                }
            }
        }
        Err(StoreError::KeyExhausted)
    }
}

fn random_key(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}
