//! SQLite-backed local state: theme preference and optional admin token.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::render::MermaidTheme;

pub const THEME_KEY: &str = "theme";
pub const ADMIN_TOKEN_KEY: &str = "admin_token";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// =============================================================================
// Theme
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    pub fn mermaid(&self) -> MermaidTheme {
        match self {
            Self::Light => MermaidTheme::Default,
            Self::Dark => MermaidTheme::Dark,
        }
    }
}

impl FromStr for Theme {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(StateError::InvalidValue {
                key: THEME_KEY,
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StateError>;
    async fn remove(&self, key: &str) -> Result<bool, StateError>;
}

#[derive(Clone)]
pub struct SqliteStateStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS local_state (\
               key TEXT PRIMARY KEY,\
               value TEXT NOT NULL,\
               updated_at INTEGER NOT NULL\
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StateError>
    where
        F: FnOnce(&Connection) -> Result<R, StateError>,
    {
        let guard = self.conn.lock().map_err(|_| StateError::Poisoned)?;
        f(&guard)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let key = key.to_string();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM local_state WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
        })
        .await
        .map_err(|e| StateError::Join(e.to_string()))?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let key = key.to_string();
        let value = value.to_string();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO local_state (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET \
                     value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, chrono::Utc::now().timestamp()],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StateError::Join(e.to_string()))?
    }

    async fn remove(&self, key: &str) -> Result<bool, StateError> {
        let key = key.to_string();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let removed = conn.execute("DELETE FROM local_state WHERE key = ?1", params![key])?;
                Ok(removed > 0)
            })
        })
        .await
        .map_err(|e| StateError::Join(e.to_string()))?
    }
}

// =============================================================================
// Typed accessors
// =============================================================================

/// Stored theme. Unknown stored values read as the default theme.
pub async fn load_theme(store: &dyn StateStore) -> Result<Theme, StateError> {
    Ok(store
        .get(THEME_KEY)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or_default())
}

pub async fn save_theme(store: &dyn StateStore, theme: Theme) -> Result<(), StateError> {
    store.set(THEME_KEY, theme.as_str()).await
}

/// Flip the stored theme and return the new one.
pub async fn toggle_theme(store: &dyn StateStore) -> Result<Theme, StateError> {
    let next = load_theme(store).await?.toggled();
    save_theme(store, next).await?;
    Ok(next)
}

pub async fn load_admin_token(store: &dyn StateStore) -> Result<Option<String>, StateError> {
    Ok(store
        .get(ADMIN_TOKEN_KEY)
        .await?
        .filter(|t| !t.trim().is_empty()))
}

pub async fn save_admin_token(store: &dyn StateStore, token: &str) -> Result<(), StateError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(StateError::InvalidValue {
            key: ADMIN_TOKEN_KEY,
            value: String::new(),
        });
    }
    store.set(ADMIN_TOKEN_KEY, token).await
}

pub async fn clear_admin_token(store: &dyn StateStore) -> Result<bool, StateError> {
    store.remove(ADMIN_TOKEN_KEY).await
}

/// Token with everything but the last four characters masked.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let keep = chars.len().min(4);
    let hidden = chars.len() - keep;
    let tail: String = chars[hidden..].iter().collect();
    format!("{}{}", "*".repeat(hidden), tail)
}
