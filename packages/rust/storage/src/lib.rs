//! Category cache sinks.
//!
//! The sync pipeline writes every processed root category to a key-value
//! cache under `category:<id>`. [`CategoryCache`] is the injected sink;
//! [`Storage`] persists it in a local libSQL database and [`MemoryCache`]
//! keeps it in process (tests, dry runs).

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use catalogsync_shared::{CatalogSyncError, CategoryId, Result};
use chrono::Utc;
use libsql::{Connection, Database, params};
use tokio::sync::RwLock;

/// Namespace prefix for category entries.
pub const CATEGORY_KEY_PREFIX: &str = "category";

/// Cache key of a category, e.g. `category:5`.
pub fn category_key(id: &CategoryId) -> String {
    format!("{CATEGORY_KEY_PREFIX}:{id}")
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Key-value sink for serialized category documents.
#[async_trait]
pub trait CategoryCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read back the entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// libSQL storage
// ---------------------------------------------------------------------------

/// Cache handle wrapping a local libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CatalogSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CatalogSyncError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// List keys sharing `prefix`, e.g. every `category:` entry.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}%");
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM kv_cache WHERE key LIKE ?1 ORDER BY key",
                params![pattern.as_str()],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let mut keys = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?
        {
            keys.push(
                row.get::<String>(0)
                    .map_err(|e| CatalogSyncError::Storage(e.to_string()))?,
            );
        }
        Ok(keys)
    }
}

#[async_trait]
impl CategoryCache for Storage {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(format!("{key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_cache WHERE key = ?1", params![key])
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| CatalogSyncError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(CatalogSyncError::Storage(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory cache
// ---------------------------------------------------------------------------

/// Process-local cache. Entries live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of every stored key, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl CategoryCache for MemoryCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}
