//! Blacklist/Whitelist Engines (C6): domain membership sets with
//! categories, reasons and sources; bulk import/export.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Manual,
    Import,
    Auto,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry {
    pub domain: String,
    pub added_at_ms: u128,
    pub source: Source,
    pub reason: Option<String>,
    pub category: Option<String>,
}

fn normalize(domain: &str) -> String {
    domain.trim().to_lowercase()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[async_trait::async_trait]
pub trait ListStore: Send + Sync {
    async fn contains(&self, domain: &str) -> Result<bool, StoreError>;
    async fn add(
        &self,
        domain: &str,
        source: Source,
        reason: Option<String>,
        category: Option<String>,
    ) -> Result<(), StoreError>;
    async fn remove(&self, domain: &str) -> Result<bool, StoreError>;
    async fn list(&self, category: Option<&str>) -> Result<Vec<ListEntry>, StoreError>;
    async fn import(&self, entries: Vec<ListEntry>) -> Result<usize, StoreError>;
    async fn export(&self) -> Result<Vec<ListEntry>, StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Grounded on `repository/blocklist.rs`'s `MemoryBlocklistService`,
/// generalized to carry the full `ListEntry` shape (reason/category/source)
/// instead of a bare domain set, and reused for both blacklist and
/// whitelist roles.
#[derive(Debug, Default)]
pub struct MemoryListStore {
    entries: Arc<RwLock<BTreeMap<String, ListEntry>>>,
}

#[async_trait::async_trait]
impl ListStore for MemoryListStore {
    async fn contains(&self, domain: &str) -> Result<bool, StoreError> {
        Ok(self.entries.read().await.contains_key(&normalize(domain)))
    }

    async fn add(
        &self,
        domain: &str,
        source: Source,
        reason: Option<String>,
        category: Option<String>,
    ) -> Result<(), StoreError> {
        let domain = normalize(domain);
        self.entries.write().await.insert(
            domain.clone(),
            ListEntry {
                domain,
                added_at_ms: now_millis(),
                source,
                reason,
                category,
            },
        );
        Ok(())
    }

    async fn remove(&self, domain: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(&normalize(domain)).is_some())
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<ListEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| category.is_none_or(|want| entry.category.as_deref() == Some(want)))
            .cloned()
            .collect())
    }

    async fn import(&self, entries: Vec<ListEntry>) -> Result<usize, StoreError> {
        let count = entries.len();
        let mut store = self.entries.write().await;
        for entry in entries {
            store.insert(normalize(&entry.domain), entry);
        }
        Ok(count)
    }

    async fn export(&self) -> Result<Vec<ListEntry>, StoreError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// JSON snapshot file driver, mirroring `FileCacheStore`'s load/flush shape.
pub struct FileListStore {
    inner: MemoryListStore,
    path: PathBuf,
}

impl FileListStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: MemoryListStore::default(),
            path,
        }
    }

    pub async fn load(&self) -> Result<(), StoreError> {
        let Ok(bytes) = tokio::fs::read(&self.path).await else {
            return Ok(());
        };
        let entries: Vec<ListEntry> = serde_json::from_slice(&bytes)?;
        self.inner.import(entries).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let entries = self.inner.export().await?;
        let bytes = serde_json::to_vec(&entries)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ListStore for FileListStore {
    async fn contains(&self, domain: &str) -> Result<bool, StoreError> {
        self.inner.contains(domain).await
    }

    async fn add(
        &self,
        domain: &str,
        source: Source,
        reason: Option<String>,
        category: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.add(domain, source, reason, category).await?;
        self.flush().await
    }

    async fn remove(&self, domain: &str) -> Result<bool, StoreError> {
        let removed = self.inner.remove(domain).await?;
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<ListEntry>, StoreError> {
        self.inner.list(category).await
    }

    async fn import(&self, entries: Vec<ListEntry>) -> Result<usize, StoreError> {
        let count = self.inner.import(entries).await?;
        self.flush().await?;
        Ok(count)
    }

    async fn export(&self) -> Result<Vec<ListEntry>, StoreError> {
        self.inner.export().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await?;
        self.flush().await
    }
}

/// SQL driver for `dns_blacklist`/`dns_whitelist`, following
/// `repository/blocklist.rs::DatabaseBlocklistService`'s idempotent upsert
/// pattern (primary key on normalized domain).
pub struct SqlListStore {
    pool: sqlx::SqlitePool,
    table: &'static str,
}

impl SqlListStore {
    pub fn blacklist(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool,
            table: "dns_blacklist",
        }
    }

    pub fn whitelist(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool,
            table: "dns_whitelist",
        }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                domain TEXT PRIMARY KEY,
                addedAt INTEGER NOT NULL,
                source TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            self.table
        );
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct ListEntryData {
    reason: Option<String>,
    category: Option<String>,
}

fn source_to_str(source: Source) -> &'static str {
    match source {
        Source::Manual => "manual",
        Source::Import => "import",
        Source::Auto => "auto",
        Source::Api => "api",
    }
}

fn source_from_str(value: &str) -> Source {
    match value {
        "import" => Source::Import,
        "auto" => Source::Auto,
        "api" => Source::Api,
        _ => Source::Manual,
    }
}

#[async_trait::async_trait]
impl ListStore for SqlListStore {
    async fn contains(&self, domain: &str) -> Result<bool, StoreError> {
        let statement = format!("SELECT 1 FROM {} WHERE domain = ?", self.table);
        let row: Option<(i64,)> = sqlx::query_as(&statement)
            .bind(normalize(domain))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn add(
        &self,
        domain: &str,
        source: Source,
        reason: Option<String>,
        category: Option<String>,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(&ListEntryData { reason, category })?;
        let statement = format!(
            "INSERT INTO {0} (domain, addedAt, source, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(domain) DO UPDATE SET addedAt = excluded.addedAt,
                source = excluded.source, data = excluded.data",
            self.table
        );
        sqlx::query(&statement)
            .bind(normalize(domain))
            .bind(now_millis() as i64)
            .bind(source_to_str(source))
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove(&self, domain: &str) -> Result<bool, StoreError> {
        let statement = format!("DELETE FROM {} WHERE domain = ?", self.table);
        let result = sqlx::query(&statement)
            .bind(normalize(domain))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<ListEntry>, StoreError> {
        let statement = format!("SELECT domain, addedAt, source, data FROM {}", self.table);
        let rows: Vec<(String, i64, String, String)> =
            sqlx::query_as(&statement).fetch_all(&self.pool).await?;
        let mut entries = Vec::new();
        for (domain, added_at, source, data) in rows {
            let data: ListEntryData = serde_json::from_str(&data).unwrap_or_default();
            if category.is_none_or(|want| data.category.as_deref() == Some(want)) {
                entries.push(ListEntry {
                    domain,
                    added_at_ms: added_at as u128,
                    source: source_from_str(&source),
                    reason: data.reason,
                    category: data.category,
                });
            }
        }
        Ok(entries)
    }

    async fn import(&self, entries: Vec<ListEntry>) -> Result<usize, StoreError> {
        let count = entries.len();
        for entry in entries {
            self.add(&entry.domain, entry.source, entry.reason, entry.category)
                .await?;
        }
        Ok(count)
    }

    async fn export(&self) -> Result<Vec<ListEntry>, StoreError> {
        self.list(None).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let statement = format!("DELETE FROM {}", self.table);
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_upsert_and_refresh_added_at() {
        let store = MemoryListStore::default();
        store.add("Ads.Example", Source::Manual, None, None).await.unwrap();
        let first_added_at = store.list(None).await.unwrap()[0].added_at_ms;

        store
            .add("ads.example", Source::Manual, Some("tracker".into()), None)
            .await
            .unwrap();
        let entries = store.list(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].added_at_ms >= first_added_at);
        assert_eq!(entries[0].reason.as_deref(), Some("tracker"));
    }

    #[tokio::test]
    async fn should_normalize_domain_on_contains() {
        let store = MemoryListStore::default();
        store.add("  Example.COM  ", Source::Import, None, None).await.unwrap();
        assert!(store.contains("example.com").await.unwrap());
    }

    #[tokio::test]
    async fn should_filter_list_by_category() {
        let store = MemoryListStore::default();
        store
            .add("ads.example", Source::Manual, None, Some("ads".into()))
            .await
            .unwrap();
        store
            .add("tracker.example", Source::Manual, None, Some("tracking".into()))
            .await
            .unwrap();
        let ads_only = store.list(Some("ads")).await.unwrap();
        assert_eq!(ads_only.len(), 1);
        assert_eq!(ads_only[0].domain, "ads.example");
    }
}
