//! Log Store (C7): append-only record of requests, responses, server
//! errors and lifecycle events, with bounded retention and query filters.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::error::StoreError;

const DEFAULT_MAX_ENTRIES: usize = 50_000;

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Request {
        timestamp_ms: u128,
        client: Option<String>,
        domain: String,
        qtype: String,
    },
    Response {
        timestamp_ms: u128,
        domain: String,
        rcode: String,
        from_cache: bool,
        provider: Option<String>,
        latency_ms: u64,
    },
    Error {
        timestamp_ms: u128,
        message: String,
    },
    ServerEvent {
        timestamp_ms: u128,
        message: String,
    },
}

impl LogEntry {
    pub fn timestamp_ms(&self) -> u128 {
        match self {
            Self::Request { timestamp_ms, .. }
            | Self::Response { timestamp_ms, .. }
            | Self::Error { timestamp_ms, .. }
            | Self::ServerEvent { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    pub fn request(client: Option<String>, domain: String, qtype: String) -> Self {
        Self::Request {
            timestamp_ms: now_millis(),
            client,
            domain,
            qtype,
        }
    }

    pub fn response(
        domain: String,
        rcode: String,
        from_cache: bool,
        provider: Option<String>,
        latency_ms: u64,
    ) -> Self {
        Self::Response {
            timestamp_ms: now_millis(),
            domain,
            rcode,
            from_cache,
            provider,
            latency_ms,
        }
    }

    pub fn error(message: String) -> Self {
        Self::Error {
            timestamp_ms: now_millis(),
            message,
        }
    }

    pub fn server_event(message: String) -> Self {
        Self::ServerEvent {
            timestamp_ms: now_millis(),
            message,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogQuery {
    pub since_ms: Option<u128>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LogStats {
    pub total: usize,
    pub requests: usize,
    pub responses: usize,
    pub errors: usize,
    pub server_events: usize,
}

#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError>;
    async fn query(&self, query: LogQuery) -> Result<Vec<LogEntry>, StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
    /// Drops entries older than `older_than_ms`. Returns the count removed.
    async fn cleanup(&self, older_than_ms: u128) -> Result<usize, StoreError>;
    async fn stats(&self) -> Result<LogStats, StoreError>;
}

fn stats_of<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> LogStats {
    let mut stats = LogStats::default();
    for entry in entries {
        stats.total += 1;
        match entry {
            LogEntry::Request { .. } => stats.requests += 1,
            LogEntry::Response { .. } => stats.responses += 1,
            LogEntry::Error { .. } => stats.errors += 1,
            LogEntry::ServerEvent { .. } => stats.server_events += 1,
        }
    }
    stats
}

/// Bounded ring buffer, oldest entries dropped once `max_entries` is
/// exceeded, matching the cache engine's overflow behaviour rather than
/// growing unbounded.
#[derive(Debug)]
pub struct MemoryLogStore {
    entries: Arc<RwLock<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl MemoryLogStore {
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }
}

#[async_trait::async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        Ok(())
    }

    async fn query(&self, query: LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let entries = self.entries.read().await;
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .filter(|entry| query.since_ms.is_none_or(|since| entry.timestamp_ms() >= since))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let start = matched.len().saturating_sub(limit);
            matched = matched.split_off(start);
        }
        Ok(matched)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn cleanup(&self, older_than_ms: u128) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.timestamp_ms() >= older_than_ms);
        Ok(before - entries.len())
    }

    async fn stats(&self) -> Result<LogStats, StoreError> {
        Ok(stats_of(self.entries.read().await.iter()))
    }
}

/// Writes every entry to stdout via `tracing` instead of retaining it —
/// used when the operator wants logs in the process's own log stream
/// rather than queryable storage.
#[derive(Debug, Default)]
pub struct ConsoleLogStore;

#[async_trait::async_trait]
impl LogStore for ConsoleLogStore {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        match &entry {
            LogEntry::Request { domain, qtype, client, .. } => {
                tracing::info!(domain, qtype, client = client.as_deref(), "query");
            }
            LogEntry::Response { domain, rcode, from_cache, provider, latency_ms, .. } => {
                tracing::info!(
                    domain,
                    rcode,
                    from_cache,
                    provider = provider.as_deref(),
                    latency_ms,
                    "answered"
                );
            }
            LogEntry::Error { message, .. } => tracing::warn!(message, "resolver error"),
            LogEntry::ServerEvent { message, .. } => tracing::info!(message, "server event"),
        }
        Ok(())
    }

    async fn query(&self, _query: LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn cleanup(&self, _older_than_ms: u128) -> Result<usize, StoreError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<LogStats, StoreError> {
        Ok(LogStats::default())
    }
}

/// Newline-delimited JSON file driver: each `append` writes one line and
/// fsyncs the handle, so a crash loses at most the in-flight entry.
pub struct FileLogStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileLogStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<LogEntry>, StoreError> {
        let Ok(contents) = tokio::fs::read_to_string(&self.path).await else {
            return Ok(Vec::new());
        };
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[async_trait::async_trait]
impl LogStore for FileLogStore {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        use tokio::io::AsyncWriteExt;
        let _guard = self.lock.lock().await;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn query(&self, query: LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let entries = self.read_all().await?;
        let mut matched: Vec<LogEntry> = entries
            .into_iter()
            .filter(|entry| query.since_ms.is_none_or(|since| entry.timestamp_ms() >= since))
            .collect();
        if let Some(limit) = query.limit {
            let start = matched.len().saturating_sub(limit);
            matched = matched.split_off(start);
        }
        Ok(matched)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        tokio::fs::write(&self.path, b"").await?;
        Ok(())
    }

    async fn cleanup(&self, older_than_ms: u128) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let entries = self.read_all().await?;
        let before = entries.len();
        let kept: Vec<LogEntry> = entries
            .into_iter()
            .filter(|entry| entry.timestamp_ms() >= older_than_ms)
            .collect();
        let removed = before - kept.len();
        let mut body = String::new();
        for entry in &kept {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        tokio::fs::write(&self.path, body).await?;
        Ok(removed)
    }

    async fn stats(&self) -> Result<LogStats, StoreError> {
        Ok(stats_of(self.read_all().await?.iter()))
    }
}

/// SQL driver for the `dns_logs` table: one row per entry, `kind`
/// discriminates the tagged variant and `data` carries the rest as JSON,
/// the same split used for list-entry metadata in `store::list`.
pub struct SqlLogStore {
    pool: sqlx::SqlitePool,
}

impl SqlLogStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dns_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS dns_logs_timestamp ON dns_logs (timestamp)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn kind_of(entry: &LogEntry) -> &'static str {
        match entry {
            LogEntry::Request { .. } => "request",
            LogEntry::Response { .. } => "response",
            LogEntry::Error { .. } => "error",
            LogEntry::ServerEvent { .. } => "server_event",
        }
    }
}

#[async_trait::async_trait]
impl LogStore for SqlLogStore {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        let data = serde_json::to_string(&entry)?;
        sqlx::query("INSERT INTO dns_logs (timestamp, kind, data) VALUES (?, ?, ?)")
            .bind(entry.timestamp_ms() as i64)
            .bind(Self::kind_of(&entry))
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, query: LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let since = query.since_ms.unwrap_or(0) as i64;
        let limit = query.limit.unwrap_or(10_000) as i64;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT data FROM dns_logs WHERE timestamp >= ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut entries: Vec<LogEntry> = rows
            .into_iter()
            .filter_map(|(data,)| serde_json::from_str(&data).ok())
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dns_logs").execute(&self.pool).await?;
        Ok(())
    }

    async fn cleanup(&self, older_than_ms: u128) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM dns_logs WHERE timestamp < ?")
            .bind(older_than_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn stats(&self) -> Result<LogStats, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT kind FROM dns_logs")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = LogStats::default();
        for (kind,) in rows {
            stats.total += 1;
            match kind.as_str() {
                "request" => stats.requests += 1,
                "response" => stats.responses += 1,
                "error" => stats.errors += 1,
                "server_event" => stats.server_events += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_evict_oldest_beyond_capacity() {
        let store = MemoryLogStore::with_capacity(2);
        store.append(LogEntry::server_event("one".into())).await.unwrap();
        store.append(LogEntry::server_event("two".into())).await.unwrap();
        store.append(LogEntry::server_event("three".into())).await.unwrap();

        let entries = store.query(LogQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], LogEntry::ServerEvent { message, .. } if message == "two"));
    }

    #[tokio::test]
    async fn should_filter_by_since_and_limit() {
        let store = MemoryLogStore::default();
        for index in 0..5 {
            store
                .append(LogEntry::request(None, format!("host-{index}.example"), "A".into()))
                .await
                .unwrap();
        }
        let entries = store
            .query(LogQuery {
                since_ms: Some(0),
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn should_report_stats_by_kind() {
        let store = MemoryLogStore::default();
        store.append(LogEntry::request(None, "a.example".into(), "A".into())).await.unwrap();
        store
            .append(LogEntry::response("a.example".into(), "NOERROR".into(), false, None, 12))
            .await
            .unwrap();
        store.append(LogEntry::error("boom".into())).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.responses, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn should_cleanup_entries_older_than_cutoff() {
        let store = MemoryLogStore::default();
        store.append(LogEntry::ServerEvent { timestamp_ms: 100, message: "old".into() }).await.unwrap();
        store.append(LogEntry::ServerEvent { timestamp_ms: 9_000, message: "new".into() }).await.unwrap();

        let removed = store.cleanup(1_000).await.unwrap();
        assert_eq!(removed, 1);
        let remaining = store.query(LogQuery::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
