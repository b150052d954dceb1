//! Cache Engine (C5): fingerprint → response map with per-entry TTL, LRU
//! eviction, access counting, and a hot-swappable driver.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use shieldns_wire::{DnsClass, DnsPacket, QueryType, ResponseCode};
use tokio::sync::{Mutex, RwLock};

use super::error::StoreError;

pub const DEFAULT_MIN_TTL: u32 = 10;
pub const DEFAULT_MAX_TTL: u32 = 86_400;
pub const DEFAULT_NEGATIVE_TTL: u32 = 300;
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// `lower(name) + "|" + type + "|" + class`, the cache's storage key.
pub fn fingerprint(name: &str, qtype: QueryType, qclass: DnsClass) -> String {
    format!("{}|{}|{}", name.to_lowercase(), qtype.into_num(), qclass as u16)
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: Option<String>,
    pub upstream_latency_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub packet: DnsPacket,
    pub ttl: u32,
    pub inserted_at_ms: u128,
    pub access_count: u64,
    pub last_accessed_at_ms: u128,
    pub provenance: Provenance,
}

impl CachedResponse {
    fn expired(&self, now_ms: u128) -> bool {
        now_ms >= self.inserted_at_ms + (self.ttl as u128) * 1000
    }

    /// TTL as it should be surfaced to a client on a cache hit: the original
    /// minus elapsed age, floored at zero.
    pub fn remaining_ttl(&self, now_ms: u128) -> u32 {
        let elapsed_secs = ((now_ms.saturating_sub(self.inserted_at_ms)) / 1000) as u32;
        self.ttl.saturating_sub(elapsed_secs)
    }
}

/// Computes the TTL to store a response under, given the spec's clamping
/// and negative-caching rules. Returns `None` if the response must never be
/// cached (truncated, or an RCODE other than NOERROR/NXDOMAIN).
pub fn cacheable_ttl(packet: &DnsPacket) -> Option<u32> {
    if packet.header.truncated_message {
        return None;
    }
    match packet.header.response_code {
        ResponseCode::NoError => {
            let min_answer_ttl = packet.answers.iter().map(|r| r.ttl()).min().unwrap_or(DEFAULT_MIN_TTL);
            Some(min_answer_ttl.clamp(DEFAULT_MIN_TTL, DEFAULT_MAX_TTL))
        }
        ResponseCode::NameError => Some(DEFAULT_NEGATIVE_TTL),
        _ => None,
    }
}

#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedResponse>, StoreError>;
    async fn set(
        &self,
        fingerprint: String,
        packet: DnsPacket,
        ttl: u32,
        provenance: Provenance,
    ) -> Result<(), StoreError>;
    async fn delete(&self, fingerprint: &str) -> Result<bool, StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
    async fn size(&self) -> Result<usize, StoreError>;
    async fn evict_expired(&self) -> Result<usize, StoreError>;
}

/// Bounded concurrent map, LRU-evicting when `max_entries` is exceeded.
/// Grounded on `MemoryCacheService`'s use of `moka::future::Cache`, but
/// tracks access metadata itself so expiry/TTL math follows the spec's
/// explicit `now >= insertedAt + ttl*1000` rule rather than moka's own.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, CachedResponse>>>,
    max_entries: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            max_entries: max_entries as usize,
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedResponse>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = now_millis();
        let Some(entry) = entries.get_mut(fingerprint) else {
            return Ok(None);
        };
        if entry.expired(now) {
            entries.remove(fingerprint);
            return Ok(None);
        }
        entry.access_count += 1;
        entry.last_accessed_at_ms = now;
        Ok(Some(entry.clone()))
    }

    async fn set(
        &self,
        fingerprint: String,
        packet: DnsPacket,
        ttl: u32,
        provenance: Provenance,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let now = now_millis();
        entries.insert(
            fingerprint,
            CachedResponse {
                packet,
                ttl,
                inserted_at_ms: now,
                access_count: 0,
                last_accessed_at_ms: now,
                provenance,
            },
        );
        if entries.len() > self.max_entries {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at_ms)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&lru_key);
            }
        }
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.remove(fingerprint).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    async fn size(&self) -> Result<usize, StoreError> {
        Ok(self.entries.lock().await.len())
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = now_millis();
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired(now));
        Ok(before - entries.len())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct PersistedEntry {
    fingerprint: String,
    wire: Vec<u8>,
    ttl: u32,
    inserted_at_ms: u128,
    access_count: u64,
    last_accessed_at_ms: u128,
    provenance: Provenance,
}

/// Snapshots the in-memory map to a JSON file with a debounced flush,
/// loading it back on startup. No teacher precedent; shaped directly from
/// spec §4.2's file-driver contract.
pub struct FileCacheStore {
    inner: MemoryCacheStore,
    path: PathBuf,
    dirty: Arc<RwLock<bool>>,
}

impl FileCacheStore {
    pub fn new(path: PathBuf, max_entries: u64) -> Self {
        Self {
            inner: MemoryCacheStore::new(max_entries),
            path,
            dirty: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn load(&self) -> Result<(), StoreError> {
        let Ok(bytes) = tokio::fs::read(&self.path).await else {
            return Ok(());
        };
        let persisted: Vec<PersistedEntry> = serde_json::from_slice(&bytes)?;
        let mut entries = self.inner.entries.lock().await;
        for item in persisted {
            if let Ok(packet) = DnsPacket::try_from(item.wire.as_slice()) {
                entries.insert(
                    item.fingerprint,
                    CachedResponse {
                        packet,
                        ttl: item.ttl,
                        inserted_at_ms: item.inserted_at_ms,
                        access_count: item.access_count,
                        last_accessed_at_ms: item.last_accessed_at_ms,
                        provenance: item.provenance,
                    },
                );
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let entries = self.inner.entries.lock().await;
        let persisted: Vec<PersistedEntry> = entries
            .iter()
            .filter_map(|(fingerprint, entry)| {
                let wire = entry.packet.create_buffer().ok()?.as_slice().to_vec();
                Some(PersistedEntry {
                    fingerprint: fingerprint.clone(),
                    wire,
                    ttl: entry.ttl,
                    inserted_at_ms: entry.inserted_at_ms,
                    access_count: entry.access_count,
                    last_accessed_at_ms: entry.last_accessed_at_ms,
                    provenance: entry.provenance.clone(),
                })
            })
            .collect();
        drop(entries);
        let bytes = serde_json::to_vec(&persisted)?;
        tokio::fs::write(&self.path, bytes).await?;
        *self.dirty.write().await = false;
        Ok(())
    }

    async fn mark_dirty_and_debounce(&self) {
        *self.dirty.write().await = true;
        tokio::time::sleep(Duration::from_millis(500)).await;
        if *self.dirty.read().await {
            let _ = self.flush().await;
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedResponse>, StoreError> {
        self.inner.get(fingerprint).await
    }

    async fn set(
        &self,
        fingerprint: String,
        packet: DnsPacket,
        ttl: u32,
        provenance: Provenance,
    ) -> Result<(), StoreError> {
        self.inner.set(fingerprint, packet, ttl, provenance).await?;
        self.mark_dirty_and_debounce().await;
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let removed = self.inner.delete(fingerprint).await?;
        if removed {
            self.mark_dirty_and_debounce().await;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await?;
        self.flush().await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }

    async fn size(&self) -> Result<usize, StoreError> {
        self.inner.size().await
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        let count = self.inner.evict_expired().await?;
        if count > 0 {
            self.flush().await?;
        }
        Ok(count)
    }
}

/// Embedded SQLite driver, grounded on `service/database.rs`'s pool setup
/// and `repository/blocklist.rs`'s idempotent-upsert style.
pub struct SqlCacheStore {
    pool: sqlx::SqlitePool,
}

impl SqlCacheStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dns_cache (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                ttl INTEGER NOT NULL,
                createdAt INTEGER NOT NULL,
                accessCount INTEGER NOT NULL DEFAULT 0,
                lastAccessed INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for SqlCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedResponse>, StoreError> {
        let row = sqlx::query_as::<_, (Vec<u8>, i64, i64, i64, i64)>(
            "SELECT value, ttl, createdAt, accessCount, lastAccessed FROM dns_cache WHERE key = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        let Some((value, ttl, created_at, access_count, last_accessed)) = row else {
            return Ok(None);
        };
        let now = now_millis() as i64;
        if now >= created_at + ttl * 1000 {
            sqlx::query("DELETE FROM dns_cache WHERE key = ?")
                .bind(fingerprint)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }
        let Ok(packet) = DnsPacket::try_from(value.as_slice()) else {
            return Ok(None);
        };
        sqlx::query("UPDATE dns_cache SET accessCount = accessCount + 1, lastAccessed = ? WHERE key = ?")
            .bind(now)
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(Some(CachedResponse {
            packet,
            ttl: ttl as u32,
            inserted_at_ms: created_at as u128,
            access_count: (access_count + 1) as u64,
            last_accessed_at_ms: now as u128,
            provenance: Provenance {
                provider: None,
                upstream_latency_ms: None,
            },
        }))
    }

    async fn set(
        &self,
        fingerprint: String,
        packet: DnsPacket,
        ttl: u32,
        _provenance: Provenance,
    ) -> Result<(), StoreError> {
        let wire = packet
            .create_buffer()
            .map_err(|error| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())))?
            .as_slice()
            .to_vec();
        let now = now_millis() as i64;
        sqlx::query(
            "INSERT INTO dns_cache (key, value, ttl, createdAt, accessCount, lastAccessed)
             VALUES (?, ?, ?, ?, 0, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, ttl = excluded.ttl,
                createdAt = excluded.createdAt, accessCount = 0, lastAccessed = excluded.lastAccessed",
        )
        .bind(&fingerprint)
        .bind(wire)
        .bind(ttl as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM dns_cache WHERE key = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dns_cache").execute(&self.pool).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM dns_cache")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn size(&self) -> Result<usize, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dns_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = now_millis() as i64;
        let result = sqlx::query("DELETE FROM dns_cache WHERE createdAt + ttl * 1000 <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shieldns_wire::{Header, Question, Record};
    use std::net::Ipv4Addr;

    fn sample_packet() -> DnsPacket {
        let mut packet = DnsPacket::new(Header::question(1));
        packet
            .questions
            .push(Question::new("example.com".into(), QueryType::A));
        packet.answers.push(Record::A {
            domain: "example.com".into(),
            addr: Ipv4Addr::new(1, 2, 3, 4),
            ttl: 60,
        });
        packet
    }

    #[tokio::test]
    async fn should_persist_and_return() {
        let store = MemoryCacheStore::default();
        let fp = fingerprint("Example.com", QueryType::A, DnsClass::Internet);
        store
            .set(
                fp.clone(),
                sample_packet(),
                60,
                Provenance {
                    provider: Some("cloudflare".into()),
                    upstream_latency_ms: Some(12),
                },
            )
            .await
            .unwrap();
        let found = store.get(&fp).await.unwrap().expect("should be cached");
        assert_eq!(found.access_count, 1);
    }

    #[tokio::test]
    async fn should_not_return_if_outdated() {
        let store = MemoryCacheStore::default();
        let fp = fingerprint("example.com", QueryType::A, DnsClass::Internet);
        {
            let mut entries = store.entries.lock().await;
            entries.insert(
                fp.clone(),
                CachedResponse {
                    packet: sample_packet(),
                    ttl: 1,
                    inserted_at_ms: 0,
                    access_count: 0,
                    last_accessed_at_ms: 0,
                    provenance: Provenance {
                        provider: None,
                        upstream_latency_ms: None,
                    },
                },
            );
        }
        assert!(store.get(&fp).await.unwrap().is_none());
    }

    #[test]
    fn cacheable_ttl_clamps_and_rejects() {
        let mut packet = sample_packet();
        assert_eq!(cacheable_ttl(&packet), Some(60));

        packet.header.truncated_message = true;
        assert_eq!(cacheable_ttl(&packet), None);
    }

    #[test]
    fn cacheable_ttl_caps_negative_caching() {
        let mut packet = sample_packet();
        packet.header.truncated_message = false;
        packet.header.response_code = ResponseCode::NameError;
        assert_eq!(cacheable_ttl(&packet), Some(DEFAULT_NEGATIVE_TTL));
    }

    #[tokio::test]
    async fn should_evict_lru_beyond_capacity() {
        let store = MemoryCacheStore::new(1);
        store
            .set(
                "a".into(),
                sample_packet(),
                60,
                Provenance {
                    provider: None,
                    upstream_latency_ms: None,
                },
            )
            .await
            .unwrap();
        store
            .set(
                "b".into(),
                sample_packet(),
                60,
                Provenance {
                    provider: None,
                    upstream_latency_ms: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.size().await.unwrap(), 1);
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
    }
}
