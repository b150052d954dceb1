//! Connection pool setup and schema migration for the SQL storage drivers.

use crate::store::cache::SqlCacheStore;
use crate::store::list::SqlListStore;
use crate::store::log::SqlLogStore;

pub type Pool = sqlx::sqlite::SqlitePool;
pub type Transaction<'t> = sqlx::Transaction<'t, sqlx::Sqlite>;
pub type Error = sqlx::Error;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_url")]
    url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { url: Self::default_url() }
    }
}

impl Config {
    fn default_url() -> String {
        String::from("sqlite::memory:")
    }

    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| Self::default_url()),
        }
    }

    pub async fn build(&self) -> Result<Pool, Error> {
        sqlx::sqlite::SqlitePoolOptions::new()
            .connect(&self.url)
            .await
    }
}

/// Creates every SQL driver's table if missing. Run once at `serve` and
/// `blocklist import` startup, ahead of any `SqlCacheStore`/`SqlListStore`/
/// `SqlLogStore` use against the same pool.
pub async fn migrate(pool: &Pool) -> Result<(), StoreMigrateError> {
    SqlCacheStore::new(pool.clone()).migrate().await?;
    SqlListStore::blacklist(pool.clone()).migrate().await?;
    SqlListStore::whitelist(pool.clone()).migrate().await?;
    SqlLogStore::new(pool.clone()).migrate().await?;
    Ok(())
}

#[derive(Debug)]
pub struct StoreMigrateError(crate::store::StoreError);

impl std::fmt::Display for StoreMigrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "migration failed: {:?}", self.0)
    }
}

impl std::error::Error for StoreMigrateError {}

impl From<crate::store::StoreError> for StoreMigrateError {
    fn from(value: crate::store::StoreError) -> Self {
        Self(value)
    }
}
