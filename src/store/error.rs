use std::fmt::Display;

/// A storage driver call failed. Callers treat this as `StorageError` per
/// the error taxonomy: cache calls degrade to a miss, list calls fail open,
/// log calls are swallowed — never does a driver fault reach a DNS reply.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(sqlx::Error),
    Serde(serde_json::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "storage io error: {error}"),
            Self::Sql(error) => write!(f, "storage sql error: {error}"),
            Self::Serde(error) => write!(f, "storage serialization error: {error}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}
