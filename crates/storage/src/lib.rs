use std::fmt::Display;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Key prefix under which offline tasks are cached.
pub const OFFLINE_TASK_PREFIX: &str = "mobile.offline";

/// Member stamped into stored objects so a record knows its own key.
pub const KEY_MEMBER: &str = "_key";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} is mandatory")]
    MissingArgument(&'static str),
    #[error("storage database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored value is not valid json: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("failed to create parent directory '{path}' for database url '{database_url}': {source}")]
    ParentDir {
        path: String,
        database_url: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Asynchronous key/value store.
///
/// Every operation is async even for media that answer synchronously, so a
/// remote-backed store can be swapped in without touching callers.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert(&self, key: &str, value: Value) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn contains(&self, key: &str) -> Result<bool>;
    /// Returns every stored value whose key starts with `prefix` (all values
    /// when `prefix` is `None`), ordered by key.
    async fn get_all(&self, prefix: Option<&str>) -> Result<Vec<Value>>;
}

/// Builds `prefix:caseId|persistencyId`, or `caseId|persistencyId` without a
/// prefix.
pub fn compose_key<C, P>(
    prefix: Option<&str>,
    case_id: Option<C>,
    persistency_id: Option<P>,
) -> Result<String>
where
    C: Display,
    P: Display,
{
    let case_id = case_id.ok_or(StorageError::MissingArgument("case id"))?;
    let persistency_id = persistency_id.ok_or(StorageError::MissingArgument("persistency id"))?;
    Ok(match prefix {
        Some(prefix) => format!("{prefix}:{case_id}|{persistency_id}"),
        None => format!("{case_id}|{persistency_id}"),
    })
}

fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::MissingArgument("key"));
    }
    Ok(())
}

fn stamp_key(key: &str, mut value: Value) -> Value {
    if let Value::Object(members) = &mut value {
        members.insert(KEY_MEMBER.to_string(), Value::String(key.to_string()));
    }
    value
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
