use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{require_key, stamp_key, Result, Storage};

/// In-process store holding serialized JSON strings, like a browser's
/// local storage.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert(&self, key: &str, value: Value) -> Result<()> {
        require_key(key)?;
        let encoded = serde_json::to_string(&stamp_key(key, value))?;
        self.items.write().await.insert(key.to_string(), encoded);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        require_key(key)?;
        let guard = self.items.read().await;
        match guard.get(key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        require_key(key)?;
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        require_key(key)?;
        Ok(self.items.read().await.contains_key(key))
    }

    async fn get_all(&self, prefix: Option<&str>) -> Result<Vec<Value>> {
        let guard = self.items.read().await;
        guard
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |prefix| key.starts_with(prefix)))
            .map(|(_, raw)| -> Result<Value> { Ok(serde_json::from_str(raw)?) })
            .collect()
    }
}
