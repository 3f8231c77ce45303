//! In-memory storage backend

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StorageResult};

/// In-memory storage backend
///
/// Keys live in a sorted map so prefix scans are range queries rather than
/// full iterations.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no keys
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let entries = self.entries.read().await;
        let keys = entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStorage::new();
        store.set("a", b"1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // Deleting an absent key is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn scan_prefix_is_sorted_and_bounded() {
        let store = MemoryStorage::new();
        store.set("sessions:b", b"").await.unwrap();
        store.set("sessions:a", b"").await.unwrap();
        store.set("idx:sessions:template:t:a", b"").await.unwrap();
        store.set("messages:a", b"").await.unwrap();

        let keys = store.scan_prefix("sessions:").await.unwrap();
        assert_eq!(keys, vec!["sessions:a", "sessions:b"]);

        let keys = store.scan_prefix("idx:").await.unwrap();
        assert_eq!(keys, vec!["idx:sessions:template:t:a"]);
    }
}
