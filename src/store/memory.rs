use crate::core::cache::KeyValueCollection;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory collection backed by a HashMap
#[derive(Clone, Default)]
pub struct MemoryCollection {
    inner: Arc<Mutex<HashMap<Vec<u8>, StoredValue>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let mut entries = self.inner.lock().await;
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| at <= Instant::now()),
            None => {
                debug!("Collection MISS for key: {}", String::from_utf8_lossy(key));
                return Ok(None);
            }
        };
        if expired {
            debug!(
                "Collection entry expired for key: {}",
                String::from_utf8_lossy(key)
            );
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires_at = ttl.map(|duration| Instant::now() + duration);
        let mut entries = self.inner.lock().await;
        entries.insert(
            key.to_vec(),
            StoredValue {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> anyhow::Result<()> {
        self.inner.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.inner.lock().await.clear();
        debug!("Collection CLEAR");
        Ok(())
    }
}
