//! Storage abstractions. A [`Store`] hands out named collections of raw
//! key/value pairs; services serialize their own records on top.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    /// `Ok(None)` means the key is absent or expired. Read failures are
    /// errors so callers never mistake a broken store for an empty one.
    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> anyhow::Result<()>;

    async fn remove(&self, key: &[u8]) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

pub trait Store: Send + Sync {
    /// Returns the named collection. `persist` selects the disk backend when
    /// one is configured.
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>>;
}
