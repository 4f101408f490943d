use crate::core::cache::KeyValueCollection;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fjall::PartitionHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Values are stored behind an 8 byte big-endian expiry header holding unix
/// seconds, zero meaning no expiry.
const HEADER_LEN: usize = 8;

pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }

    fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
        let expires_at = ttl
            .and_then(|d| SystemTime::now().checked_add(d))
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() + u64::from(d.subsec_nanos() > 0));
        let mut encoded = Vec::with_capacity(HEADER_LEN + value.len());
        encoded.extend_from_slice(&expires_at.to_be_bytes());
        encoded.extend_from_slice(value);
        encoded
    }

    fn decode(raw: &[u8]) -> Result<(Option<u64>, &[u8])> {
        let (header, value) = raw
            .split_at_checked(HEADER_LEN)
            .context("Stored value is shorter than its header")?;
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(header);
        let expires_at = u64::from_be_bytes(bytes);
        Ok(((expires_at != 0).then_some(expires_at), value))
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.partition.get(key)? else {
            debug!("Collection MISS for key: {}", String::from_utf8_lossy(key));
            return Ok(None);
        };
        let (expires_at, value) = Self::decode(&raw)?;
        if let Some(expires_at) = expires_at {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            if now >= expires_at {
                debug!(
                    "Collection entry expired for key: {}",
                    String::from_utf8_lossy(key)
                );
                self.partition.remove(key)?;
                return Ok(None);
            }
        }
        Ok(Some(value.to_vec()))
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(key).with_context(|| {
            format!(
                "Failed to read key {} from disk collection",
                String::from_utf8_lossy(key)
            )
        })
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.partition
            .insert(key, Self::encode(value, ttl))
            .context("Failed to write to disk collection")?;
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        self.partition
            .remove(key)
            .context("Failed to remove from disk collection")?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let keys = self
            .partition
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list disk collection keys")?;
        for key in keys {
            self.partition.remove(key)?;
        }
        debug!("Collection CLEAR");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjall::PartitionCreateOptions;
    use tempfile::tempdir;
    use tokio::time::sleep;

    fn open_collection(path: &std::path::Path) -> DiskCollection {
        let keyspace = fjall::Config::new(path).open().unwrap();
        let partition = keyspace
            .open_partition("test", PartitionCreateOptions::default())
            .unwrap();
        DiskCollection::new(partition)
    }

    #[tokio::test]
    async fn test_disk_collection_get_put() {
        let dir = tempdir().unwrap();
        let collection = open_collection(dir.path());

        assert!(collection.get(b"key1").await.unwrap().is_none());

        collection.put(b"key1", b"123", None).await.unwrap();
        assert_eq!(collection.get(b"key1").await.unwrap(), Some(b"123".to_vec()));
    }

    #[tokio::test]
    async fn test_disk_collection_ttl_expiration() {
        let dir = tempdir().unwrap();
        let collection = open_collection(dir.path());

        collection
            .put(b"key1", b"123", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(collection.get(b"key1").await.unwrap(), Some(b"123".to_vec()));

        sleep(Duration::from_millis(2100)).await;
        assert!(collection.get(b"key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_collection_remove_and_clear() {
        let dir = tempdir().unwrap();
        let collection = open_collection(dir.path());

        collection.put(b"key1", b"1", None).await.unwrap();
        collection.put(b"key2", b"2", None).await.unwrap();

        collection.remove(b"key1").await.unwrap();
        assert!(collection.get(b"key1").await.unwrap().is_none());

        collection.clear().await.unwrap();
        assert!(collection.get(b"key2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_collection_reports_corrupt_value() {
        let dir = tempdir().unwrap();
        let collection = open_collection(dir.path());

        collection.partition.insert(b"key1", [0u8, 1, 2]).unwrap();
        assert!(collection.get(b"key1").await.is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_value() {
        assert!(DiskCollection::decode(&[0, 1, 2]).is_err());
    }
}
