pub mod disk;
pub mod memory;

use crate::core::cache::{KeyValueCollection, Store};
use crate::core::config::AppConfig;
use anyhow::{Context, Result};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

/// A thread-safe key-value store that can hold multiple collections.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Arc<Keyspace>>,
}

impl KeyValueStore {
    /// Store without a disk backend. Persistent collections are unavailable.
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    pub fn open_at(path: &std::path::Path) -> Result<Self> {
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open data store at {}", path.display()))?;
        debug!("Opened data store at {}", path.display());
        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(Arc::new(keyspace)),
        })
    }

    pub fn new(config: &AppConfig) -> Result<Self> {
        if !config.persist {
            return Ok(Self::in_memory());
        }
        let path = config.default_data_path()?.join("store");
        Self::open_at(&path)
    }

    /// Fetches a collection, creating it when needed and reporting which
    /// backend could not be opened.
    pub fn collection(&self, name: &str, persist: bool) -> Result<Arc<dyn KeyValueCollection>> {
        self.get_collection(name, persist, true)
            .with_context(|| format!("Collection '{name}' is not available"))
    }
}

impl Store for KeyValueStore {
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>> {
        if let Some(existing) = self
            .collections
            .read()
            .ok()
            .and_then(|collections| collections.get(name).cloned())
        {
            return Some(existing);
        }
        if !create_if_missing {
            return None;
        }

        let mut collections = self.collections.write().ok()?;
        if let Some(existing) = collections.get(name) {
            return Some(Arc::clone(existing));
        }
        let new_collection: Arc<dyn KeyValueCollection> = if persist {
            let keyspace = self.keyspace.as_ref()?;
            match keyspace.open_partition(name, PartitionCreateOptions::default()) {
                Ok(partition) => Arc::new(DiskCollection::new(partition)),
                Err(e) => {
                    warn!("Failed to open partition {}: {}", name, e);
                    return None;
                }
            }
        } else {
            Arc::new(MemoryCollection::new())
        };
        collections.insert(name.to_string(), Arc::clone(&new_collection));
        Some(new_collection)
    }
}
