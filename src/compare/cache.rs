//! Per-key cache of computed artifacts with in-flight coalescing.
//!
//! Entries are kept in a [`KeyValueCollection`] past their validity so a
//! failed recompute can fall back to the last good payload. Concurrent misses
//! on the same key share one computation through a registry of
//! [`Shared`] futures; the computation removes its own registry entry when it
//! finishes, whether it succeeded or not.

use crate::core::cache::KeyValueCollection;
use crate::core::{ServiceError, ServiceResult};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Stored entries outlive their validity by this much to serve as fallback.
const RETENTION: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub payload: V,
    pub computed_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Set when a failed recompute fell back to this entry
    #[serde(default)]
    pub stale: bool,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }
}

/// How long a computed payload stays valid.
#[derive(Debug, Clone, Copy)]
pub enum Staleness {
    Ttl(Duration),
    /// Valid for `intraday` but never past midnight in `zone`
    SameDay { intraday: Duration, zone: FixedOffset },
}

impl Staleness {
    pub fn valid_until(&self, computed_at: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Staleness::Ttl(ttl) => computed_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Staleness::SameDay { intraday, zone } => {
                let local = computed_at.with_timezone(&zone);
                let end_of_day = local
                    .date_naive()
                    .succ_opt()
                    .and_then(|next| zone.from_local_datetime(&next.and_time(NaiveTime::MIN)).single())
                    .map(|t| t.with_timezone(&Utc));
                let intraday_end = computed_at
                    .checked_add_signed(intraday)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                end_of_day.map_or(intraday_end, |eod| eod.min(intraday_end))
            }
        }
    }
}

type SharedCompute<V> = Shared<BoxFuture<'static, Result<CacheEntry<V>, String>>>;

pub struct ComputeCache<V> {
    collection: Arc<dyn KeyValueCollection>,
    staleness: Staleness,
    in_flight: Arc<Mutex<HashMap<String, SharedCompute<V>>>>,
}

impl<V> ComputeCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(collection: Arc<dyn KeyValueCollection>, staleness: Staleness) -> Self {
        Self {
            collection,
            staleness,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Unreadable entries count as misses; the next computation replaces them.
    async fn stored(&self, key: &str) -> Option<CacheEntry<V>> {
        let bytes = match self.collection.get(key.as_bytes()).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!("Failed to read cache entry {}: {:#}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Builds the computation that produces, stores and returns a fresh entry.
    fn computation<F, Fut>(&self, key: &str, compute: F, register: bool) -> SharedCompute<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let key = key.to_string();
        let collection = Arc::clone(&self.collection);
        let in_flight = Arc::clone(&self.in_flight);
        let staleness = self.staleness;

        async move {
            let result = match compute().await {
                Ok(payload) => {
                    let computed_at = Utc::now();
                    let entry = CacheEntry {
                        key: key.clone(),
                        payload,
                        computed_at,
                        valid_until: staleness.valid_until(computed_at),
                        stale: false,
                    };
                    match serde_json::to_vec(&entry) {
                        Ok(bytes) => {
                            if let Err(e) = collection.put(key.as_bytes(), &bytes, Some(RETENTION)).await {
                                warn!("Failed to store cache entry {}: {:#}", key, e);
                            }
                        }
                        Err(e) => warn!("Failed to encode cache entry {}: {}", key, e),
                    }
                    Ok(entry)
                }
                Err(e) => Err(format!("{e:#}")),
            };
            if register {
                in_flight.lock().await.remove(&key);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Returns the entry for `key`, computing it when absent or stale.
    /// `force_refresh` skips the validity check and never joins another
    /// caller's computation.
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        force_refresh: bool,
        compute: F,
    ) -> ServiceResult<CacheEntry<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let mut previous = self.stored(key).await;
        if !force_refresh {
            if let Some(entry) = previous.as_ref().filter(|e| e.is_fresh(Utc::now())) {
                debug!("Cache hit for {}", key);
                return Ok(entry.clone());
            }
        }

        let pending = if force_refresh {
            debug!("Forced refresh for {}", key);
            self.computation(key, compute, false)
        } else {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(key) {
                Some(pending) => {
                    debug!("Joining in-flight computation for {}", key);
                    pending.clone()
                }
                None => {
                    // A computation stores its entry before leaving the
                    // registry, so one that finished since the first read is
                    // visible here.
                    previous = self.stored(key).await;
                    if let Some(entry) = previous.as_ref().filter(|e| e.is_fresh(Utc::now())) {
                        debug!("Cache hit for {} after recheck", key);
                        return Ok(entry.clone());
                    }
                    debug!("Cache miss for {}", key);
                    let pending = self.computation(key, compute, true);
                    in_flight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };

        match pending.await {
            Ok(entry) => Ok(entry),
            Err(message) => match previous {
                Some(mut stale) if !force_refresh => {
                    warn!("Serving stale entry for {} after failed refresh: {}", key, message);
                    stale.stale = true;
                    Ok(stale)
                }
                _ => Err(ServiceError::UpstreamFailure(message)),
            },
        }
    }
}
