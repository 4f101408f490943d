//! Favorited funds with explicit per-group ordering.
//!
//! All mutations run against a copy of [`WatchlistState`]; the copy is
//! persisted and then swapped in under the write lock, so readers never see a
//! half-renumbered partition and a failed write leaves the previous state in
//! place.

mod groups;
mod model;

pub use groups::GroupSummary;
pub use model::{
    BatchDeleteOutcome, Group, GroupId, WatchlistItem, WatchlistSection, WatchlistState,
};

use crate::core::cache::KeyValueCollection;
use crate::core::{FundDataProvider, FundEstimate, ServiceError, ServiceResult};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const STATE_KEY: &[u8] = b"state";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateOutcome {
    pub fund_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<FundEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct WatchlistService {
    state: RwLock<WatchlistState>,
    collection: Arc<dyn KeyValueCollection>,
    provider: Arc<dyn FundDataProvider>,
}

impl WatchlistService {
    pub async fn load(
        collection: Arc<dyn KeyValueCollection>,
        provider: Arc<dyn FundDataProvider>,
    ) -> Result<Self> {
        let stored = collection
            .get(STATE_KEY)
            .await
            .context("Failed to read persisted watchlist")?;
        let state = match stored {
            Some(bytes) => serde_json::from_slice::<WatchlistState>(&bytes)
                .context("Failed to decode persisted watchlist")?,
            None => WatchlistState::default(),
        };
        debug!("Loaded watchlist with {} items", state.items.len());
        Ok(Self {
            state: RwLock::new(state),
            collection,
            provider,
        })
    }

    async fn persist(&self, state: &WatchlistState) -> ServiceResult<()> {
        let bytes = serde_json::to_vec(state)
            .context("Failed to encode watchlist")
            .map_err(ServiceError::storage)?;
        self.collection
            .put(STATE_KEY, &bytes, None)
            .await
            .map_err(ServiceError::storage)
    }

    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut WatchlistState) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let mut current = self.state.write().await;
        let mut next = current.clone();
        let output = op(&mut next)?;
        self.persist(&next).await?;
        *current = next;
        Ok(output)
    }

    pub async fn add(
        &self,
        fund_code: &str,
        fund_name: &str,
        fund_type: &str,
        group_id: Option<GroupId>,
    ) -> ServiceResult<WatchlistItem> {
        let item = self
            .mutate(|state| state.add(fund_code, fund_name, fund_type, group_id, Utc::now()))
            .await?;
        info!(fund_code = %item.fund_code, "Added fund to watchlist");
        Ok(item)
    }

    pub async fn remove(&self, fund_code: &str) -> ServiceResult<WatchlistItem> {
        self.mutate(|state| state.remove(fund_code)).await
    }

    pub async fn batch_delete(&self, fund_codes: &[String]) -> ServiceResult<Vec<BatchDeleteOutcome>> {
        self.mutate(|state| Ok(state.batch_delete(fund_codes))).await
    }

    pub async fn reorder(&self, fund_codes: &[String], group_id: Option<GroupId>) -> ServiceResult<()> {
        self.mutate(|state| state.reorder(fund_codes, group_id)).await
    }

    pub async fn move_to_group(
        &self,
        fund_code: &str,
        group_id: Option<GroupId>,
    ) -> ServiceResult<WatchlistItem> {
        self.mutate(|state| state.move_to_group(fund_code, group_id))
            .await
    }

    pub async fn check_membership(&self, fund_code: &str) -> bool {
        self.state.read().await.contains(fund_code)
    }

    pub async fn list(&self) -> Vec<WatchlistSection> {
        self.state.read().await.sections()
    }

    pub async fn list_groups(&self) -> Vec<GroupSummary> {
        self.state.read().await.group_summaries()
    }

    pub async fn create_group(&self, name: &str) -> ServiceResult<Group> {
        self.mutate(|state| state.create_group(name, Utc::now()))
            .await
    }

    pub async fn rename_group(&self, id: GroupId, name: &str) -> ServiceResult<Group> {
        self.mutate(|state| state.rename_group(id, name)).await
    }

    pub async fn delete_group(&self, id: GroupId) -> ServiceResult<Group> {
        let removed = self.mutate(|state| state.delete_group(id)).await?;
        info!(group_id = id, "Deleted watchlist group");
        Ok(removed)
    }

    pub async fn reorder_groups(&self, ids: &[GroupId]) -> ServiceResult<()> {
        self.mutate(|state| state.reorder_groups(ids)).await
    }

    /// Fetches realtime estimates for every watched fund. A failing fund is
    /// reported in its outcome and does not affect the others.
    pub async fn refresh_estimates(&self) -> Vec<EstimateOutcome> {
        let codes = self.state.read().await.fund_codes();
        let futures = codes.into_iter().map(|code| async move {
            match self.provider.fetch_estimate(&code).await {
                Ok(estimate) => EstimateOutcome {
                    fund_code: code,
                    estimate: Some(estimate),
                    error: None,
                },
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(fund_code = %code, error = %message, "Failed to refresh estimate");
                    EstimateOutcome {
                        fund_code: code,
                        estimate: None,
                        error: Some(message),
                    }
                }
            }
        });
        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FundListEntry, FundSnapshot, IndexQuote};
    use crate::store::memory::MemoryCollection;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct EstimateProvider;

    #[async_trait]
    impl FundDataProvider for EstimateProvider {
        async fn fetch_fund(&self, _: &str) -> Result<FundSnapshot> {
            Err(anyhow!("unused"))
        }

        async fn fetch_estimate(&self, fund_code: &str) -> Result<FundEstimate> {
            if fund_code == "BAD" {
                return Err(anyhow!("no estimate for {fund_code}"));
            }
            Ok(FundEstimate {
                fund_code: fund_code.to_string(),
                name: format!("Fund {fund_code}"),
                net_worth: Some(1.0),
                net_worth_date: Some("2024-01-31".to_string()),
                estimate_value: Some(1.01),
                estimate_change_pct: Some(1.0),
                estimate_time: Some("2024-02-01 15:00".to_string()),
            })
        }

        async fn fetch_fund_list(&self) -> Result<Vec<FundListEntry>> {
            Err(anyhow!("unused"))
        }

        async fn fetch_market_indices(&self) -> Result<Vec<IndexQuote>> {
            Err(anyhow!("unused"))
        }
    }

    /// Collection whose reads or writes fail once the matching flag is set.
    #[derive(Default)]
    struct FlakyCollection {
        inner: MemoryCollection,
        fail_reads: std::sync::atomic::AtomicBool,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl KeyValueCollection for FlakyCollection {
        async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(anyhow!("io error"));
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &[u8], value: &[u8], ttl: Option<std::time::Duration>) -> Result<()> {
            if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(anyhow!("disk full"));
            }
            self.inner.put(key, value, ttl).await
        }

        async fn remove(&self, key: &[u8]) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    async fn service() -> WatchlistService {
        WatchlistService::load(Arc::new(MemoryCollection::new()), Arc::new(EstimateProvider))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_state_survives_reload_from_collection() {
        let collection: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        let service = WatchlistService::load(Arc::clone(&collection), Arc::new(EstimateProvider))
            .await
            .unwrap();
        let group = service.create_group("Tech").await.unwrap();
        service.add("000001", "A", "股票型", Some(group.id)).await.unwrap();

        let reloaded = WatchlistService::load(collection, Arc::new(EstimateProvider))
            .await
            .unwrap();
        assert!(reloaded.check_membership("000001").await);
        let sections = reloaded.list().await;
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].items[0].fund_code, "000001");
    }

    #[tokio::test]
    async fn test_load_refuses_undecodable_state() {
        let collection = Arc::new(MemoryCollection::new());
        collection
            .put(STATE_KEY, b"{\"items\": 42}", None)
            .await
            .unwrap();

        let result = WatchlistService::load(collection.clone(), Arc::new(EstimateProvider)).await;
        assert!(result.is_err());
        // The stored bytes stay in place for inspection
        assert_eq!(
            collection.get(STATE_KEY).await.unwrap(),
            Some(b"{\"items\": 42}".to_vec())
        );
    }

    #[tokio::test]
    async fn test_load_fails_when_store_unreadable() {
        let collection = Arc::new(FlakyCollection::default());
        collection
            .fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = WatchlistService::load(collection, Arc::new(EstimateProvider))
            .await
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("io error"));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_state_untouched() {
        let collection = Arc::new(FlakyCollection::default());
        let service = WatchlistService::load(collection.clone(), Arc::new(EstimateProvider))
            .await
            .unwrap();
        for code in ["A", "B", "C"] {
            service.add(code, code, "", None).await.unwrap();
        }

        collection
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let result = service
            .reorder(&["C".to_string(), "A".to_string(), "B".to_string()], None)
            .await;
        assert!(matches!(result, Err(ServiceError::Storage(_))));

        let order: Vec<String> = service.list().await[0]
            .items
            .iter()
            .map(|i| i.fund_code.clone())
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_concurrent_reorders_never_leave_duplicate_positions() {
        let service = Arc::new(service().await);
        for code in ["A", "B", "C", "D"] {
            service.add(code, code, "", None).await.unwrap();
        }

        let orders = [["D", "C", "B", "A"], ["B", "A", "D", "C"], ["C", "D", "A", "B"]];
        let handles: Vec<_> = orders
            .iter()
            .map(|order| {
                let service = Arc::clone(&service);
                let order: Vec<String> = order.iter().map(|c| c.to_string()).collect();
                tokio::spawn(async move { service.reorder(&order, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut positions: Vec<u32> = service.list().await[0]
            .items
            .iter()
            .map(|i| i.position)
            .collect();
        positions.sort();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_refresh_estimates_reports_per_fund_outcome() {
        let service = service().await;
        service.add("000001", "A", "", None).await.unwrap();
        service.add("BAD", "B", "", None).await.unwrap();

        let outcomes = service.refresh_estimates().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].fund_code, "000001");
        assert!(outcomes[0].estimate.is_some());
        assert!(outcomes[1].estimate.is_none());
        assert!(outcomes[1].error.as_deref().unwrap().contains("no estimate"));
    }

    #[tokio::test]
    async fn test_duplicate_add_through_service() {
        let service = service().await;
        service.add("000001", "A", "", None).await.unwrap();
        assert!(matches!(
            service.add("000001", "A", "", None).await,
            Err(ServiceError::DuplicateKey(_))
        ));
        assert_eq!(service.list().await[0].items.len(), 1);
    }
}
