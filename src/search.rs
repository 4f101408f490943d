//! Local copy of the upstream fund list with keyword search.

use crate::core::cache::KeyValueCollection;
use crate::core::{FundDataProvider, FundListEntry, ServiceError, ServiceResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
const INDEX_KEY: &[u8] = b"fund_list";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedIndex {
    funds: Vec<FundListEntry>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub fund: FundListEntry,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub has_cache: bool,
}

pub struct FundSearchIndex {
    provider: Arc<dyn FundDataProvider>,
    collection: Arc<dyn KeyValueCollection>,
    state: RwLock<PersistedIndex>,
    rebuild_lock: Mutex<()>,
}

/// Scores a fund against an already trimmed keyword. The strongest matching
/// field wins.
fn score(fund: &FundListEntry, keyword: &str, keyword_upper: &str) -> Option<u32> {
    if fund.code.starts_with(keyword) {
        Some(100)
    } else if fund.name.contains(keyword) {
        Some(80)
    } else if fund.abbreviation.to_uppercase().contains(keyword_upper) {
        Some(60)
    } else if fund.pinyin.to_uppercase().contains(keyword_upper) {
        Some(40)
    } else {
        None
    }
}

impl FundSearchIndex {
    /// Opens the index, restoring the last persisted fund list if any.
    pub async fn load(
        provider: Arc<dyn FundDataProvider>,
        collection: Arc<dyn KeyValueCollection>,
    ) -> Result<Self> {
        let stored = collection
            .get(INDEX_KEY)
            .await
            .context("Failed to read persisted fund list")?;
        let state = match stored {
            Some(bytes) => serde_json::from_slice::<PersistedIndex>(&bytes)
                .context("Failed to decode persisted fund list")?,
            None => PersistedIndex::default(),
        };
        debug!("Loaded search index with {} funds", state.funds.len());
        Ok(Self {
            provider,
            collection,
            state: RwLock::new(state),
            rebuild_lock: Mutex::new(()),
        })
    }

    pub async fn search(&self, keyword: &str, limit: usize) -> ServiceResult<Vec<SearchHit>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(ServiceError::InvalidInput(
                "search keyword must not be empty".to_string(),
            ));
        }
        let keyword_upper = keyword.to_uppercase();

        let state = self.state.read().await;
        let mut hits: Vec<SearchHit> = state
            .funds
            .iter()
            .filter_map(|fund| {
                score(fund, keyword, &keyword_upper).map(|score| SearchHit {
                    fund: fund.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.fund.code.cmp(&b.fund.code)));
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn status(&self) -> IndexStatus {
        let state = self.state.read().await;
        IndexStatus {
            count: state.funds.len(),
            last_update: state.last_update,
            has_cache: !state.funds.is_empty(),
        }
    }

    /// Replaces the index with a fresh upstream copy. Concurrent rebuilds run
    /// one after the other.
    pub async fn rebuild(&self) -> ServiceResult<IndexStatus> {
        let _guard = self.rebuild_lock.lock().await;
        info!("Rebuilding fund search index");

        let funds = self
            .provider
            .fetch_fund_list()
            .await
            .map_err(ServiceError::upstream)?;
        let next = PersistedIndex {
            funds,
            last_update: Some(Utc::now()),
        };

        let bytes = serde_json::to_vec(&next)
            .context("Failed to encode fund list")
            .map_err(ServiceError::storage)?;
        self.collection
            .put(INDEX_KEY, &bytes, None)
            .await
            .map_err(ServiceError::storage)?;

        let mut state = self.state.write().await;
        *state = next;
        info!("Search index rebuilt with {} funds", state.funds.len());
        Ok(IndexStatus {
            count: state.funds.len(),
            last_update: state.last_update,
            has_cache: !state.funds.is_empty(),
        })
    }

    /// Rebuilds only when nothing has been fetched yet.
    pub async fn ensure_populated(&self) -> ServiceResult<()> {
        if self.state.read().await.funds.is_empty() {
            self.rebuild().await?;
        }
        Ok(())
    }

    pub async fn lookup(&self, code: &str) -> Option<FundListEntry> {
        self.state
            .read()
            .await
            .funds
            .iter()
            .find(|fund| fund.code == code)
            .cloned()
    }

    /// Funds whose type matches any of `fund_types`, or every fund when no
    /// filter is given. Matching is by substring so `混合型` selects all
    /// hybrid sub-types.
    pub async fn entries(&self, fund_types: Option<&[String]>) -> Vec<FundListEntry> {
        let state = self.state.read().await;
        state
            .funds
            .iter()
            .filter(|fund| {
                fund_types.is_none_or(|types| {
                    types.is_empty() || types.iter().any(|t| fund.fund_type.contains(t.as_str()))
                })
            })
            .cloned()
            .collect()
    }
}
