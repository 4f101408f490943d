//! Fund comparison data and the daily market snapshot, both served through
//! [`ComputeCache`], plus the last good fund detail kept for upstream outages.

pub mod cache;

pub use cache::{CacheEntry, ComputeCache, Staleness};

use crate::core::cache::KeyValueCollection;
use crate::core::config::CacheConfig;
use crate::core::fund::market_offset;
use crate::core::{
    FundDataProvider, FundSnapshot, IndexQuote, MainFlow, MarketBreadth, NavPoint, NorthFlow,
    PeriodReturns, SectorQuote, ServiceError, ServiceResult,
};
use crate::screening::metrics::{RiskMetrics, compute_risk_metrics};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const HOT_SECTOR_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareData {
    pub fund_code: String,
    pub fund_name: String,
    pub returns: PeriodReturns,
    pub metrics: RiskMetrics,
    /// Net worth over the last year of history
    pub net_worth_trend: Vec<NavPoint>,
}

/// Market overview for one trading day. Only the index quotes are required;
/// every other part is left empty when its source fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub date: NaiveDate,
    pub indices: Vec<IndexQuote>,
    #[serde(default)]
    pub north_flow: Option<NorthFlow>,
    #[serde(default)]
    pub main_flow: Option<MainFlow>,
    #[serde(default)]
    pub breadth: Option<MarketBreadth>,
    #[serde(default)]
    pub hot_sectors: Vec<SectorQuote>,
    /// Shanghai plus Shenzhen turnover in 100 million yuan
    #[serde(default)]
    pub total_amount: f64,
}

/// Total turnover of the two exchange composites, which lead the index list.
fn total_turnover(indices: &[IndexQuote]) -> f64 {
    let yuan: f64 = indices.iter().take(2).map(|q| q.amount).sum();
    (yuan / 1e8 * 100.0).round() / 100.0
}

fn degrade<T>(part: &str, result: anyhow::Result<T>) -> Option<T> {
    result
        .inspect_err(|e| warn!("Market {} unavailable: {:#}", part, e))
        .ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundDetail {
    #[serde(flatten)]
    pub snapshot: FundSnapshot,
    pub fetched_at: DateTime<Utc>,
    /// Set when the upstream failed and this is the last good copy
    #[serde(default)]
    pub stale: bool,
}

fn detail_key(fund_code: &str) -> String {
    format!("detail:{fund_code}")
}

pub fn market_key(date: NaiveDate) -> String {
    format!("market:{}", date.format("%Y-%m-%d"))
}

pub struct CompareService {
    provider: Arc<dyn FundDataProvider>,
    collection: Arc<dyn KeyValueCollection>,
    compare: ComputeCache<CompareData>,
    market: ComputeCache<MarketSnapshot>,
}

impl CompareService {
    pub fn new(
        provider: Arc<dyn FundDataProvider>,
        collection: Arc<dyn KeyValueCollection>,
        config: &CacheConfig,
    ) -> Self {
        let compare_ttl = Duration::from_std(config.compare_ttl()).unwrap_or(Duration::MAX);
        let market_ttl = Duration::from_std(config.market_ttl()).unwrap_or(Duration::MAX);
        Self {
            provider,
            compare: ComputeCache::new(Arc::clone(&collection), Staleness::Ttl(compare_ttl)),
            market: ComputeCache::new(
                Arc::clone(&collection),
                Staleness::SameDay {
                    intraday: market_ttl,
                    zone: market_offset(),
                },
            ),
            collection,
        }
    }

    /// Fetches a fund's detail and keeps it as the last good copy. When the
    /// upstream fails, the last good copy is returned marked stale.
    pub async fn fund_detail(&self, fund_code: &str) -> ServiceResult<FundDetail> {
        let key = detail_key(fund_code);
        let err = match self.provider.fetch_fund(fund_code).await {
            Ok(snapshot) => {
                let detail = FundDetail {
                    snapshot,
                    fetched_at: Utc::now(),
                    stale: false,
                };
                match serde_json::to_vec(&detail) {
                    Ok(bytes) => {
                        if let Err(e) = self.collection.put(key.as_bytes(), &bytes, None).await {
                            warn!("Failed to store detail of fund {}: {:#}", fund_code, e);
                        }
                    }
                    Err(e) => warn!("Failed to encode detail of fund {}: {}", fund_code, e),
                }
                return Ok(detail);
            }
            Err(e) => e,
        };

        match self.last_detail(&key).await {
            Some(mut detail) => {
                warn!(
                    "Serving detail of fund {} from {} after upstream failure: {:#}",
                    fund_code, detail.fetched_at, err
                );
                detail.stale = true;
                Ok(detail)
            }
            None => Err(ServiceError::upstream(err)),
        }
    }

    async fn last_detail(&self, key: &str) -> Option<FundDetail> {
        let bytes = match self.collection.get(key.as_bytes()).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!("Failed to read stored {}: {:#}", key, e);
                return None;
            }
        };
        serde_json::from_slice(&bytes)
            .inspect_err(|e| debug!("Discarding undecodable {}: {}", key, e))
            .ok()
    }

    pub async fn compare_data(
        &self,
        fund_code: &str,
        force_refresh: bool,
    ) -> ServiceResult<CacheEntry<CompareData>> {
        let provider = Arc::clone(&self.provider);
        let code = fund_code.to_string();
        self.compare
            .get(&format!("compare:{fund_code}"), force_refresh, move || async move {
                let snapshot = provider.fetch_fund(&code).await?;
                let as_of = Utc::now().with_timezone(&market_offset()).date_naive();
                let metrics = compute_risk_metrics(&snapshot.net_worth_trend, as_of).unwrap_or_default();
                let cutoff = snapshot
                    .net_worth_trend
                    .last()
                    .map(|p| p.date - Duration::days(365));
                let net_worth_trend = snapshot
                    .net_worth_trend
                    .into_iter()
                    .filter(|p| cutoff.is_none_or(|c| p.date >= c))
                    .collect();
                Ok(CompareData {
                    fund_code: snapshot.fund_code,
                    fund_name: snapshot.fund_name,
                    returns: snapshot.returns,
                    metrics,
                    net_worth_trend,
                })
            })
            .await
    }

    pub async fn daily_market(&self, force_refresh: bool) -> ServiceResult<CacheEntry<MarketSnapshot>> {
        let date = Utc::now().with_timezone(&market_offset()).date_naive();
        let provider = Arc::clone(&self.provider);
        self.market
            .get(&market_key(date), force_refresh, move || async move {
                let indices = provider.fetch_market_indices().await?;
                let (north_flow, main_flow, breadth, hot_sectors) = tokio::join!(
                    provider.fetch_north_flow(),
                    provider.fetch_main_flow(),
                    provider.fetch_market_breadth(),
                    provider.fetch_hot_sectors(HOT_SECTOR_COUNT),
                );
                Ok(MarketSnapshot {
                    date,
                    total_amount: total_turnover(&indices),
                    indices,
                    north_flow: degrade("north flow", north_flow),
                    main_flow: degrade("main flow", main_flow),
                    breadth: degrade("breadth", breadth),
                    hot_sectors: degrade("hot sectors", hot_sectors).unwrap_or_default(),
                })
            })
            .await
    }
}
