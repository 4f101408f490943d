use super::metrics::{RiskMetrics, compute_risk_metrics};
use super::ranking::{RankPercentiles, passes_4433, rank_cohort};
use crate::core::cache::KeyValueCollection;
use crate::core::{FundSnapshot, PeriodReturns};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

const RECORDS_KEY: &[u8] = b"records";
pub const UNKNOWN_FUND_TYPE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRecord {
    pub fund_code: String,
    pub fund_name: String,
    pub fund_type: String,
    pub returns: PeriodReturns,
    pub metrics: RiskMetrics,
    pub ranks: RankPercentiles,
    pub pass_4433: bool,
    pub updated_at: DateTime<Utc>,
}

impl ScreeningRecord {
    pub fn from_snapshot(
        snapshot: FundSnapshot,
        fund_type: Option<String>,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        let metrics = compute_risk_metrics(&snapshot.net_worth_trend, as_of).unwrap_or_default();
        ScreeningRecord {
            fund_code: snapshot.fund_code,
            fund_name: snapshot.fund_name,
            fund_type: fund_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNKNOWN_FUND_TYPE.to_string()),
            returns: snapshot.returns,
            metrics,
            ranks: RankPercentiles::default(),
            pass_4433: false,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCount {
    pub fund_type: String,
    pub count: usize,
}

/// Ranked records keyed by fund code. Writers lock a single shard, so a
/// running batch and single-fund refreshes never block each other for long.
/// Upserts share `rank_lock`; a ranking pass holds it exclusively so every
/// record of a cohort is ranked against the same returns.
pub struct ScreeningDataset {
    records: DashMap<String, ScreeningRecord>,
    rank_lock: RwLock<()>,
    collection: Arc<dyn KeyValueCollection>,
}

impl ScreeningDataset {
    pub async fn load(collection: Arc<dyn KeyValueCollection>) -> Result<Self> {
        let records = DashMap::new();
        let stored = collection
            .get(RECORDS_KEY)
            .await
            .context("Failed to read persisted screening records")?;
        if let Some(bytes) = stored {
            let stored: Vec<ScreeningRecord> = serde_json::from_slice(&bytes)
                .context("Failed to decode persisted screening records")?;
            for record in stored {
                records.insert(record.fund_code.clone(), record);
            }
        }
        debug!("Loaded {} screening records", records.len());
        Ok(Self {
            records,
            rank_lock: RwLock::new(()),
            collection,
        })
    }

    /// Inserts or replaces a record. Ranks of an existing record are carried
    /// over until the next ranking pass.
    pub fn upsert(&self, mut record: ScreeningRecord) {
        let _shared = self.rank_lock.read().unwrap_or_else(PoisonError::into_inner);
        match self.records.entry(record.fund_code.clone()) {
            Entry::Occupied(mut existing) => {
                record.ranks = existing.get().ranks.clone();
                record.pass_4433 = existing.get().pass_4433;
                existing.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    pub fn get(&self, fund_code: &str) -> Option<ScreeningRecord> {
        self.records.get(fund_code).map(|r| r.value().clone())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn snapshot(&self) -> Vec<ScreeningRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Recomputes ranks and the 4433 flag from stored returns, either for one
    /// cohort or for all of them. Returns the number of records touched.
    pub fn rerank(&self, only_type: Option<&str>) -> usize {
        let _exclusive = self.rank_lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut cohorts: HashMap<String, Vec<ScreeningRecord>> = HashMap::new();
        for record in self.snapshot() {
            if only_type.is_none_or(|t| t == record.fund_type) {
                cohorts.entry(record.fund_type.clone()).or_default().push(record);
            }
        }

        let mut touched = 0;
        for members in cohorts.values() {
            for (code, ranks) in rank_cohort(members) {
                if let Some(mut record) = self.records.get_mut(&code) {
                    record.pass_4433 = passes_4433(&ranks);
                    record.ranks = ranks;
                    touched += 1;
                }
            }
        }
        touched
    }

    /// Fund types with their record counts, largest first.
    pub fn type_counts(&self) -> Vec<TypeCount> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.records.iter() {
            *counts.entry(record.fund_type.clone()).or_default() += 1;
        }
        let mut counts: Vec<TypeCount> = counts
            .into_iter()
            .map(|(fund_type, count)| TypeCount { fund_type, count })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.fund_type.cmp(&b.fund_type)));
        counts
    }

    pub async fn persist(&self) -> Result<()> {
        let mut records = self.snapshot();
        records.sort_by(|a, b| a.fund_code.cmp(&b.fund_code));
        let bytes = serde_json::to_vec(&records).context("Failed to encode screening records")?;
        self.collection
            .put(RECORDS_KEY, &bytes, None)
            .await
            .context("Failed to persist screening records")?;
        debug!("Persisted {} screening records", records.len());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;

    pub(crate) fn record(code: &str, fund_type: &str, one_year: Option<f64>) -> ScreeningRecord {
        ScreeningRecord {
            fund_code: code.to_string(),
            fund_name: format!("Fund {code}"),
            fund_type: fund_type.to_string(),
            returns: PeriodReturns {
                one_year,
                ..Default::default()
            },
            metrics: RiskMetrics::default(),
            ranks: RankPercentiles::default(),
            pass_4433: false,
            updated_at: Utc::now(),
        }
    }

    async fn dataset() -> ScreeningDataset {
        ScreeningDataset::load(Arc::new(MemoryCollection::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rerank_is_scoped_to_cohorts() {
        let dataset = dataset().await;
        dataset.upsert(record("A", "股票型", Some(30.0)));
        dataset.upsert(record("B", "股票型", Some(10.0)));
        dataset.upsert(record("C", "债券型", Some(5.0)));
        dataset.upsert(record("D", "债券型", Some(1.0)));

        assert_eq!(dataset.rerank(Some("股票型")), 2);
        assert_eq!(dataset.get("A").unwrap().ranks.one_year, Some(50.0));
        assert_eq!(dataset.get("C").unwrap().ranks.one_year, None);

        assert_eq!(dataset.rerank(None), 4);
        assert_eq!(dataset.get("C").unwrap().ranks.one_year, Some(50.0));
        assert_eq!(dataset.get("D").unwrap().ranks.one_year, Some(100.0));
    }

    #[tokio::test]
    async fn test_rerank_is_idempotent() {
        let dataset = dataset().await;
        dataset.upsert(record("A", "x", Some(3.0)));
        dataset.upsert(record("B", "x", Some(2.0)));
        dataset.rerank(None);
        let first: Vec<_> = ["A", "B"].iter().map(|c| dataset.get(c).unwrap().ranks).collect();
        dataset.rerank(None);
        let second: Vec<_> = ["A", "B"].iter().map(|c| dataset.get(c).unwrap().ranks).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_upsert_carries_previous_ranks() {
        let dataset = dataset().await;
        dataset.upsert(record("A", "x", Some(3.0)));
        dataset.upsert(record("B", "x", Some(2.0)));
        dataset.rerank(None);

        dataset.upsert(record("A", "x", Some(1.0)));
        assert_eq!(dataset.get("A").unwrap().ranks.one_year, Some(50.0));
        assert_eq!(dataset.get("A").unwrap().returns.one_year, Some(1.0));
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_cohort_ranks_consistent() {
        let dataset = dataset().await;
        dataset.upsert(record("A", "x", Some(10.0)));
        dataset.upsert(record("B", "x", Some(5.0)));
        dataset.rerank(None);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..500 {
                    let one_year = if i % 2 == 0 { 20.0 } else { 5.0 };
                    dataset.upsert(record("B", "x", Some(one_year)));
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    dataset.rerank(None);
                }
            });
        });

        // Both ranks come from one pass: one fund is first, the other second
        let a = dataset.get("A").unwrap().ranks.one_year.unwrap();
        let b = dataset.get("B").unwrap().ranks.one_year.unwrap();
        assert_eq!(a + b, 150.0);
    }

    #[tokio::test]
    async fn test_type_counts_and_persistence() {
        let collection: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        let dataset = ScreeningDataset::load(Arc::clone(&collection)).await.unwrap();
        dataset.upsert(record("A", "股票型", Some(3.0)));
        dataset.upsert(record("B", "债券型", Some(2.0)));
        dataset.upsert(record("C", "债券型", Some(1.0)));
        dataset.persist().await.unwrap();

        let reloaded = ScreeningDataset::load(collection).await.unwrap();
        assert_eq!(reloaded.record_count(), 3);
        assert_eq!(
            reloaded.type_counts(),
            vec![
                TypeCount {
                    fund_type: "债券型".to_string(),
                    count: 2
                },
                TypeCount {
                    fund_type: "股票型".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_from_snapshot_defaults_missing_type() {
        let snapshot = FundSnapshot {
            fund_code: "000001".to_string(),
            fund_name: "Test".to_string(),
            returns: PeriodReturns::default(),
            net_worth_trend: Vec::new(),
        };
        let record = ScreeningRecord::from_snapshot(
            snapshot,
            None,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            Utc::now(),
        );
        assert_eq!(record.fund_type, UNKNOWN_FUND_TYPE);
        assert_eq!(record.metrics, RiskMetrics::default());
    }
}
