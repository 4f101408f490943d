use super::dataset::ScreeningRecord;
use crate::core::ReturnPeriod;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortField {
    #[default]
    #[serde(rename = "rank_1y")]
    Rank1y,
    #[serde(rename = "rank_3m")]
    Rank3m,
    #[serde(rename = "rank_6m")]
    Rank6m,
    #[serde(rename = "rank_3y")]
    Rank3y,
    #[serde(rename = "return_1m")]
    Return1m,
    #[serde(rename = "return_3m")]
    Return3m,
    #[serde(rename = "return_6m")]
    Return6m,
    #[serde(rename = "return_1y")]
    Return1y,
    #[serde(rename = "return_3y")]
    Return3y,
    #[serde(rename = "sharpe_1y")]
    Sharpe1y,
    #[serde(rename = "max_drawdown_1y")]
    MaxDrawdown1y,
    #[serde(rename = "calmar_1y")]
    Calmar1y,
}

impl SortField {
    fn value(self, record: &ScreeningRecord) -> Option<f64> {
        match self {
            SortField::Rank1y => record.ranks.one_year,
            SortField::Rank3m => record.ranks.three_months,
            SortField::Rank6m => record.ranks.six_months,
            SortField::Rank3y => record.ranks.three_years,
            SortField::Return1m => record.returns.one_month,
            SortField::Return3m => record.returns.three_months,
            SortField::Return6m => record.returns.six_months,
            SortField::Return1y => record.returns.one_year,
            SortField::Return3y => record.returns.three_years,
            SortField::Sharpe1y => record.metrics.sharpe_ratio_1y,
            SortField::MaxDrawdown1y => record.metrics.max_drawdown_1y,
            SortField::Calmar1y => record.metrics.calmar_ratio_1y,
        }
    }

    /// Ranks and drawdowns are better when small.
    fn ascending(self) -> bool {
        matches!(
            self,
            SortField::Rank1y
                | SortField::Rank3m
                | SortField::Rank6m
                | SortField::Rank3y
                | SortField::MaxDrawdown1y
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningQuery {
    pub fund_types: Vec<String>,
    /// Upper bound on the rank percentile per period
    pub max_rank: BTreeMap<ReturnPeriod, f64>,
    pub pass_4433: Option<bool>,
    pub min_sharpe_1y: Option<f64>,
    pub max_drawdown_1y: Option<f64>,
    pub sort_by: SortField,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    pub total: usize,
    pub offset: usize,
    pub items: Vec<ScreeningRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub description: String,
    pub query: ScreeningQuery,
}

impl ScreeningQuery {
    pub fn matches(&self, record: &ScreeningRecord) -> bool {
        if !self.fund_types.is_empty()
            && !self
                .fund_types
                .iter()
                .any(|t| record.fund_type.contains(t.as_str()))
        {
            return false;
        }
        let within_ranks = self
            .max_rank
            .iter()
            .all(|(period, limit)| record.ranks.get(*period).is_some_and(|r| r <= *limit));
        if !within_ranks {
            return false;
        }
        if self.pass_4433.is_some_and(|want| record.pass_4433 != want) {
            return false;
        }
        let sharpe_ok = self
            .min_sharpe_1y
            .is_none_or(|min| record.metrics.sharpe_ratio_1y.is_some_and(|s| s >= min));
        let drawdown_ok = self
            .max_drawdown_1y
            .is_none_or(|max| record.metrics.max_drawdown_1y.is_some_and(|d| d <= max));
        sharpe_ok && drawdown_ok
    }

    /// Filters, sorts and pages `records`. Records missing the sort value go
    /// last; ties break on fund code.
    pub fn apply(&self, records: Vec<ScreeningRecord>) -> QueryPage {
        let mut matched: Vec<ScreeningRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();

        let field = self.sort_by;
        matched.sort_by(|a, b| {
            let ordering = match (field.value(a), field.value(b)) {
                (Some(x), Some(y)) if field.ascending() => x.total_cmp(&y),
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            ordering.then_with(|| a.fund_code.cmp(&b.fund_code))
        });

        let total = matched.len();
        let items = matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(DEFAULT_PAGE_SIZE))
            .collect();
        QueryPage {
            total,
            offset: self.offset,
            items,
        }
    }
}

pub fn strategies() -> Vec<Strategy> {
    vec![
        Strategy {
            name: "4433".to_string(),
            description: "Top quarter over 1y/2y/3y and top third over 6m/3m within its type"
                .to_string(),
            query: ScreeningQuery {
                pass_4433: Some(true),
                sort_by: SortField::Rank1y,
                ..Default::default()
            },
        },
        Strategy {
            name: "steady_growth".to_string(),
            description: "Upper half over 1y and 3y with a 1y Sharpe ratio of at least 1"
                .to_string(),
            query: ScreeningQuery {
                max_rank: BTreeMap::from([
                    (ReturnPeriod::OneYear, 50.0),
                    (ReturnPeriod::ThreeYears, 50.0),
                ]),
                min_sharpe_1y: Some(1.0),
                sort_by: SortField::Sharpe1y,
                ..Default::default()
            },
        },
        Strategy {
            name: "low_drawdown".to_string(),
            description: "1y max drawdown of at most 10% while ranking in the upper half over 1y"
                .to_string(),
            query: ScreeningQuery {
                max_rank: BTreeMap::from([(ReturnPeriod::OneYear, 50.0)]),
                max_drawdown_1y: Some(10.0),
                sort_by: SortField::MaxDrawdown1y,
                ..Default::default()
            },
        },
        Strategy {
            name: "momentum".to_string(),
            description: "Top fifth over both 1m and 3m".to_string(),
            query: ScreeningQuery {
                max_rank: BTreeMap::from([
                    (ReturnPeriod::OneMonth, 20.0),
                    (ReturnPeriod::ThreeMonths, 20.0),
                ]),
                sort_by: SortField::Return3m,
                ..Default::default()
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screening::dataset::tests::record;

    fn ranked(code: &str, fund_type: &str, rank_1y: f64, sharpe: Option<f64>) -> ScreeningRecord {
        let mut r = record(code, fund_type, Some(100.0 - rank_1y));
        r.ranks.one_year = Some(rank_1y);
        r.metrics.sharpe_ratio_1y = sharpe;
        r
    }

    fn codes(page: &QueryPage) -> Vec<&str> {
        page.items.iter().map(|r| r.fund_code.as_str()).collect()
    }

    #[test]
    fn test_default_query_sorts_by_rank_ascending() {
        let records = vec![
            ranked("C", "股票型", 60.0, None),
            ranked("A", "股票型", 10.0, None),
            ranked("B", "混合型-偏股", 30.0, None),
            record("Z", "股票型", None),
        ];
        let page = ScreeningQuery::default().apply(records);
        assert_eq!(page.total, 4);
        assert_eq!(codes(&page), vec!["A", "B", "C", "Z"]);
    }

    #[test]
    fn test_filters_combine() {
        let records = vec![
            ranked("A", "股票型", 10.0, Some(1.5)),
            ranked("B", "混合型-偏股", 20.0, Some(0.5)),
            ranked("C", "混合型-灵活", 30.0, Some(2.0)),
            ranked("D", "债券型", 5.0, Some(3.0)),
        ];
        let query = ScreeningQuery {
            fund_types: vec!["混合型".to_string(), "股票型".to_string()],
            max_rank: BTreeMap::from([(ReturnPeriod::OneYear, 25.0)]),
            min_sharpe_1y: Some(1.0),
            ..Default::default()
        };
        assert_eq!(codes(&query.apply(records)), vec!["A"]);
    }

    #[test]
    fn test_descending_sort_and_paging() {
        let records: Vec<ScreeningRecord> = (1..=5)
            .map(|i| ranked(&format!("F{i}"), "x", f64::from(i) * 10.0, None))
            .collect();
        let query = ScreeningQuery {
            sort_by: SortField::Return1y,
            offset: 1,
            limit: Some(2),
            ..Default::default()
        };
        let page = query.apply(records);
        assert_eq!(page.total, 5);
        assert_eq!(codes(&page), vec!["F2", "F3"]);
    }

    #[test]
    fn test_strategy_presets_are_named() {
        let names: Vec<String> = strategies().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["4433", "steady_growth", "low_drawdown", "momentum"]);
    }

    #[test]
    fn test_query_deserializes_from_partial_json() {
        let query: ScreeningQuery = serde_json::from_str(
            r#"{"fund_types":["股票型"],"max_rank":{"1y":25.0},"sort_by":"sharpe_1y","limit":10}"#,
        )
        .unwrap();
        assert_eq!(query.max_rank.get(&ReturnPeriod::OneYear), Some(&25.0));
        assert_eq!(query.sort_by, SortField::Sharpe1y);
        assert_eq!(query.offset, 0);
    }
}
