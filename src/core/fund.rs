//! Fund data abstractions and core types

use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ReturnPeriod {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "3y")]
    ThreeYears,
}

impl ReturnPeriod {
    pub const ALL: [ReturnPeriod; 6] = [
        ReturnPeriod::OneMonth,
        ReturnPeriod::ThreeMonths,
        ReturnPeriod::SixMonths,
        ReturnPeriod::OneYear,
        ReturnPeriod::TwoYears,
        ReturnPeriod::ThreeYears,
    ];
}

impl Display for ReturnPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ReturnPeriod::OneMonth => "1m",
                ReturnPeriod::ThreeMonths => "3m",
                ReturnPeriod::SixMonths => "6m",
                ReturnPeriod::OneYear => "1y",
                ReturnPeriod::TwoYears => "2y",
                ReturnPeriod::ThreeYears => "3y",
            }
        )
    }
}

impl FromStr for ReturnPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" => Ok(ReturnPeriod::OneMonth),
            "3m" => Ok(ReturnPeriod::ThreeMonths),
            "6m" => Ok(ReturnPeriod::SixMonths),
            "1y" => Ok(ReturnPeriod::OneYear),
            "2y" => Ok(ReturnPeriod::TwoYears),
            "3y" => Ok(ReturnPeriod::ThreeYears),
            _ => Err(anyhow::anyhow!("Invalid return period: {}", s)),
        }
    }
}

/// Trailing returns in percent, keyed by period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodReturns {
    pub one_month: Option<f64>,
    pub three_months: Option<f64>,
    pub six_months: Option<f64>,
    pub one_year: Option<f64>,
    pub two_years: Option<f64>,
    pub three_years: Option<f64>,
}

impl PeriodReturns {
    pub fn get(&self, period: ReturnPeriod) -> Option<f64> {
        match period {
            ReturnPeriod::OneMonth => self.one_month,
            ReturnPeriod::ThreeMonths => self.three_months,
            ReturnPeriod::SixMonths => self.six_months,
            ReturnPeriod::OneYear => self.one_year,
            ReturnPeriod::TwoYears => self.two_years,
            ReturnPeriod::ThreeYears => self.three_years,
        }
    }

    pub fn set(&mut self, period: ReturnPeriod, value: Option<f64>) {
        let slot = match period {
            ReturnPeriod::OneMonth => &mut self.one_month,
            ReturnPeriod::ThreeMonths => &mut self.three_months,
            ReturnPeriod::SixMonths => &mut self.six_months,
            ReturnPeriod::OneYear => &mut self.one_year,
            ReturnPeriod::TwoYears => &mut self.two_years,
            ReturnPeriod::ThreeYears => &mut self.three_years,
        };
        *slot = value;
    }
}

/// Mainland China market time, UTC+8.
pub fn market_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub nav: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundSnapshot {
    pub fund_code: String,
    pub fund_name: String,
    pub returns: PeriodReturns,
    /// Unit net worth history sorted by date
    pub net_worth_trend: Vec<NavPoint>,
}

impl FundSnapshot {
    /// Derives any period return the upstream did not report from the net
    /// worth trend.
    pub fn fill_missing_returns(&mut self) {
        for period in ReturnPeriod::ALL {
            if self.returns.get(period).is_none() {
                let value = trailing_return(&self.net_worth_trend, period.days());
                self.returns.set(period, value);
            }
        }
    }
}

impl ReturnPeriod {
    /// Calendar days covered by the period, using 30 day months.
    pub fn days(&self) -> i64 {
        match self {
            ReturnPeriod::OneMonth => 30,
            ReturnPeriod::ThreeMonths => 90,
            ReturnPeriod::SixMonths => 180,
            ReturnPeriod::OneYear => 365,
            ReturnPeriod::TwoYears => 730,
            ReturnPeriod::ThreeYears => 1095,
        }
    }
}

/// Percentage change between the last point and the latest point at or before
/// `days` earlier. `None` when the history does not reach back that far.
pub fn trailing_return(trend: &[NavPoint], days: i64) -> Option<f64> {
    let last = trend.last()?;
    let cutoff = last.date - chrono::Duration::days(days);
    let base = trend.iter().rev().find(|p| p.date <= cutoff)?;
    if base.nav <= 0.0 {
        return None;
    }
    Some(((last.nav / base.nav - 1.0) * 100.0 * 100.0).round() / 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundEstimate {
    pub fund_code: String,
    pub name: String,
    pub net_worth: Option<f64>,
    pub net_worth_date: Option<String>,
    pub estimate_value: Option<f64>,
    pub estimate_change_pct: Option<f64>,
    pub estimate_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundListEntry {
    pub code: String,
    pub abbreviation: String,
    pub name: String,
    pub fund_type: String,
    pub pinyin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub change_pct: f64,
    pub change_amount: f64,
    /// Turnover in yuan
    #[serde(default)]
    pub amount: f64,
}

/// Net Stock Connect buying from Hong Kong, in 100 million yuan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NorthFlow {
    pub shanghai: f64,
    pub shenzhen: f64,
    pub total: f64,
}

/// Net inflow by order size across both exchanges, in 100 million yuan.
/// `main_net` is super large plus large orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainFlow {
    pub main_net: f64,
    pub super_large: f64,
    pub large: f64,
    pub medium: f64,
    pub small: f64,
}

/// Advancers and decliners across the A-share market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketBreadth {
    pub up_count: u32,
    pub down_count: u32,
    pub flat_count: u32,
    pub limit_up_count: u32,
    pub limit_down_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorQuote {
    pub code: String,
    pub name: String,
    pub change_pct: f64,
    /// Main force net inflow in yuan
    pub main_net_inflow: f64,
}

/// Upstream market and fund data. The market overview calls beyond index
/// quotes are optional for a provider.
#[async_trait]
pub trait FundDataProvider: Send + Sync {
    async fn fetch_fund(&self, fund_code: &str) -> Result<FundSnapshot>;

    async fn fetch_estimate(&self, fund_code: &str) -> Result<FundEstimate>;

    async fn fetch_fund_list(&self) -> Result<Vec<FundListEntry>>;

    async fn fetch_market_indices(&self) -> Result<Vec<IndexQuote>>;

    async fn fetch_north_flow(&self) -> Result<NorthFlow> {
        Err(anyhow::anyhow!("North flow is not available from this provider"))
    }

    async fn fetch_main_flow(&self) -> Result<MainFlow> {
        Err(anyhow::anyhow!("Main flow is not available from this provider"))
    }

    async fn fetch_market_breadth(&self) -> Result<MarketBreadth> {
        Err(anyhow::anyhow!("Market breadth is not available from this provider"))
    }

    /// Best performing industry sectors of the day, strongest first.
    async fn fetch_hot_sectors(&self, _limit: usize) -> Result<Vec<SectorQuote>> {
        Err(anyhow::anyhow!("Sector quotes are not available from this provider"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(date: &str, nav: f64) -> NavPoint {
        NavPoint {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            nav,
        }
    }

    #[test]
    fn test_trailing_return_uses_latest_point_before_cutoff() {
        let trend = vec![
            point("2023-01-01", 1.0),
            point("2023-12-01", 1.5),
            point("2024-01-01", 2.0),
            point("2024-01-31", 2.2),
        ];
        // 30 days before 2024-01-31 is 2024-01-01
        assert_eq!(trailing_return(&trend, 30), Some(10.0));
        // 365 days before is 2023-01-31, latest point at or before is 2023-01-01
        assert_eq!(trailing_return(&trend, 365), Some(120.0));
        assert_eq!(trailing_return(&trend, 730), None);
        assert_eq!(trailing_return(&[], 30), None);
    }

    #[test]
    fn test_fill_missing_returns_keeps_reported_values() {
        let mut snapshot = FundSnapshot {
            fund_code: "000001".to_string(),
            fund_name: "Test".to_string(),
            returns: PeriodReturns {
                one_month: Some(3.0),
                ..Default::default()
            },
            net_worth_trend: vec![point("2024-01-01", 1.0), point("2024-04-01", 1.1)],
        };
        snapshot.fill_missing_returns();
        assert_eq!(snapshot.returns.one_month, Some(3.0));
        assert_eq!(snapshot.returns.three_months, Some(10.0));
        assert_eq!(snapshot.returns.one_year, None);
    }

    #[test]
    fn test_return_period_round_trips_through_str() {
        for period in ReturnPeriod::ALL {
            assert_eq!(period.to_string().parse::<ReturnPeriod>().unwrap(), period);
        }
        assert!("5y".parse::<ReturnPeriod>().is_err());
    }
}
