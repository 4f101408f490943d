//! Risk metrics derived from a unit net worth history.

use crate::core::NavPoint;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

const MIN_POINTS: usize = 30;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const RISK_FREE_RATE: f64 = 2.0;
const MAX_SANE_VOLATILITY: f64 = 500.0;
const MAX_SANE_SHARPE: f64 = 50.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub max_drawdown_3m: Option<f64>,
    pub max_drawdown_6m: Option<f64>,
    pub max_drawdown_1y: Option<f64>,
    pub max_drawdown_3y: Option<f64>,
    pub max_drawdown_all: Option<f64>,
    pub annual_return_1y: Option<f64>,
    pub annual_return_3y: Option<f64>,
    pub volatility_1y: Option<f64>,
    pub volatility_3y: Option<f64>,
    pub sharpe_ratio_1y: Option<f64>,
    pub sharpe_ratio_3y: Option<f64>,
    pub calmar_ratio_1y: Option<f64>,
    pub calmar_ratio_3y: Option<f64>,
}

#[derive(Debug, Default, PartialEq)]
struct WindowMetrics {
    annual_return: Option<f64>,
    volatility: Option<f64>,
    sharpe_ratio: Option<f64>,
    calmar_ratio: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Largest peak-to-trough decline in percent.
fn max_drawdown(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mut peak = values[0];
    let mut max_dd = 0.0_f64;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak * 100.0);
        }
    }
    Some(round2(max_dd))
}

fn daily_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn annual_return(values: &[f64]) -> Option<f64> {
    let first = *values.first()?;
    let last = *values.last()?;
    if values.len() < 2 || first == 0.0 {
        return None;
    }
    let total = (last - first) / first;
    let annual = ((1.0 + total).powf(TRADING_DAYS_PER_YEAR / values.len() as f64) - 1.0) * 100.0;
    annual.is_finite().then(|| round2(annual))
}

/// Annualized population standard deviation of daily returns, in percent.
fn volatility(returns: &[f64]) -> Option<f64> {
    if returns.len() < 10 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some(round2(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0))
}

fn window_metrics(values: &[f64], min_points: usize, max_dd: Option<f64>) -> WindowMetrics {
    if values.len() < min_points {
        return WindowMetrics::default();
    }
    let annual_return = annual_return(values);
    let volatility = volatility(&daily_returns(values));
    if volatility.is_some_and(|v| v > MAX_SANE_VOLATILITY) {
        return WindowMetrics::default();
    }
    let sharpe_ratio = match (annual_return, volatility) {
        (Some(ret), Some(vol)) if vol != 0.0 => Some(round2((ret - RISK_FREE_RATE) / vol)),
        _ => None,
    };
    // Near-flat series divide by almost nothing; treat the window as unknown.
    if sharpe_ratio.is_some_and(|s| s.abs() > MAX_SANE_SHARPE) {
        return WindowMetrics::default();
    }
    let calmar_ratio = match (annual_return, max_dd) {
        (Some(ret), Some(dd)) if dd > 0.0 => Some(round2(ret / dd)),
        _ => None,
    };
    WindowMetrics {
        annual_return,
        volatility,
        sharpe_ratio,
        calmar_ratio,
    }
}

/// Computes risk metrics as of `as_of`. Returns `None` when the history is
/// too short to say anything.
pub fn compute_risk_metrics(trend: &[NavPoint], as_of: NaiveDate) -> Option<RiskMetrics> {
    let mut points: Vec<NavPoint> = trend.iter().filter(|p| p.nav.is_finite()).copied().collect();
    if points.len() < MIN_POINTS {
        return None;
    }
    points.sort_by_key(|p| p.date);

    // A first value far from the second is an inception artefact.
    if points[0].nav > 0.0 && ((points[1].nav - points[0].nav) / points[0].nav).abs() > 0.5 {
        points.remove(0);
    }
    if points.len() < MIN_POINTS {
        return None;
    }

    let window = |months: i64| -> Vec<f64> {
        let cutoff = as_of - Duration::days(months * 30);
        points
            .iter()
            .filter(|p| p.date >= cutoff)
            .map(|p| p.nav)
            .collect()
    };
    let all: Vec<f64> = points.iter().map(|p| p.nav).collect();
    let one_year = window(12);
    let three_years = window(36);

    let max_drawdown_1y = max_drawdown(&one_year);
    let max_drawdown_3y = max_drawdown(&three_years);
    let year = window_metrics(&one_year, 200, max_drawdown_1y);
    let three = window_metrics(&three_years, 600, max_drawdown_3y);

    Some(RiskMetrics {
        max_drawdown_3m: max_drawdown(&window(3)),
        max_drawdown_6m: max_drawdown(&window(6)),
        max_drawdown_1y,
        max_drawdown_3y,
        max_drawdown_all: max_drawdown(&all),
        annual_return_1y: year.annual_return,
        annual_return_3y: three.annual_return,
        volatility_1y: year.volatility,
        volatility_3y: three.volatility,
        sharpe_ratio_1y: year.sharpe_ratio,
        sharpe_ratio_3y: three.sharpe_ratio,
        calmar_ratio_1y: year.calmar_ratio,
        calmar_ratio_3y: three.calmar_ratio,
    })
}
