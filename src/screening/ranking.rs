use super::dataset::ScreeningRecord;
use crate::core::{PeriodReturns, ReturnPeriod};
use std::collections::HashMap;

/// Rank percentiles per period. Lower is better: 25.0 means top quarter.
pub type RankPercentiles = PeriodReturns;

/// Returns below this magnitude are treated as missing data.
const MIN_VALID_RETURN: f64 = 0.01;

const TOP_QUARTER: f64 = 25.0;
const TOP_THIRD: f64 = 33.33;

/// Percentile ranks for every fund in one cohort, keyed by fund code.
pub fn rank_cohort<'a, I>(records: I) -> HashMap<String, RankPercentiles>
where
    I: IntoIterator<Item = &'a ScreeningRecord>,
{
    let records: Vec<&ScreeningRecord> = records.into_iter().collect();
    let mut ranks: HashMap<String, RankPercentiles> = records
        .iter()
        .map(|r| (r.fund_code.clone(), RankPercentiles::default()))
        .collect();

    for period in ReturnPeriod::ALL {
        let mut valid: Vec<(&str, f64)> = records
            .iter()
            .filter_map(|r| {
                r.returns
                    .get(period)
                    .filter(|v| v.is_finite() && v.abs() >= MIN_VALID_RETURN)
                    .map(|v| (r.fund_code.as_str(), v))
            })
            .collect();
        if valid.len() < 2 {
            continue;
        }
        valid.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let total = valid.len() as f64;
        for (idx, (code, _)) in valid.into_iter().enumerate() {
            let pct = ((idx + 1) as f64 / total * 100.0 * 100.0).round() / 100.0;
            if let Some(entry) = ranks.get_mut(code) {
                entry.set(period, Some(pct));
            }
        }
    }
    ranks
}

/// 4433 rule: top quarter over 1y and every available longer period, top
/// third over 6m and 3m.
pub fn passes_4433(ranks: &RankPercentiles) -> bool {
    let within = |rank: Option<f64>, limit: f64| rank.is_some_and(|r| r <= limit);

    within(ranks.one_year, TOP_QUARTER)
        && [ranks.two_years, ranks.three_years]
            .into_iter()
            .flatten()
            .all(|r| r <= TOP_QUARTER)
        && within(ranks.six_months, TOP_THIRD)
        && within(ranks.three_months, TOP_THIRD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screening::dataset::tests::record;

    #[test]
    fn test_percentiles_within_cohort() {
        let records = vec![
            record("A", "股票型", Some(10.0)),
            record("B", "股票型", Some(40.0)),
            record("C", "股票型", Some(20.0)),
            record("D", "股票型", Some(30.0)),
            record("E", "股票型", Some(0.005)),
            record("F", "股票型", None),
        ];
        let ranks = rank_cohort(&records);

        assert_eq!(ranks["B"].one_year, Some(25.0));
        assert_eq!(ranks["D"].one_year, Some(50.0));
        assert_eq!(ranks["C"].one_year, Some(75.0));
        assert_eq!(ranks["A"].one_year, Some(100.0));
        assert_eq!(ranks["E"].one_year, None);
        assert_eq!(ranks["F"].one_year, None);
        assert_eq!(ranks["A"].three_months, None);
    }

    #[test]
    fn test_single_valid_fund_gets_no_rank() {
        let records = vec![record("A", "债券型", Some(5.0)), record("B", "债券型", None)];
        let ranks = rank_cohort(&records);
        assert_eq!(ranks["A"].one_year, None);
    }

    #[test]
    fn test_thirds_round_to_two_decimals() {
        let records = vec![
            record("A", "x", Some(3.0)),
            record("B", "x", Some(2.0)),
            record("C", "x", Some(1.0)),
        ];
        let ranks = rank_cohort(&records);
        assert_eq!(ranks["A"].one_year, Some(33.33));
        assert_eq!(ranks["B"].one_year, Some(66.67));
    }

    #[test]
    fn test_4433_rule() {
        let passing = RankPercentiles {
            one_month: Some(90.0),
            three_months: Some(33.33),
            six_months: Some(20.0),
            one_year: Some(25.0),
            two_years: None,
            three_years: Some(10.0),
        };
        assert!(passes_4433(&passing));

        let weak_long_term = RankPercentiles {
            three_years: Some(30.0),
            ..passing.clone()
        };
        assert!(!passes_4433(&weak_long_term));

        let missing_required = RankPercentiles {
            three_months: None,
            ..passing.clone()
        };
        assert!(!passes_4433(&missing_required));

        let weak_short_term = RankPercentiles {
            six_months: Some(34.0),
            ..passing
        };
        assert!(!passes_4433(&weak_short_term));
    }
}
