//! Stringency aggregation
//!
//! Composite 0-100 stringency per day from per-indicator levels, following the
//! OxCGRT stringency-index formulation. Also selects a territory's series from
//! the external stringency dataset, which can stand in for the computed one.

use crate::config::IndicatorConfigTable;
use crate::types::{
    DailyIndicatorRow, IndicatorConfig, StringencyPoint, StringencyRecord, StringencySeries,
    Territory,
};

/// Computes composite stringency scores
pub struct StringencyAggregator<'a> {
    indicators: &'a IndicatorConfigTable,
}

impl<'a> StringencyAggregator<'a> {
    pub fn new(indicators: &'a IndicatorConfigTable) -> Self {
        Self { indicators }
    }

    /// Composite score for one day.
    ///
    /// Each indicator's sub-score is clamped at 0 before the unweighted mean
    /// over all configured indicators. A configured indicator missing from the
    /// row contributes 0.
    pub fn score_day(&self, row: &DailyIndicatorRow) -> f64 {
        let n = self.indicators.len();
        if n == 0 {
            return 0.0;
        }
        let total: f64 = self
            .indicators
            .entries()
            .iter()
            .map(|config| match row.value(config.indicator) {
                Some(value) => indicator_score(config, value.level, value.targeted_flag),
                None => 0.0,
            })
            .sum();
        total / n as f64
    }

    /// Stringency series for a full timeline
    pub fn score_timeline(&self, rows: &[DailyIndicatorRow]) -> StringencySeries {
        rows.iter()
            .map(|row| StringencyPoint {
                date: row.date,
                value: self.score_day(row),
            })
            .collect()
    }
}

/// Sub-score of one indicator, clamped to be non-negative
pub fn indicator_score(config: &IndicatorConfig, level: u8, targeted_flag: u8) -> f64 {
    let max = f64::from(config.max_value);
    let level = f64::from(level);
    let raw = if config.has_targeting_adjustment() {
        100.0 * (level - 0.5 * (1.0 - f64::from(targeted_flag))) / max
    } else {
        100.0 * level / max
    };
    raw.max(0.0)
}

/// Select `territory`'s series from the external stringency dataset.
///
/// Country-level territories match rows without a region code (empty or "0").
/// Regional territories match on the region ISO2 code with `-` written as `_`.
/// A missing index value counts as 0. The result is sorted by date.
pub fn external_series(records: &[StringencyRecord], territory: &Territory) -> StringencySeries {
    let wanted_region = territory.region_iso2.as_ref().map(|iso| iso.replace('-', "_"));

    let mut series: StringencySeries = records
        .iter()
        .filter(|r| r.country_code == territory.country_iso3)
        .filter(|r| {
            let region = r
                .region_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty() && *code != "0");
            match (&wanted_region, region) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (None, None) => true,
                _ => false,
            }
        })
        .map(|r| StringencyPoint {
            date: r.date,
            value: r.stringency_index.unwrap_or(0.0),
        })
        .collect();

    series.sort_by_key(|p| p.date);
    series.dedup_by_key(|p| p.date);
    series
}
