//! Mobility and outcome alignment
//!
//! This module restricts raw mobility and outcome series to one territory,
//! smooths mobility, and joins them with a stringency series over the date
//! range all three cover.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::IndexError;
use crate::types::{
    AlignedDay, MobilityCategory, MobilityPoint, MobilityRecord, OutcomePoint, OutcomeRecord,
    StringencySeries, Territory,
};

/// Observed mobility for `territory` and `category`.
///
/// Same-day records are averaged, days without a value for the category are
/// dropped, the series is smoothed with an EWM of the given span and clipped
/// to be non-positive.
pub fn mobility_series(
    records: &[MobilityRecord],
    territory: &Territory,
    category: MobilityCategory,
    span: usize,
) -> Result<Vec<MobilityPoint>, IndexError> {
    let mut by_date: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

    for record in records.iter().filter(|r| mobility_matches(r, territory)) {
        let Some(value) = record.value(category) else {
            continue;
        };
        let entry = by_date.entry(record.date).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    if by_date.is_empty() {
        return Err(IndexError::MissingInput { series: "mobility" });
    }

    let daily: Vec<(NaiveDate, f64)> = by_date
        .into_iter()
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .collect();
    let values: Vec<f64> = daily.iter().map(|(_, v)| *v).collect();
    let smoothed = ewm_mean(&values, span);

    Ok(daily
        .iter()
        .zip(smoothed)
        .map(|((date, _), value)| MobilityPoint {
            date: *date,
            observed: value.min(0.0),
        })
        .collect())
}

fn mobility_matches(record: &MobilityRecord, territory: &Territory) -> bool {
    if record.country_region_code != territory.country_iso2 {
        return false;
    }
    let sub_region = record
        .sub_region_1
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (&territory.region_name, sub_region) {
        (Some(wanted), Some(actual)) => wanted == actual,
        (None, None) => true,
        _ => false,
    }
}

/// Exponentially weighted moving average with `alpha = 2 / (span + 1)`,
/// normalised by the sum of weights seen so far
pub fn ewm_mean(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    values
        .iter()
        .map(|&x| {
            numerator = x + decay * numerator;
            denominator = 1.0 + decay * denominator;
            numerator / denominator
        })
        .collect()
}

/// Cumulative cases and deaths for `territory`, sorted by date.
///
/// Country-level territories take only rows without a province; regional
/// ones only rows with a matching province.
pub fn outcome_series(
    records: &[OutcomeRecord],
    territory: &Territory,
) -> Result<Vec<OutcomePoint>, IndexError> {
    let mut by_date: BTreeMap<NaiveDate, OutcomePoint> = BTreeMap::new();

    for record in records {
        if !outcome_matches(record, territory) {
            continue;
        }
        by_date.entry(record.date).or_insert(OutcomePoint {
            date: record.date,
            confirmed_cases: record.confirmed_cases,
            deaths: record.deaths,
        });
    }

    if by_date.is_empty() {
        return Err(IndexError::MissingInput { series: "outcome" });
    }
    Ok(by_date.into_values().collect())
}

fn outcome_matches(record: &OutcomeRecord, territory: &Territory) -> bool {
    if record.country_id != territory.country_iso2 {
        return false;
    }
    let province = record
        .province_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (&territory.region_iso2, province) {
        (Some(wanted), Some(actual)) => wanted == actual,
        (None, None) => true,
        _ => false,
    }
}

/// Join the three series on date over their common coverage.
///
/// Outcome days drive the join; a day is kept when it lies inside
/// `[max(starts), min(ends)]` and both mobility and stringency have a value.
pub fn align(
    stringency: &StringencySeries,
    mobility: &[MobilityPoint],
    outcomes: &[OutcomePoint],
) -> Result<Vec<AlignedDay>, IndexError> {
    let (s_start, s_end) = coverage(stringency.iter().map(|p| p.date))
        .ok_or(IndexError::MissingInput { series: "stringency" })?;
    let (m_start, m_end) = coverage(mobility.iter().map(|p| p.date))
        .ok_or(IndexError::MissingInput { series: "mobility" })?;
    let (o_start, o_end) = coverage(outcomes.iter().map(|p| p.date))
        .ok_or(IndexError::MissingInput { series: "outcome" })?;

    let start = s_start.max(m_start).max(o_start);
    let end = s_end.min(m_end).min(o_end);
    if start > end {
        return Err(IndexError::NoOverlap);
    }

    let stringency_by_date: BTreeMap<NaiveDate, f64> =
        stringency.iter().map(|p| (p.date, p.value)).collect();
    let mobility_by_date: BTreeMap<NaiveDate, f64> =
        mobility.iter().map(|p| (p.date, p.observed)).collect();

    let aligned: Vec<AlignedDay> = outcomes
        .iter()
        .filter(|o| o.date >= start && o.date <= end)
        .filter_map(|o| {
            let stringency = *stringency_by_date.get(&o.date)?;
            let observed_mobility = *mobility_by_date.get(&o.date)?;
            Some(AlignedDay {
                date: o.date,
                confirmed_cases: o.confirmed_cases,
                deaths: o.deaths,
                stringency,
                observed_mobility,
            })
        })
        .collect();

    if aligned.is_empty() {
        return Err(IndexError::NoOverlap);
    }
    Ok(aligned)
}

fn coverage(dates: impl Iterator<Item = NaiveDate>) -> Option<(NaiveDate, NaiveDate)> {
    dates.fold(None, |acc, date| match acc {
        None => Some((date, date)),
        Some((lo, hi)) => Some((lo.min(date), hi.max(date))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StringencyPoint;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, day).unwrap()
    }

    fn mobility(day: u32, region: Option<&str>, workplaces: Option<f64>) -> MobilityRecord {
        MobilityRecord {
            date: date(day),
            country_region_code: "US".into(),
            sub_region_1: region.map(String::from),
            workplaces,
            ..Default::default()
        }
    }

    fn outcome(day: u32, province: Option<&str>) -> OutcomeRecord {
        OutcomeRecord {
            date: date(day),
            country_id: "US".into(),
            province_id: province.map(String::from),
            confirmed_cases: day as f64 * 10.0,
            deaths: day as f64,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn test_ewm_matches_adjusted_formula() {
        // span 3 -> alpha 0.5
        let smoothed = ewm_mean(&[1.0, 2.0, 3.0], 3);
        assert_close(smoothed[0], 1.0);
        assert_close(smoothed[1], (2.0 + 0.5 * 1.0) / 1.5);
        assert_close(smoothed[2], (3.0 + 0.5 * 2.0 + 0.25 * 1.0) / 1.75);
    }

    #[test]
    fn test_ewm_of_constant_is_constant() {
        let smoothed = ewm_mean(&[-20.0; 10], 30);
        assert!(smoothed.iter().all(|v| (v + 20.0).abs() < 1e-9));
    }

    #[test]
    fn test_mobility_filters_and_averages() {
        let records = vec![
            mobility(1, None, Some(-10.0)),
            mobility(1, None, Some(-30.0)),
            mobility(1, Some("New York"), Some(-50.0)),
            mobility(2, None, None),
            mobility(3, Some(""), Some(-20.0)),
        ];
        let country = Territory::country("United States", "US", "USA", 1);
        let series = mobility_series(&records, &country, MobilityCategory::Workplaces, 1).unwrap();

        // span 1 -> alpha 1, no smoothing
        assert_eq!(series.len(), 2);
        assert_close(series[0].observed, -20.0);
        assert_eq!(series[1].date, date(3));
    }

    #[test]
    fn test_mobility_clipped_to_non_positive() {
        let records = vec![mobility(1, None, Some(15.0)), mobility(2, None, Some(-5.0))];
        let country = Territory::country("United States", "US", "USA", 1);
        let series = mobility_series(&records, &country, MobilityCategory::Workplaces, 1).unwrap();
        assert_close(series[0].observed, 0.0);
        assert_close(series[1].observed, -5.0);
    }

    #[test]
    fn test_missing_mobility_is_reported() {
        let country = Territory::country("Uganda", "UG", "UGA", 1);
        let result = mobility_series(&[mobility(1, None, Some(-1.0))], &country, MobilityCategory::Parks, 30);
        assert!(matches!(result, Err(IndexError::MissingInput { series: "mobility" })));
    }

    #[test]
    fn test_outcome_region_filter() {
        let records = vec![outcome(1, Some("US-NY")), outcome(1, Some("US-CA")), outcome(2, Some("US-NY"))];
        let state = Territory::country("United States", "US", "USA", 1)
            .with_region("New York", "US-NY", "USA-NY", 1);
        let series = outcome_series(&records, &state).unwrap();
        assert_eq!(series.len(), 2);

        let texas = Territory::country("United States", "US", "USA", 1)
            .with_region("Texas", "US-TX", "USA-TX", 1);
        assert!(matches!(
            outcome_series(&records, &texas),
            Err(IndexError::MissingInput { series: "outcome" })
        ));
    }

    #[test]
    fn test_country_outcomes_skip_province_rows() {
        let mut regional = outcome(1, Some("US-NY"));
        regional.confirmed_cases = 1.0;
        let mut national = outcome(1, None);
        national.confirmed_cases = 100.0;
        let records = vec![regional, national, outcome(2, Some("US-CA"))];

        let country = Territory::country("United States", "US", "USA", 1);
        let series = outcome_series(&records, &country).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].date, date(1));
        assert_close(series[0].confirmed_cases, 100.0);
    }

    #[test]
    fn test_country_outcomes_need_national_rows() {
        let records = vec![outcome(1, Some("US-NY")), outcome(2, Some("US-CA"))];
        let country = Territory::country("United States", "US", "USA", 1);
        assert!(matches!(
            outcome_series(&records, &country),
            Err(IndexError::MissingInput { series: "outcome" })
        ));
    }

    #[test]
    fn test_align_restricts_to_intersection() {
        let stringency: StringencySeries = (1..=10)
            .map(|d| StringencyPoint { date: date(d), value: d as f64 })
            .collect();
        let mobility: Vec<MobilityPoint> = (3..=12)
            .map(|d| MobilityPoint { date: date(d), observed: -(d as f64) })
            .collect();
        let outcomes: Vec<OutcomePoint> = (1..=8)
            .map(|d| OutcomePoint { date: date(d), confirmed_cases: 0.0, deaths: 0.0 })
            .collect();

        let aligned = align(&stringency, &mobility, &outcomes).unwrap();
        assert_eq!(aligned.len(), 6);
        assert_eq!(aligned[0].date, date(3));
        assert_eq!(aligned[5].date, date(8));
        assert_close(aligned[0].stringency, 3.0);
        assert_close(aligned[0].observed_mobility, -3.0);
    }

    #[test]
    fn test_align_disjoint_ranges() {
        let stringency: StringencySeries = vec![StringencyPoint { date: date(1), value: 1.0 }];
        let mobility = vec![MobilityPoint { date: date(5), observed: -1.0 }];
        let outcomes = vec![OutcomePoint { date: date(5), confirmed_cases: 0.0, deaths: 0.0 }];
        assert!(matches!(align(&stringency, &mobility, &outcomes), Err(IndexError::NoOverlap)));
    }

    #[test]
    fn test_align_empty_stringency() {
        let mobility = vec![MobilityPoint { date: date(5), observed: -1.0 }];
        let outcomes = vec![OutcomePoint { date: date(5), confirmed_cases: 0.0, deaths: 0.0 }];
        assert!(matches!(
            align(&Vec::new(), &mobility, &outcomes),
            Err(IndexError::MissingInput { series: "stringency" })
        ));
    }
}
