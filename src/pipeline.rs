//! Pipeline orchestration
//!
//! This module provides the public API for the NPI index engine.
//! It runs the full computation for every territory, from raw input tables to
//! the wide output table.
//!
//! Per territory and stringency source:
//! 1. Stringency series - expanded policy timeline, or the external dataset
//! 2. Mobility/outcome alignment - per mobility category
//! 3. Adherence regression
//! 4. Index combination, then an outer join across (source, category)

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adherence::score_adherence;
use crate::align::{align, mobility_series, outcome_series};
use crate::combiner::{combine, merge_territory, IndexTable, WeightRatio, WideRow};
use crate::config::{AnalysisWindow, EngineConfig, IndicatorConfigTable};
use crate::error::IndexError;
use crate::scorer::ScoringTable;
use crate::stringency::{external_series, StringencyAggregator};
use crate::timeline::TimelineExpander;
use crate::types::{
    DailyIndicatorRow, IndicatorCode, MobilityCategory, MobilityPoint, MobilityRecord,
    NpiIndexRow, OutcomePoint, OutcomeRecord, PolicyEvent, StringencyRecord, StringencySeries,
    StringencySource, Territory,
};
use crate::{NPI_VERSION, PRODUCER_NAME};

/// Raw tables for one run. Shared read-only by every territory.
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub territories: Vec<Territory>,
    pub events: Vec<PolicyEvent>,
    pub stringency: Vec<StringencyRecord>,
    pub mobility: Vec<MobilityRecord>,
    pub outcomes: Vec<OutcomeRecord>,
}

/// A (territory, source, category) series that produced no rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSeries {
    pub territory: String,
    /// `None` when the whole territory was skipped
    pub source: Option<StringencySource>,
    pub category: Option<MobilityCategory>,
    pub reason: String,
}

/// Manifest of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub producer: String,
    pub producer_version: String,
    pub weight_ratio: WeightRatio,
    pub window: AnalysisWindow,
    pub sources: Vec<StringencySource>,
    pub categories: Vec<MobilityCategory>,
    pub territories: usize,
    pub series_computed: usize,
    pub rows: usize,
    pub skipped: Vec<SkippedSeries>,
}

/// Problem found in one policy event by [`NpiIndexEngine::validate_events`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventIssue {
    pub index: usize,
    pub event_id: Option<String>,
    pub code: IndicatorCode,
    pub date: NaiveDate,
    pub message: String,
}

#[derive(Debug, Default)]
struct TerritoryResult {
    rows: Vec<WideRow>,
    computed: usize,
    skipped: Vec<SkippedSeries>,
}

impl TerritoryResult {
    fn skip(
        &mut self,
        territory: &str,
        source: Option<StringencySource>,
        category: Option<MobilityCategory>,
        reason: String,
    ) {
        warn!(
            territory,
            source = source.map(|s| s.as_str()),
            category = category.map(|c| c.as_str()),
            reason = %reason,
            "skipping series"
        );
        self.skipped.push(SkippedSeries {
            territory: territory.to_string(),
            source,
            category,
            reason,
        });
    }
}

/// Batch NPI index computation over a fixed configuration.
///
/// Construction verifies the scoring table against the indicator
/// configuration, so a run can only fail on data it cannot interpret.
#[derive(Debug)]
pub struct NpiIndexEngine {
    config: EngineConfig,
    indicators: IndicatorConfigTable,
    scoring: ScoringTable,
    weights: WeightRatio,
    window: AnalysisWindow,
}

impl NpiIndexEngine {
    pub fn new(config: EngineConfig, indicators: IndicatorConfigTable) -> Result<Self, IndexError> {
        config.validate()?;
        indicators.validate()?;
        let scoring = ScoringTable::build(&indicators)?;
        let weights = config.weights()?;
        let window = config.window()?;
        Ok(Self {
            config,
            indicators,
            scoring,
            weights,
            window,
        })
    }

    /// Default configuration and indicator table
    pub fn with_defaults() -> Result<Self, IndexError> {
        Self::new(EngineConfig::default(), IndicatorConfigTable::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn indicators(&self) -> &IndicatorConfigTable {
        &self.indicators
    }

    pub fn window(&self) -> AnalysisWindow {
        self.window
    }

    /// Daily indicator rows and computed stringency for one territory
    pub fn timeline(
        &self,
        territory: &Territory,
        events: &[PolicyEvent],
    ) -> Result<(Vec<DailyIndicatorRow>, StringencySeries), IndexError> {
        let own: Vec<PolicyEvent> = events
            .iter()
            .filter(|e| e.applies_to(territory))
            .cloned()
            .collect();
        let rows = TimelineExpander::new(&self.indicators, &self.scoring).expand(&own, self.window)?;
        let stringency = StringencyAggregator::new(&self.indicators).score_timeline(&rows);
        Ok((rows, stringency))
    }

    /// Stringency series of `territory` from `source`, restricted to the window
    pub fn stringency(
        &self,
        source: StringencySource,
        territory: &Territory,
        inputs: &PipelineInputs,
    ) -> Result<StringencySeries, IndexError> {
        let mut series = match source {
            StringencySource::Wntrac => self.timeline(territory, &inputs.events)?.1,
            StringencySource::Oxcgrt => external_series(&inputs.stringency, territory)
                .into_iter()
                .filter(|p| p.date >= self.window.start && p.date <= self.window.end)
                .collect(),
        };
        if self.config.drop_zero_stringency {
            series.retain(|p| p.value != 0.0);
        }
        Ok(series)
    }

    /// Check that every active event's value can be scored
    pub fn validate_events(&self, events: &[PolicyEvent]) -> Vec<EventIssue> {
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.restriction_active && self.scoring.contains(e.code))
            .filter_map(|(index, event)| {
                let error = self.scoring.score(event.code, &event.value).err()?;
                Some(EventIssue {
                    index,
                    event_id: event.event_id.clone(),
                    code: event.code,
                    date: event.date,
                    message: error.to_string(),
                })
            })
            .collect()
    }

    /// Compute the index table for every territory in `inputs`
    pub fn run(&self, inputs: &PipelineInputs) -> Result<(IndexTable, RunSummary), IndexError> {
        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            territories = inputs.territories.len(),
            weights = %self.weights,
            start = %self.window.start,
            end = %self.window.end,
            "computing NPI index"
        );

        #[cfg(feature = "parallel")]
        let results: Vec<Result<TerritoryResult, IndexError>> = inputs
            .territories
            .par_iter()
            .map(|territory| self.compute_territory(territory, inputs))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<TerritoryResult, IndexError>> = inputs
            .territories
            .iter()
            .map(|territory| self.compute_territory(territory, inputs))
            .collect();

        let results = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        let series_computed = results.iter().map(|r| r.computed).sum();
        let mut skipped = Vec::new();
        let mut per_territory = Vec::with_capacity(results.len());
        for result in results {
            skipped.extend(result.skipped);
            per_territory.push(result.rows);
        }

        let table = IndexTable::assemble(
            self.config.sources.clone(),
            self.config.categories.clone(),
            per_territory,
        );

        let summary = RunSummary {
            run_id,
            generated_at: Utc::now(),
            producer: PRODUCER_NAME.to_string(),
            producer_version: NPI_VERSION.to_string(),
            weight_ratio: self.weights,
            window: self.window,
            sources: self.config.sources.clone(),
            categories: self.config.categories.clone(),
            territories: inputs.territories.len(),
            series_computed,
            rows: table.len(),
            skipped,
        };

        info!(
            rows = summary.rows,
            series = summary.series_computed,
            skipped = summary.skipped.len(),
            "NPI index computed"
        );

        Ok((table, summary))
    }

    fn compute_territory(
        &self,
        territory: &Territory,
        inputs: &PipelineInputs,
    ) -> Result<TerritoryResult, IndexError> {
        let territory = Arc::new(territory.clone());
        let label = territory.admin_label();
        let mut result = TerritoryResult::default();
        info!(territory = %label, "computing territory");

        let outcomes = match outcome_series(&inputs.outcomes, &territory) {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                result.skip(&label, None, None, e.to_string());
                return Ok(result);
            }
        };

        let mobility: Vec<(MobilityCategory, Result<Vec<MobilityPoint>, IndexError>)> = self
            .config
            .categories
            .iter()
            .map(|&category| {
                let series = mobility_series(&inputs.mobility, &territory, category, self.config.ewm_span);
                (category, series)
            })
            .collect();

        let mut index_rows: Vec<NpiIndexRow> = Vec::new();
        for &source in &self.config.sources {
            let stringency = self.stringency(source, &territory, inputs)?;

            for (category, observed) in &mobility {
                let observed = match observed {
                    Ok(observed) => observed,
                    Err(e) => {
                        result.skip(&label, Some(source), Some(*category), e.to_string());
                        continue;
                    }
                };
                match self.index_series(&territory, source, *category, &stringency, observed, &outcomes) {
                    Ok(rows) => {
                        result.computed += 1;
                        index_rows.extend(rows);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => result.skip(&label, Some(source), Some(*category), e.to_string()),
                }
            }
        }

        result.rows = merge_territory(&territory, &index_rows);
        info!(
            territory = %label,
            days = result.rows.len(),
            series = result.computed,
            "territory computed"
        );
        Ok(result)
    }

    fn index_series(
        &self,
        territory: &Arc<Territory>,
        source: StringencySource,
        category: MobilityCategory,
        stringency: &StringencySeries,
        observed: &[MobilityPoint],
        outcomes: &[OutcomePoint],
    ) -> Result<Vec<NpiIndexRow>, IndexError> {
        let aligned = align(stringency, observed, outcomes)?;
        let (_, scored) = score_adherence(&aligned)?;
        Ok(combine(territory, source, category, &aligned, &scored, self.weights))
    }
}

/// Compute the NPI index table for all territories in one call.
///
/// # Example
/// ```ignore
/// let (table, summary) = compute_npi_index(&inputs, EngineConfig::default(), IndicatorConfigTable::default())?;
/// ```
pub fn compute_npi_index(
    inputs: &PipelineInputs,
    config: EngineConfig,
    indicators: IndicatorConfigTable,
) -> Result<(IndexTable, RunSummary), IndexError> {
    NpiIndexEngine::new(config, indicators)?.run(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Evidence, RawValue};
    use pretty_assertions::assert_eq;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, day).unwrap()
    }

    fn config(days: u32) -> EngineConfig {
        EngineConfig {
            categories: vec![MobilityCategory::Workplaces, MobilityCategory::Parks],
            sources: vec![StringencySource::Wntrac],
            window_start: date(1),
            window_end: Some(date(days)),
            ..EngineConfig::default()
        }
    }

    fn kenya() -> Territory {
        Territory::country("Kenya", "KE", "KEN", 53_771_300)
    }

    fn mask_event(day: u32, value: &str) -> PolicyEvent {
        PolicyEvent {
            event_id: Some(format!("e{}", day)),
            code: IndicatorCode::H1,
            date: date(day),
            country: "KEN".into(),
            region: None,
            restriction_active: true,
            value: RawValue::parse(value),
            evidence: vec![Evidence {
                text: "masks".into(),
                fine_grained_location: Some("na".into()),
            }],
        }
    }

    fn inputs(days: u32) -> PipelineInputs {
        PipelineInputs {
            territories: vec![kenya()],
            events: vec![mask_event(3, "Mandatory")],
            stringency: Vec::new(),
            mobility: (1..=days)
                .map(|d| MobilityRecord {
                    date: date(d),
                    country_region_code: "KE".into(),
                    workplaces: Some(-20.0),
                    ..Default::default()
                })
                .collect(),
            outcomes: (1..=days)
                .map(|d| OutcomeRecord {
                    date: date(d),
                    country_id: "KE".into(),
                    province_id: None,
                    confirmed_cases: d as f64,
                    deaths: 0.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_run_produces_one_row_per_day() {
        let (table, summary) =
            compute_npi_index(&inputs(10), config(10), IndicatorConfigTable::default()).unwrap();

        assert_eq!(table.len(), 10);
        assert_eq!(summary.series_computed, 1);
        assert_eq!(summary.territories, 1);
        assert_eq!(summary.producer, PRODUCER_NAME);

        let day3 = table.rows[2]
            .get(StringencySource::Wntrac, MobilityCategory::Workplaces)
            .unwrap();
        assert!((day3.stringency - 6.25).abs() < 1e-9);
        assert!((day3.npi_index - (0.5 * 6.25 + 50.0)).abs() < 1e-6);
    }

    #[test]
    fn test_missing_category_is_skipped_not_fatal() {
        let (table, summary) =
            compute_npi_index(&inputs(10), config(10), IndicatorConfigTable::default()).unwrap();

        assert_eq!(summary.skipped.len(), 1);
        let skipped = &summary.skipped[0];
        assert_eq!(skipped.territory, "Kenya(KE)");
        assert_eq!(skipped.category, Some(MobilityCategory::Parks));
        assert!(table.rows.iter().all(|r| r.get(StringencySource::Wntrac, MobilityCategory::Parks).is_none()));
    }

    #[test]
    fn test_territory_without_outcomes_is_skipped() {
        let mut data = inputs(10);
        data.territories.push(Territory::country("Uganda", "UG", "UGA", 1));
        let (table, summary) =
            compute_npi_index(&data, config(10), IndicatorConfigTable::default()).unwrap();

        assert_eq!(table.len(), 10);
        assert!(summary
            .skipped
            .iter()
            .any(|s| s.territory == "Uganda(UG)" && s.source.is_none()));
    }

    #[test]
    fn test_uninterpretable_value_aborts_run() {
        let mut data = inputs(10);
        data.events.push(PolicyEvent {
            code: IndicatorCode::I1,
            value: RawValue::parse("a few people"),
            ..mask_event(4, "")
        });
        let result = compute_npi_index(&data, config(10), IndicatorConfigTable::default());
        assert!(matches!(result, Err(IndexError::UninterpretableValue { .. })));
    }

    #[test]
    fn test_constant_stringency_is_singular() {
        let mut data = inputs(10);
        data.events.clear();
        let (table, summary) =
            compute_npi_index(&data, config(10), IndicatorConfigTable::default()).unwrap();
        assert!(table.is_empty());
        assert!(summary.skipped.iter().any(|s| s.reason.contains("singular")));
    }

    #[test]
    fn test_drop_zero_stringency() {
        let mut data = inputs(10);
        data.events.push(mask_event(6, "Recommended"));
        let config = EngineConfig {
            drop_zero_stringency: true,
            ..config(10)
        };
        let (table, _) = compute_npi_index(&data, config, IndicatorConfigTable::default()).unwrap();
        assert_eq!(table.len(), 8);
        assert_eq!(table.rows[0].date, date(3));
    }

    #[test]
    fn test_external_source_used_for_oxcgrt() {
        let mut data = inputs(10);
        data.stringency = (1..=10)
            .map(|d| StringencyRecord {
                date: date(d),
                country_code: "KEN".into(),
                region_code: None,
                stringency_index: Some(if d < 5 { 20.0 } else { 60.0 }),
            })
            .collect();
        let config = EngineConfig {
            sources: StringencySource::ALL.to_vec(),
            ..config(10)
        };
        let (table, summary) = compute_npi_index(&data, config, IndicatorConfigTable::default()).unwrap();
        assert_eq!(summary.series_computed, 2);
        let last = table.rows[9]
            .get(StringencySource::Oxcgrt, MobilityCategory::Workplaces)
            .unwrap();
        assert!((last.stringency - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeline_filters_to_territory() {
        let engine = NpiIndexEngine::new(config(5), IndicatorConfigTable::default()).unwrap();
        let mut events = vec![mask_event(2, "Mandatory")];
        events.push(PolicyEvent {
            country: "UGA".into(),
            ..mask_event(1, "Mandatory")
        });
        let (rows, stringency) = engine.timeline(&kenya(), &events).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(stringency[0].value, 0.0);
        assert!((stringency[1].value - 6.25).abs() < 1e-9);
    }

    #[test]
    fn test_validate_events_reports_bad_values() {
        let engine = NpiIndexEngine::with_defaults().unwrap();
        let events = vec![
            mask_event(1, "Mandatory"),
            PolicyEvent {
                code: IndicatorCode::I1,
                value: RawValue::parse("dozens"),
                ..mask_event(2, "")
            },
        ];
        let issues = engine.validate_events(&events);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].index, 1);
        assert_eq!(issues[0].code, IndicatorCode::I1);
    }

    #[test]
    fn test_invalid_weight_ratio_rejected_at_construction() {
        let config = EngineConfig {
            weight_ratio: "0.5-0.5".into(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            NpiIndexEngine::new(config, IndicatorConfigTable::default()),
            Err(IndexError::InvalidWeightRatio(_))
        ));
    }
}
