//! Run configuration
//!
//! Engine settings (weights, categories, sources, analysis window) and the
//! per-indicator scoring configuration.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::combiner::WeightRatio;
use crate::error::IndexError;
use crate::types::{IndicatorCode, IndicatorConfig, MobilityCategory, StringencySource};

/// Default EWM span (days) applied to observed mobility
pub const DEFAULT_EWM_SPAN: usize = 30;

/// Default stringency/adherence weights
pub const DEFAULT_WEIGHT_RATIO: &str = "0.5/0.5";

/// First day of the analysis window
pub fn epoch_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

/// Inclusive range of calendar days covered by the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AnalysisWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, IndexError> {
        if end < start {
            return Err(IndexError::InvalidConfig(format!(
                "analysis window ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Epoch start through today (UTC)
    pub fn through_today() -> Self {
        Self {
            start: epoch_start(),
            end: Utc::now().date_naive(),
        }
    }

    /// Number of days in the window, zero when `end` precedes `start`
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.len())
    }
}

/// Ordered per-indicator configuration; the order defines the indicator list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfigTable {
    entries: Vec<IndicatorConfig>,
}

impl Default for IndicatorConfigTable {
    fn default() -> Self {
        use IndicatorCode::*;
        Self::new(vec![
            IndicatorConfig::new(I1, 4, 1),
            IndicatorConfig::new(I2, 2, 1),
            IndicatorConfig::new(I3, 2, 0),
            IndicatorConfig::new(I4, 2, 1),
            IndicatorConfig::new(I5, 2, 0),
            IndicatorConfig::new(I6, 2, 1),
            IndicatorConfig::new(I7, 2, 1),
            IndicatorConfig::new(I8, 2, 0),
            IndicatorConfig::new(A1, 2, 1),
            IndicatorConfig::new(A2, 2, 1),
            IndicatorConfig::new(A3, 2, 1),
            IndicatorConfig::new(H1, 4, 1),
        ])
    }
}

impl IndicatorConfigTable {
    /// Build a table, keeping the first entry for duplicated indicators
    pub fn new(entries: Vec<IndicatorConfig>) -> Self {
        let mut unique: Vec<IndicatorConfig> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !unique.iter().any(|e| e.indicator == entry.indicator) {
                unique.push(entry);
            }
        }
        Self { entries: unique }
    }

    /// Reject empty tables and zero maxima
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.entries.is_empty() {
            return Err(IndexError::InvalidConfig(
                "indicator configuration is empty".to_string(),
            ));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.max_value == 0) {
            return Err(IndexError::InvalidConfig(format!(
                "indicator {} has max_value 0",
                entry.indicator
            )));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.flag > 1) {
            return Err(IndexError::InvalidConfig(format!(
                "indicator {} has flag {} (expected 0 or 1)",
                entry.indicator, entry.flag
            )));
        }
        Ok(())
    }

    pub fn entries(&self) -> &[IndicatorConfig] {
        &self.entries
    }

    pub fn codes(&self) -> impl Iterator<Item = IndicatorCode> + '_ {
        self.entries.iter().map(|e| e.indicator)
    }

    pub fn get(&self, code: IndicatorCode) -> Option<&IndicatorConfig> {
        self.entries.iter().find(|e| e.indicator == code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Engine settings for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stringency/adherence weights as "w_s/w_a"
    pub weight_ratio: String,
    pub categories: Vec<MobilityCategory>,
    pub sources: Vec<StringencySource>,
    pub window_start: NaiveDate,
    /// Defaults to today (UTC) when absent
    pub window_end: Option<NaiveDate>,
    pub ewm_span: usize,
    /// Remove days with zero stringency before alignment
    pub drop_zero_stringency: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weight_ratio: DEFAULT_WEIGHT_RATIO.to_string(),
            categories: MobilityCategory::ALL.to_vec(),
            sources: StringencySource::ALL.to_vec(),
            window_start: epoch_start(),
            window_end: None,
            ewm_span: DEFAULT_EWM_SPAN,
            drop_zero_stringency: false,
        }
    }
}

impl EngineConfig {
    /// Load from JSON; absent fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, IndexError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, IndexError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        self.weights()?;
        self.window()?;
        if self.ewm_span == 0 {
            return Err(IndexError::InvalidConfig("ewm_span must be positive".to_string()));
        }
        if self.categories.is_empty() {
            return Err(IndexError::InvalidConfig("no mobility categories".to_string()));
        }
        if self.sources.is_empty() {
            return Err(IndexError::InvalidConfig("no stringency sources".to_string()));
        }
        Ok(())
    }

    pub fn weights(&self) -> Result<WeightRatio, IndexError> {
        self.weight_ratio.parse()
    }

    pub fn window(&self) -> Result<AnalysisWindow, IndexError> {
        let end = self.window_end.unwrap_or_else(|| Utc::now().date_naive());
        AnalysisWindow::new(self.window_start, end)
    }
}
