//! Core types for the NPI index pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: reference data, policy events, daily indicator rows, the aligned
//! per-day table and the final index rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::IndexError;

/// Country or sub-national region, the unit of independent computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    #[serde(rename = "admin0_name", alias = "admin0_iso_name")]
    pub country_name: String,
    #[serde(rename = "admin0_iso2")]
    pub country_iso2: String,
    #[serde(rename = "admin0_iso3")]
    pub country_iso3: String,
    #[serde(rename = "admin1_name", alias = "admin1_iso_name", default)]
    pub region_name: Option<String>,
    #[serde(rename = "admin1_iso2", default)]
    pub region_iso2: Option<String>,
    #[serde(rename = "admin1_iso3", default)]
    pub region_iso3: Option<String>,
    #[serde(alias = "Population")]
    pub population: u64,
}

impl Territory {
    /// Country-level territory
    pub fn country(name: &str, iso2: &str, iso3: &str, population: u64) -> Self {
        Self {
            country_name: name.to_string(),
            country_iso2: iso2.to_string(),
            country_iso3: iso3.to_string(),
            region_name: None,
            region_iso2: None,
            region_iso3: None,
            population,
        }
    }

    /// Sub-national territory inside `self`'s country
    pub fn with_region(mut self, name: &str, iso2: &str, iso3: &str, population: u64) -> Self {
        self.region_name = Some(name.to_string());
        self.region_iso2 = Some(iso2.to_string());
        self.region_iso3 = Some(iso3.to_string());
        self.population = population;
        self
    }

    pub fn is_regional(&self) -> bool {
        self.region_name.is_some()
    }

    /// Region name for sub-national territories, otherwise the country name
    pub fn display_name(&self) -> &str {
        self.region_name.as_deref().unwrap_or(&self.country_name)
    }

    /// `Name(ISO2)` label used in the `admin` output column
    pub fn admin_label(&self) -> String {
        let iso = self.region_iso2.as_deref().unwrap_or(&self.country_iso2);
        format!("{}({})", self.display_name(), iso)
    }
}

/// Intervention indicator codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorCode {
    /// Mass gatherings
    I1,
    /// Public transportation
    I2,
    /// International flight restrictions
    I3,
    /// Domestic flight restriction
    I4,
    /// Freedom of movement (nationality dependent)
    I5,
    /// Work restrictions
    I6,
    /// Confinement
    I7,
    /// Travel quarantine policies
    I8,
    /// Prison-related policies
    I9,
    /// School closure
    A1,
    /// Public services closure
    A2,
    /// Entertainment/cultural sector closure
    A3,
    /// Mask wearing
    H1,
    /// State of emergency (legal impact)
    L1,
    /// Contact tracing
    L2,
    /// Economic impact
    L3,
    #[serde(rename = "other")]
    Other,
}

impl IndicatorCode {
    pub const ALL: [IndicatorCode; 17] = [
        IndicatorCode::I1,
        IndicatorCode::I2,
        IndicatorCode::I3,
        IndicatorCode::I4,
        IndicatorCode::I5,
        IndicatorCode::I6,
        IndicatorCode::I7,
        IndicatorCode::I8,
        IndicatorCode::I9,
        IndicatorCode::A1,
        IndicatorCode::A2,
        IndicatorCode::A3,
        IndicatorCode::H1,
        IndicatorCode::L1,
        IndicatorCode::L2,
        IndicatorCode::L3,
        IndicatorCode::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorCode::I1 => "I1",
            IndicatorCode::I2 => "I2",
            IndicatorCode::I3 => "I3",
            IndicatorCode::I4 => "I4",
            IndicatorCode::I5 => "I5",
            IndicatorCode::I6 => "I6",
            IndicatorCode::I7 => "I7",
            IndicatorCode::I8 => "I8",
            IndicatorCode::I9 => "I9",
            IndicatorCode::A1 => "A1",
            IndicatorCode::A2 => "A2",
            IndicatorCode::A3 => "A3",
            IndicatorCode::H1 => "H1",
            IndicatorCode::L1 => "L1",
            IndicatorCode::L2 => "L2",
            IndicatorCode::L3 => "L3",
            IndicatorCode::Other => "other",
        }
    }

    /// Map a textual event type (as recorded in the event dataset) to its code
    pub fn from_event_type(event_type: &str) -> Result<Self, IndexError> {
        let code = match event_type.trim().to_lowercase().as_str() {
            "economic impact" => IndicatorCode::L3,
            "school closure" => IndicatorCode::A1,
            "entertainment/cultural sector closure" => IndicatorCode::A3,
            "state of emergency (legal impact)" => IndicatorCode::L1,
            "public transportation" => IndicatorCode::I2,
            "public services closure" => IndicatorCode::A2,
            "mass gatherings" => IndicatorCode::I1,
            "introduction of travel quarantine policies" => IndicatorCode::I8,
            "work restrictions" => IndicatorCode::I6,
            "changes in prison-related policies" => IndicatorCode::I9,
            "confinement" => IndicatorCode::I7,
            "mask wearing" => IndicatorCode::H1,
            "freedom of movement (nationality dependent)" => IndicatorCode::I5,
            "contact tracing" => IndicatorCode::L2,
            "domestic flight restriction" => IndicatorCode::I4,
            "international flight restrictions" => IndicatorCode::I3,
            "other" => IndicatorCode::Other,
            _ => return Err(IndexError::UnknownEventType(event_type.to_string())),
        };
        Ok(code)
    }
}

impl fmt::Display for IndicatorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorCode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        IndicatorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| IndexError::UnknownIndicator(s.to_string()))
    }
}

/// Raw attribute value of a policy event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Missing,
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Parse a tabular field: empty is missing, numeric text is a number
    pub fn parse(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return RawValue::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => RawValue::Number(n),
            Ok(_) => RawValue::Missing,
            Err(_) => RawValue::Text(trimmed.to_string()),
        }
    }

    pub fn text(value: &str) -> Self {
        if value.trim().is_empty() {
            RawValue::Missing
        } else {
            RawValue::Text(value.to_string())
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            RawValue::Missing => true,
            RawValue::Text(s) => s.trim().is_empty(),
            RawValue::Number(_) => false,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Missing => Ok(()),
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// Evidence record attached to a policy event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    /// Sub-location the evidence refers to ("na" when general)
    pub fine_grained_location: Option<String>,
}

/// One recorded intervention action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvent {
    pub event_id: Option<String>,
    pub code: IndicatorCode,
    pub date: NaiveDate,
    /// Country ISO3
    pub country: String,
    /// Region ISO3, `None` for country-level events
    pub region: Option<String>,
    pub restriction_active: bool,
    pub value: RawValue,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl PolicyEvent {
    /// Evidence texts joined with `|`
    pub fn note(&self) -> String {
        self.evidence
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Fine-grained locations joined with `|`, or "na" when none is specific
    pub fn fine_grained_location(&self) -> String {
        let specific: Vec<&str> = self
            .evidence
            .iter()
            .filter_map(|e| e.fine_grained_location.as_deref())
            .map(str::trim)
            .filter(|loc| !loc.is_empty() && *loc != "na")
            .collect();
        if specific.is_empty() {
            "na".to_string()
        } else {
            specific.join("|")
        }
    }

    /// Whether this event belongs to `territory`
    pub fn applies_to(&self, territory: &Territory) -> bool {
        if self.country != territory.country_iso3 {
            return false;
        }
        match (&territory.region_iso3, &self.region) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (None, None) => true,
            _ => false,
        }
    }
}

/// Per-indicator configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub indicator: IndicatorCode,
    pub max_value: u8,
    /// 1 when the indicator supports the targeted-vs-general adjustment
    pub flag: u8,
}

impl IndicatorConfig {
    pub fn new(indicator: IndicatorCode, max_value: u8, flag: u8) -> Self {
        Self {
            indicator,
            max_value,
            flag,
        }
    }

    pub fn has_targeting_adjustment(&self) -> bool {
        self.flag == 1
    }
}

/// State of one indicator on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub code: IndicatorCode,
    /// Ordinal severity
    pub level: u8,
    /// 1 = general, 0 = targeted to a sub-location
    pub targeted_flag: u8,
    pub note: Arc<str>,
}

impl IndicatorValue {
    pub fn blank(code: IndicatorCode) -> Self {
        Self {
            code,
            level: 0,
            targeted_flag: 0,
            note: Arc::from(""),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.level == 0 && self.targeted_flag == 0 && self.note.is_empty()
    }
}

/// All indicator values of one territory on one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyIndicatorRow {
    pub date: NaiveDate,
    pub values: Vec<IndicatorValue>,
}

impl DailyIndicatorRow {
    pub fn value(&self, code: IndicatorCode) -> Option<&IndicatorValue> {
        self.values.iter().find(|v| v.code == code)
    }
}

/// Composite stringency for one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StringencyPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Stringency series for one territory, ordered by date
pub type StringencySeries = Vec<StringencyPoint>;

/// Where the stringency series comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringencySource {
    /// Computed from policy events
    Wntrac,
    /// Supplied by the external stringency dataset
    Oxcgrt,
}

impl StringencySource {
    pub const ALL: [StringencySource; 2] = [StringencySource::Wntrac, StringencySource::Oxcgrt];

    pub fn as_str(&self) -> &'static str {
        match self {
            StringencySource::Wntrac => "wntrac",
            StringencySource::Oxcgrt => "oxcgrt",
        }
    }
}

impl fmt::Display for StringencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mobility category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityCategory {
    Workplaces,
    RetailAndRecreation,
    GroceryAndPharmacy,
    Parks,
    TransitStations,
    Residential,
}

impl MobilityCategory {
    pub const ALL: [MobilityCategory; 6] = [
        MobilityCategory::Workplaces,
        MobilityCategory::RetailAndRecreation,
        MobilityCategory::GroceryAndPharmacy,
        MobilityCategory::Parks,
        MobilityCategory::TransitStations,
        MobilityCategory::Residential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MobilityCategory::Workplaces => "workplaces",
            MobilityCategory::RetailAndRecreation => "retail_and_recreation",
            MobilityCategory::GroceryAndPharmacy => "grocery_and_pharmacy",
            MobilityCategory::Parks => "parks",
            MobilityCategory::TransitStations => "transit_stations",
            MobilityCategory::Residential => "residential",
        }
    }
}

impl fmt::Display for MobilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw mobility record (percent change from baseline per category)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MobilityRecord {
    pub date: NaiveDate,
    /// Country ISO2
    pub country_region_code: String,
    /// Region name, `None` for country-level rows
    pub sub_region_1: Option<String>,
    pub workplaces: Option<f64>,
    pub retail_and_recreation: Option<f64>,
    pub grocery_and_pharmacy: Option<f64>,
    pub parks: Option<f64>,
    pub transit_stations: Option<f64>,
    pub residential: Option<f64>,
}

impl MobilityRecord {
    pub fn value(&self, category: MobilityCategory) -> Option<f64> {
        match category {
            MobilityCategory::Workplaces => self.workplaces,
            MobilityCategory::RetailAndRecreation => self.retail_and_recreation,
            MobilityCategory::GroceryAndPharmacy => self.grocery_and_pharmacy,
            MobilityCategory::Parks => self.parks,
            MobilityCategory::TransitStations => self.transit_stations,
            MobilityCategory::Residential => self.residential,
        }
    }
}

/// Raw cumulative outcome record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub date: NaiveDate,
    /// Country ISO2
    pub country_id: String,
    /// Region ISO2, `None` for country-level rows
    pub province_id: Option<String>,
    pub confirmed_cases: f64,
    pub deaths: f64,
}

/// Raw row of the external stringency dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringencyRecord {
    pub date: NaiveDate,
    /// Country ISO3
    pub country_code: String,
    /// Region code (e.g. `US_NY`), `None` or "0" for country level
    pub region_code: Option<String>,
    pub stringency_index: Option<f64>,
}

/// Smoothed observed mobility for one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MobilityPoint {
    pub date: NaiveDate,
    pub observed: f64,
}

/// Cumulative outcomes for one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomePoint {
    pub date: NaiveDate,
    pub confirmed_cases: f64,
    pub deaths: f64,
}

/// One day of the joined stringency/mobility/outcome table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedDay {
    pub date: NaiveDate,
    pub confirmed_cases: f64,
    pub deaths: f64,
    pub stringency: f64,
    pub observed_mobility: f64,
}

/// Final index for one (territory, category, source) on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpiIndexRow {
    pub date: NaiveDate,
    pub territory: Arc<Territory>,
    pub source: StringencySource,
    pub category: MobilityCategory,
    pub confirmed_cases: f64,
    pub deaths: f64,
    pub observed_mobility: f64,
    pub stringency: f64,
    pub anticipated_mobility: f64,
    pub deviation_ratio: f64,
    pub adherence: f64,
    pub npi_index: f64,
}
