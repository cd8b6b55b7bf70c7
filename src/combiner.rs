//! Index combination and table assembly
//!
//! Weighs stringency and adherence into the NPI index, then merges the
//! per-(source, category) series of a territory into one wide row per day and
//! concatenates territories into the output table.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::adherence::AdherenceDay;
use crate::error::IndexError;
use crate::types::{AlignedDay, MobilityCategory, NpiIndexRow, StringencySource, Territory};

/// Stringency/adherence weights parsed from `"w_s/w_a"`.
///
/// The weights are expected to sum to 1.0; this is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightRatio {
    pub stringency: f64,
    pub adherence: f64,
}

impl Default for WeightRatio {
    fn default() -> Self {
        Self {
            stringency: 0.5,
            adherence: 0.5,
        }
    }
}

impl FromStr for WeightRatio {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IndexError::InvalidWeightRatio(s.to_string());
        let (ws, wa) = s.split_once('/').ok_or_else(invalid)?;
        let stringency: f64 = ws.trim().parse().map_err(|_| invalid())?;
        let adherence: f64 = wa.trim().parse().map_err(|_| invalid())?;
        if !stringency.is_finite() || !adherence.is_finite() {
            return Err(invalid());
        }
        Ok(Self {
            stringency,
            adherence,
        })
    }
}

impl fmt::Display for WeightRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stringency, self.adherence)
    }
}

impl WeightRatio {
    /// `w_s · stringency + w_a · adherence · 100`
    pub fn npi_index(&self, stringency: f64, adherence: f64) -> f64 {
        self.stringency * stringency + self.adherence * adherence * 100.0
    }
}

/// Index rows for one (territory, source, category)
pub fn combine(
    territory: &Arc<Territory>,
    source: StringencySource,
    category: MobilityCategory,
    aligned: &[AlignedDay],
    scored: &[AdherenceDay],
    weights: WeightRatio,
) -> Vec<NpiIndexRow> {
    aligned
        .iter()
        .zip(scored)
        .map(|(day, score)| NpiIndexRow {
            date: day.date,
            territory: Arc::clone(territory),
            source,
            category,
            confirmed_cases: day.confirmed_cases,
            deaths: day.deaths,
            observed_mobility: day.observed_mobility,
            stringency: day.stringency,
            anticipated_mobility: score.anticipated_mobility,
            deviation_ratio: score.deviation_ratio,
            adherence: score.adherence,
            npi_index: weights.npi_index(day.stringency, score.adherence),
        })
        .collect()
}

/// Index values of one (source, category) pair on one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexColumns {
    pub observed_mobility: f64,
    pub stringency: f64,
    pub anticipated_mobility: f64,
    pub deviation_ratio: f64,
    pub adherence: f64,
    pub npi_index: f64,
}

impl From<&NpiIndexRow> for IndexColumns {
    fn from(row: &NpiIndexRow) -> Self {
        Self {
            observed_mobility: row.observed_mobility,
            stringency: row.stringency,
            anticipated_mobility: row.anticipated_mobility,
            deviation_ratio: row.deviation_ratio,
            adherence: row.adherence,
            npi_index: row.npi_index,
        }
    }
}

/// One territory on one day, with every available (source, category) group
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub date: NaiveDate,
    pub deaths: f64,
    pub confirmed_cases: f64,
    pub columns: BTreeMap<(StringencySource, MobilityCategory), IndexColumns>,
    pub territory: Arc<Territory>,
}

impl WideRow {
    pub fn get(&self, source: StringencySource, category: MobilityCategory) -> Option<&IndexColumns> {
        self.columns.get(&(source, category))
    }
}

/// Outer-join a territory's index rows on date
pub fn merge_territory(territory: &Arc<Territory>, rows: &[NpiIndexRow]) -> Vec<WideRow> {
    let mut by_date: BTreeMap<NaiveDate, WideRow> = BTreeMap::new();
    for row in rows {
        let wide = by_date.entry(row.date).or_insert_with(|| WideRow {
            date: row.date,
            deaths: row.deaths,
            confirmed_cases: row.confirmed_cases,
            columns: BTreeMap::new(),
            territory: Arc::clone(territory),
        });
        wide.columns
            .entry((row.source, row.category))
            .or_insert_with(|| IndexColumns::from(row));
    }
    by_date.into_values().collect()
}

/// Complete multi-territory output
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTable {
    pub sources: Vec<StringencySource>,
    pub categories: Vec<MobilityCategory>,
    pub rows: Vec<WideRow>,
}

impl IndexTable {
    /// Concatenate per-territory tables and sort by date.
    ///
    /// The sort is stable, so rows of one date keep territory order.
    pub fn assemble(
        sources: Vec<StringencySource>,
        categories: Vec<MobilityCategory>,
        territories: Vec<Vec<WideRow>>,
    ) -> Self {
        let mut rows: Vec<WideRow> = territories.into_iter().flatten().collect();
        rows.sort_by_key(|r| r.date);
        Self {
            sources,
            categories,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
