//! Indicator scoring
//!
//! Maps a raw policy-event value to an ordinal severity level. Every indicator
//! code dispatches to exactly one [`ScoringRule`]; codes without a rule are
//! rejected when the [`ScoringTable`] is built, so a run never starts with an
//! indicator it cannot score.

use std::collections::HashMap;

use crate::config::IndicatorConfigTable;
use crate::error::IndexError;
use crate::types::{IndicatorCode, RawValue};

/// Table-driven rule for categorical indicators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnumeratedRule {
    /// Exact value → level
    pub levels: &'static [(&'static str, u8)],
    /// Level for a missing/empty value
    pub blank: u8,
    /// Level for any value not in `levels`
    pub unrecognized: u8,
}

/// How a raw value is turned into a severity level
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoringRule {
    /// Maximum allowed gathering size; smaller limits are more severe
    GatheringSize,
    /// Nationwide vs. partial scope. `general` scores 2, any other value 1,
    /// missing 0.
    Scope { general: &'static str },
    Enumerated(EnumeratedRule),
}

const PUBLIC_TRANSPORT: EnumeratedRule = EnumeratedRule {
    levels: &[
        ("Partial cancellation of routes/stops during the week/weekend", 1),
        ("na", 1),
        (
            "Total cancellation of transport (special case for some states in China)",
            2,
        ),
    ],
    blank: 1,
    unrecognized: 0,
};

const WORK_RESTRICTIONS: EnumeratedRule = EnumeratedRule {
    levels: &[
        ("Suggestion to work from home for non-essential workers", 1),
        ("na", 1),
        ("Mandatory work from home enforcement for non-essential workers", 2),
    ],
    blank: 1,
    unrecognized: 0,
};

const CONFINEMENT: EnumeratedRule = EnumeratedRule {
    levels: &[
        ("Mandatory/advised for people at risk", 1),
        ("na", 1),
        ("Mandatory/advisedfor all the population", 2),
        ("Mandatory/advised for all the population", 2),
    ],
    blank: 1,
    unrecognized: 0,
};

const MASK_WEARING: EnumeratedRule = EnumeratedRule {
    levels: &[
        ("Mandatory", 3),
        ("Mandatory in some public spaces", 2),
        ("Recommended", 2),
        ("na", 2),
        ("other", 2),
    ],
    blank: 0,
    unrecognized: 0,
};

impl ScoringRule {
    /// Rule for `code`, `None` for codes that are tracked but never scored
    pub fn for_code(code: IndicatorCode) -> Option<ScoringRule> {
        let rule = match code {
            IndicatorCode::I1 => ScoringRule::GatheringSize,
            IndicatorCode::I2 => ScoringRule::Enumerated(PUBLIC_TRANSPORT),
            IndicatorCode::I3
            | IndicatorCode::I4
            | IndicatorCode::I5
            | IndicatorCode::I8
            | IndicatorCode::I9
            | IndicatorCode::A2
            | IndicatorCode::A3 => ScoringRule::Scope { general: "all" },
            IndicatorCode::A1 => ScoringRule::Scope {
                general: "All schools (general) closed",
            },
            IndicatorCode::I6 => ScoringRule::Enumerated(WORK_RESTRICTIONS),
            IndicatorCode::I7 => ScoringRule::Enumerated(CONFINEMENT),
            IndicatorCode::H1 => ScoringRule::Enumerated(MASK_WEARING),
            IndicatorCode::L1 | IndicatorCode::L2 | IndicatorCode::L3 | IndicatorCode::Other => {
                return None
            }
        };
        Some(rule)
    }

    /// Highest level this rule can produce
    pub fn max_level(&self) -> u8 {
        match self {
            ScoringRule::GatheringSize => 4,
            ScoringRule::Scope { .. } => 2,
            ScoringRule::Enumerated(rule) => rule
                .levels
                .iter()
                .map(|(_, level)| *level)
                .chain([rule.blank, rule.unrecognized])
                .max()
                .unwrap_or(0),
        }
    }

    /// Score a raw value
    pub fn score(&self, code: IndicatorCode, value: &RawValue) -> Result<u8, IndexError> {
        match self {
            ScoringRule::GatheringSize => score_gathering_size(code, value),
            ScoringRule::Scope { general } => Ok(match value {
                v if v.is_missing() => 0,
                RawValue::Text(s) if s.trim() == *general => 2,
                _ => 1,
            }),
            ScoringRule::Enumerated(rule) => Ok(match value {
                v if v.is_missing() => rule.blank,
                RawValue::Text(s) => rule
                    .levels
                    .iter()
                    .find(|(label, _)| *label == s.trim())
                    .map(|(_, level)| *level)
                    .unwrap_or(rule.unrecognized),
                _ => rule.unrecognized,
            }),
        }
    }
}

fn score_gathering_size(code: IndicatorCode, value: &RawValue) -> Result<u8, IndexError> {
    let limit = match value {
        RawValue::Missing => return Ok(4),
        RawValue::Text(s) if value.is_missing() || s.trim().eq_ignore_ascii_case("na") => {
            return Ok(4)
        }
        RawValue::Number(n) => n.trunc() as i64,
        RawValue::Text(s) => s.trim().parse::<i64>().map_err(|_| {
            IndexError::UninterpretableValue {
                indicator: code.to_string(),
                value: s.clone(),
            }
        })?,
    };

    Ok(match limit {
        l if l <= 10 => 4,
        11..=100 => 3,
        101..=1000 => 2,
        _ => 1,
    })
}

/// Targeting flag derived from a fine-grained location:
/// 1 for general ("na" or empty), 0 for targeted to a sub-location
pub fn score_targeting(fine_grained_location: &str) -> u8 {
    let location = fine_grained_location.trim();
    if location == "na" || location.is_empty() {
        1
    } else {
        0
    }
}

/// Scoring rules for every configured indicator, verified up front
#[derive(Debug, Clone)]
pub struct ScoringTable {
    rules: HashMap<IndicatorCode, ScoringRule>,
}

impl ScoringTable {
    /// Build the dispatch table for `config`.
    ///
    /// Fails if a configured indicator has no rule, or if a rule can produce a
    /// level above the configured maximum.
    pub fn build(config: &IndicatorConfigTable) -> Result<Self, IndexError> {
        let mut rules = HashMap::with_capacity(config.len());
        for entry in config.entries() {
            let rule = ScoringRule::for_code(entry.indicator)
                .ok_or_else(|| IndexError::NoScoringRule(entry.indicator.to_string()))?;
            if rule.max_level() > entry.max_value {
                return Err(IndexError::RuleExceedsMaximum {
                    indicator: entry.indicator.to_string(),
                    rule_max: rule.max_level(),
                    configured_max: entry.max_value,
                });
            }
            rules.insert(entry.indicator, rule);
        }
        Ok(Self { rules })
    }

    /// Severity level of `value` for `code`
    pub fn score(&self, code: IndicatorCode, value: &RawValue) -> Result<u8, IndexError> {
        self.rules
            .get(&code)
            .ok_or_else(|| IndexError::NoScoringRule(code.to_string()))?
            .score(code, value)
    }

    pub fn contains(&self, code: IndicatorCode) -> bool {
        self.rules.contains_key(&code)
    }
}
