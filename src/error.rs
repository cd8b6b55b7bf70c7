//! Error types for the NPI index engine

use thiserror::Error;

/// Errors that can occur while computing the NPI index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Unknown indicator code: {0}")]
    UnknownIndicator(String),

    #[error("Unknown policy event type: {0}")]
    UnknownEventType(String),

    #[error("No scoring rule for indicator {0}")]
    NoScoringRule(String),

    #[error("Cannot interpret value {value:?} for indicator {indicator}")]
    UninterpretableValue { indicator: String, value: String },

    #[error("Scoring rule for {indicator} reaches {rule_max} but configured maximum is {configured_max}")]
    RuleExceedsMaximum {
        indicator: String,
        rule_max: u8,
        configured_max: u8,
    },

    #[error("Invalid weight ratio: {0}")]
    InvalidWeightRatio(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing {series} data")]
    MissingInput { series: &'static str },

    #[error("Stringency, mobility and outcome series do not overlap")]
    NoOverlap,

    #[error("Regression is singular: {0}")]
    SingularRegression(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IndexError {
    /// Whether the error must abort the whole run.
    ///
    /// Missing inputs, disjoint date ranges and singular fits only affect one
    /// territory/category and are skipped by the pipeline. Everything else is
    /// a data-contract violation.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IndexError::MissingInput { .. } | IndexError::NoOverlap | IndexError::SingularRegression(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_territory_errors_are_not_fatal() {
        assert!(!IndexError::MissingInput { series: "mobility" }.is_fatal());
        assert!(!IndexError::NoOverlap.is_fatal());
        assert!(!IndexError::SingularRegression("det = 0".into()).is_fatal());
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(IndexError::UnknownIndicator("Z9".into()).is_fatal());
        assert!(IndexError::NoScoringRule("L1".into()).is_fatal());
        assert!(IndexError::UninterpretableValue {
            indicator: "I1".into(),
            value: "lots".into()
        }
        .is_fatal());
    }
}
