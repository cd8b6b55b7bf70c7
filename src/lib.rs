//! NPI Index - daily composite index of non-pharmaceutical interventions
//!
//! Combines how strict a territory's interventions are (stringency) with how
//! well its population follows them (adherence) through a deterministic
//! pipeline: indicator scoring → timeline expansion → stringency aggregation
//! → mobility/outcome alignment → adherence regression → index combination.
//!
//! ## Modules
//!
//! - **Policy side**: [`scorer`], [`timeline`], [`stringency`]
//! - **Behaviour side**: [`align`], [`adherence`]
//! - **Output**: [`combiner`], [`table`]
//! - **Orchestration**: [`pipeline`], driven by [`config`]

pub mod adherence;
pub mod align;
pub mod combiner;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod scorer;
pub mod stringency;
pub mod table;
pub mod timeline;
pub mod types;

pub use combiner::{IndexTable, WeightRatio, WideRow};
pub use config::{AnalysisWindow, EngineConfig, IndicatorConfigTable};
pub use error::IndexError;
pub use pipeline::{compute_npi_index, NpiIndexEngine, PipelineInputs, RunSummary};
pub use scorer::ScoringTable;
pub use types::{IndicatorCode, MobilityCategory, StringencySource, Territory};

/// Engine version recorded in every run summary
pub const NPI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in every run summary
pub const PRODUCER_NAME: &str = "npi-index";
