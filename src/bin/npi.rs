//! NPI CLI - Command-line interface for the NPI index engine
//!
//! Commands:
//! - compute: Compute the wide NPI index table for a set of territories
//! - timeline: Expand one territory's policy events into daily rows (NDJSON)
//! - validate: Check policy events against the scoring rules

use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use tracing::info;
use tracing_subscriber::EnvFilter;

use npi_index::config::{EngineConfig, IndicatorConfigTable};
use npi_index::pipeline::{EventIssue, NpiIndexEngine, PipelineInputs};
use npi_index::table;
use npi_index::types::{IndicatorValue, MobilityCategory, PolicyEvent, StringencySource, Territory};
use npi_index::{IndexError, NPI_VERSION, PRODUCER_NAME};

/// NPI - daily composite index of non-pharmaceutical interventions
#[derive(Parser)]
#[command(name = "npi")]
#[command(version = NPI_VERSION)]
#[command(about = "Combine intervention stringency and mobility adherence into a daily index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the NPI index table
    Compute {
        /// Policy event table (CSV, use - for stdin)
        #[arg(long)]
        events: PathBuf,

        /// Separate evidence table keyed by event id (CSV)
        #[arg(long)]
        evidence: Option<PathBuf>,

        /// External stringency table (CSV)
        #[arg(long)]
        stringency: Option<PathBuf>,

        /// Mobility table (CSV)
        #[arg(long)]
        mobility: PathBuf,

        /// Outcome table (CSV)
        #[arg(long)]
        outcomes: PathBuf,

        /// Territory list (JSON array)
        #[arg(long)]
        territories: PathBuf,

        /// Indicator configuration table (CSV); built-in table when absent
        #[arg(long)]
        indicators: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Write the run summary (JSON) to this file
        #[arg(long)]
        manifest: Option<PathBuf>,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Expand one territory's events into daily indicator rows (NDJSON)
    Timeline {
        /// Policy event table (CSV, use - for stdin)
        #[arg(long)]
        events: PathBuf,

        /// Separate evidence table keyed by event id (CSV)
        #[arg(long)]
        evidence: Option<PathBuf>,

        /// Country ISO3
        #[arg(long)]
        country: String,

        /// Region ISO3 (omit for country level)
        #[arg(long)]
        region: Option<String>,

        /// Indicator configuration table (CSV)
        #[arg(long)]
        indicators: Option<PathBuf>,

        /// First day (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        start: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD), defaults to today
        #[arg(long, value_parser = parse_day)]
        end: Option<NaiveDate>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Validate policy events against the scoring rules
    Validate {
        /// Policy event table (CSV, use - for stdin)
        #[arg(long)]
        events: PathBuf,

        /// Indicator configuration table (CSV)
        #[arg(long)]
        indicators: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Command-line overrides applied on top of the engine configuration
#[derive(clap::Args)]
struct ConfigOverrides {
    /// Stringency/adherence weights as "w_s/w_a"
    #[arg(long)]
    weight_ratio: Option<String>,

    /// Mobility categories (comma separated)
    #[arg(long, value_delimiter = ',', value_parser = parse_category)]
    categories: Vec<MobilityCategory>,

    /// Stringency sources (comma separated: wntrac, oxcgrt)
    #[arg(long, value_delimiter = ',', value_parser = parse_source)]
    sources: Vec<StringencySource>,

    /// First day of the analysis window (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    start: Option<NaiveDate>,

    /// Last day of the analysis window (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    end: Option<NaiveDate>,

    /// EWM span in days for observed mobility
    #[arg(long)]
    ewm_span: Option<usize>,

    /// Remove zero-stringency days before alignment
    #[arg(long)]
    drop_zero_stringency: bool,
}

impl ConfigOverrides {
    fn apply(self, mut config: EngineConfig) -> EngineConfig {
        if let Some(ratio) = self.weight_ratio {
            config.weight_ratio = ratio;
        }
        if !self.categories.is_empty() {
            config.categories = self.categories;
        }
        if !self.sources.is_empty() {
            config.sources = self.sources;
        }
        if let Some(start) = self.start {
            config.window_start = start;
        }
        if self.end.is_some() {
            config.window_end = self.end;
        }
        if let Some(span) = self.ewm_span {
            config.ewm_span = span;
        }
        if self.drop_zero_stringency {
            config.drop_zero_stringency = true;
        }
        config
    }
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    table::parse_date(s).map_err(|e| e.to_string())
}

fn parse_category(s: &str) -> Result<MobilityCategory, String> {
    MobilityCategory::ALL
        .iter()
        .copied()
        .find(|c| c.as_str() == s.trim())
        .ok_or_else(|| format!("unknown mobility category: {}", s))
}

fn parse_source(s: &str) -> Result<StringencySource, String> {
    StringencySource::ALL
        .iter()
        .copied()
        .find(|c| c.as_str() == s.trim().to_lowercase())
        .ok_or_else(|| format!("unknown stringency source: {}", s))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("npi=info,npi_index=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), NpiCliError> {
    match cli.command {
        Commands::Compute {
            events,
            evidence,
            stringency,
            mobility,
            outcomes,
            territories,
            indicators,
            config,
            output,
            manifest,
            overrides,
        } => {
            let inputs = ComputeInputs {
                events,
                evidence,
                stringency,
                mobility,
                outcomes,
                territories,
            };
            cmd_compute(
                &inputs,
                indicators.as_deref(),
                config.as_deref(),
                overrides,
                &output,
                manifest.as_deref(),
            )
        }

        Commands::Timeline {
            events,
            evidence,
            country,
            region,
            indicators,
            start,
            end,
            output,
        } => cmd_timeline(
            &events,
            evidence.as_deref(),
            &country,
            region.as_deref(),
            indicators.as_deref(),
            start,
            end,
            &output,
        ),

        Commands::Validate {
            events,
            indicators,
            json,
        } => cmd_validate(&events, indicators.as_deref(), json),
    }
}

struct ComputeInputs {
    events: PathBuf,
    evidence: Option<PathBuf>,
    stringency: Option<PathBuf>,
    mobility: PathBuf,
    outcomes: PathBuf,
    territories: PathBuf,
}

fn cmd_compute(
    paths: &ComputeInputs,
    indicators: Option<&Path>,
    config: Option<&Path>,
    overrides: ConfigOverrides,
    output: &Path,
    manifest: Option<&Path>,
) -> Result<(), NpiCliError> {
    let config = match config {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    let engine = NpiIndexEngine::new(overrides.apply(config), load_indicators(indicators)?)?;

    let territories = table::read_territories(File::open(&paths.territories)?)?;
    if territories.is_empty() {
        return Err(NpiCliError::NoInput("territory list is empty".to_string()));
    }

    let inputs = PipelineInputs {
        territories,
        events: load_events(&paths.events, paths.evidence.as_deref())?,
        stringency: match &paths.stringency {
            Some(path) => table::read_stringency(File::open(path)?)?,
            None => Vec::new(),
        },
        mobility: table::read_mobility(File::open(&paths.mobility)?)?,
        outcomes: table::read_outcomes(File::open(&paths.outcomes)?)?,
    };
    info!(
        events = inputs.events.len(),
        mobility = inputs.mobility.len(),
        outcomes = inputs.outcomes.len(),
        "inputs loaded"
    );

    let (index_table, summary) = engine.run(&inputs)?;
    info!(
        producer = PRODUCER_NAME,
        version = NPI_VERSION,
        run_id = %summary.run_id,
        rows = summary.rows,
        "writing index table"
    );
    table::write_index_table(&index_table, open_output(output)?)?;

    if let Some(path) = manifest {
        fs::write(path, serde_json::to_string_pretty(&summary)?)?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_timeline(
    events: &Path,
    evidence: Option<&Path>,
    country: &str,
    region: Option<&str>,
    indicators: Option<&Path>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output: &Path,
) -> Result<(), NpiCliError> {
    let mut config = EngineConfig::default();
    if let Some(start) = start {
        config.window_start = start;
    }
    config.window_end = end;
    let engine = NpiIndexEngine::new(config, load_indicators(indicators)?)?;

    let mut territory = Territory::country(country, "", country, 0);
    if let Some(region) = region {
        territory = territory.with_region(region, "", region, 0);
    }

    let events = load_events(events, evidence)?;
    let (rows, stringency) = engine.timeline(&territory, &events)?;

    let mut out = open_output(output)?;
    for (row, point) in rows.iter().zip(&stringency) {
        let line = TimelineLine {
            date: row.date,
            stringency: point.value,
            indicators: &row.values,
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    }
    out.flush()?;

    Ok(())
}

fn cmd_validate(events: &Path, indicators: Option<&Path>, json: bool) -> Result<(), NpiCliError> {
    let engine = NpiIndexEngine::new(EngineConfig::default(), load_indicators(indicators)?)?;
    let events = load_events(events, None)?;
    let issues = engine.validate_events(&events);
    let unconfigured = events
        .iter()
        .filter(|e| engine.indicators().get(e.code).is_none())
        .count();

    let report = ValidationReport {
        total_events: events.len(),
        unconfigured_events: unconfigured,
        invalid_events: issues.len(),
        issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:        {}", report.total_events);
        println!("Unconfigured events: {}", report.unconfigured_events);
        println!("Invalid events:      {}", report.invalid_events);

        if !report.issues.is_empty() {
            println!("\nErrors:");
            for issue in &report.issues {
                println!(
                    "  - Event {} (row {}, {} on {}): {}",
                    issue.event_id.as_deref().unwrap_or("unknown"),
                    issue.index,
                    issue.code,
                    issue.date,
                    issue.message
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(NpiCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

// Helper functions

fn open_input(path: &Path) -> Result<Box<dyn Read>, NpiCliError> {
    if path.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(NpiCliError::NoInput("stdin is a terminal".to_string()));
        }
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(File::open(path)?))
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>, NpiCliError> {
    if path.to_string_lossy() == "-" {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

fn load_events(events: &Path, evidence: Option<&Path>) -> Result<Vec<PolicyEvent>, NpiCliError> {
    let mut loaded = table::read_events(open_input(events)?)?;
    if let Some(path) = evidence {
        table::attach_evidence(&mut loaded, table::read_evidence(File::open(path)?)?);
    }
    Ok(loaded)
}

fn load_indicators(path: Option<&Path>) -> Result<IndicatorConfigTable, NpiCliError> {
    match path {
        Some(path) => Ok(table::read_indicator_config(File::open(path)?)?),
        None => Ok(IndicatorConfigTable::default()),
    }
}

// Error types

#[derive(Debug)]
enum NpiCliError {
    Io(io::Error),
    Index(IndexError),
    Json(serde_json::Error),
    NoInput(String),
    ValidationFailed(usize),
}

impl From<io::Error> for NpiCliError {
    fn from(e: io::Error) -> Self {
        NpiCliError::Io(e)
    }
}

impl From<IndexError> for NpiCliError {
    fn from(e: IndexError) -> Self {
        NpiCliError::Index(e)
    }
}

impl From<serde_json::Error> for NpiCliError {
    fn from(e: serde_json::Error) -> Self {
        NpiCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NpiCliError> for CliError {
    fn from(e: NpiCliError) -> Self {
        match e {
            NpiCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NpiCliError::Index(e) => {
                let (code, hint) = match &e {
                    IndexError::UnknownIndicator(_)
                    | IndexError::UnknownEventType(_)
                    | IndexError::NoScoringRule(_)
                    | IndexError::RuleExceedsMaximum { .. } => (
                        "CONFIG_MISMATCH",
                        "Check the indicator configuration table against the event types",
                    ),
                    IndexError::UninterpretableValue { .. } => {
                        ("UNINTERPRETABLE_VALUE", "Run 'npi validate' for details")
                    }
                    IndexError::InvalidWeightRatio(_) | IndexError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Check the engine configuration")
                    }
                    IndexError::CsvError(_) | IndexError::DateParseError(_) => {
                        ("PARSE_ERROR", "Ensure input tables have the expected columns")
                    }
                    IndexError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    IndexError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
                    _ => ("COMPUTE_ERROR", "Check input coverage for the failing territory"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NpiCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NpiCliError::NoInput(msg) => CliError {
                code: "NO_INPUT".to_string(),
                message: msg,
                hint: Some("Pass a file path or pipe the table into stdin".to_string()),
            },
            NpiCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix the listed event values and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    unconfigured_events: usize,
    invalid_events: usize,
    issues: Vec<EventIssue>,
}

#[derive(serde::Serialize)]
struct TimelineLine<'a> {
    date: NaiveDate,
    stringency: f64,
    indicators: &'a [IndicatorValue],
}
