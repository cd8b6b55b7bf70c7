//! Tabular I/O
//!
//! CSV readers for the input tables (policy events, external stringency,
//! mobility, outcomes, indicator configuration), a JSON reader for the
//! territory list, and the writer for the wide output table.

use std::collections::HashMap;
use std::io::{Read, Write};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::combiner::{IndexColumns, IndexTable};
use crate::config::IndicatorConfigTable;
use crate::error::IndexError;
use crate::types::{
    Evidence, IndicatorCode, IndicatorConfig, MobilityCategory, MobilityRecord, OutcomeRecord,
    PolicyEvent, RawValue, StringencyRecord, StringencySource, Territory,
};

/// Per-(source, category) output columns, in order
pub const GROUP_COLUMNS: [&str; 6] = [
    "observed-mobility",
    "stringency-index",
    "anticipated-mobility",
    "deviation-ratio",
    "compliance-score",
    "npi-index",
];

/// Trailing territory identity columns
pub const IDENTITY_COLUMNS: [&str; 6] = [
    "admin0_name",
    "admin0_iso2",
    "admin1_name",
    "admin1_iso2",
    "admin",
    "population",
];

/// Parse `YYYY-MM-DD`, `YYYYMMDD`, or a datetime whose date part is one of those
pub fn parse_date(field: &str) -> Result<NaiveDate, IndexError> {
    let trimmed = field.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        return Ok(date);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(datetime.date());
        }
    }
    // Timestamps with fractional seconds or offsets: keep the date prefix
    match trimmed.get(..10) {
        Some(prefix) if trimmed.len() > 10 => NaiveDate::parse_from_str(prefix, "%Y-%m-%d")
            .map_err(|_| IndexError::DateParseError(field.to_string())),
        _ => Err(IndexError::DateParseError(field.to_string())),
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader)
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(rename = "even_id", alias = "event_id", default)]
    event_id: Option<String>,
    /// Indicator code, when the table already carries it
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    date: String,
    country: String,
    #[serde(rename = "state/province", alias = "state", alias = "province", default)]
    region: Option<String>,
    #[serde(default)]
    restriction: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    fine_grained_location: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl EventRow {
    fn code(&self) -> Result<IndicatorCode, IndexError> {
        if let Some(id) = self.id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.parse();
        }
        match self.event_type.as_deref() {
            Some(event_type) => IndicatorCode::from_event_type(event_type),
            None => Err(IndexError::InvalidConfig(
                "policy event has neither an id nor a type".to_string(),
            )),
        }
    }

    fn into_event(self) -> Result<PolicyEvent, IndexError> {
        let code = self.code()?;
        let date = parse_date(&self.date)?;
        let restriction_active = parse_restriction(self.restriction.as_deref().unwrap_or(""))?;
        let value = RawValue::parse(self.value.as_deref().unwrap_or(""));
        let evidence = inline_evidence(self.text.as_deref(), self.fine_grained_location.as_deref());
        Ok(PolicyEvent {
            event_id: non_empty(self.event_id),
            code,
            date,
            country: self.country,
            region: non_empty(self.region),
            restriction_active,
            value,
            evidence,
        })
    }
}

/// `0`/`1` (or `0.0`/`1.0`, `true`/`false`); empty means not active
fn parse_restriction(field: &str) -> Result<bool, IndexError> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return Ok(n != 0.0);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(IndexError::InvalidConfig(format!(
            "restriction must be 0 or 1, got {:?}",
            field
        ))),
    }
}

/// Split `|`-joined evidence texts and locations into evidence records
fn inline_evidence(text: Option<&str>, location: Option<&str>) -> Vec<Evidence> {
    let split = |field: Option<&str>| -> Vec<String> {
        match field.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.split('|').map(|part| part.trim().to_string()).collect(),
            None => Vec::new(),
        }
    };
    let texts = split(text);
    let locations = split(location);
    let count = texts.len().max(locations.len());

    (0..count)
        .map(|i| Evidence {
            text: texts.get(i).cloned().unwrap_or_default(),
            fine_grained_location: locations.get(i).cloned(),
        })
        .collect()
}

/// Read the policy event table
pub fn read_events<R: Read>(reader: R) -> Result<Vec<PolicyEvent>, IndexError> {
    let mut rdr = csv_reader(reader);
    let mut events = Vec::new();
    for row in rdr.deserialize::<EventRow>() {
        events.push(row?.into_event()?);
    }
    Ok(events)
}

#[derive(Debug, Deserialize)]
struct EvidenceRow {
    #[serde(rename = "even_id", alias = "event_id")]
    event_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    fine_grained_location: Option<String>,
}

/// Read a separate evidence table keyed by event id
pub fn read_evidence<R: Read>(reader: R) -> Result<HashMap<String, Vec<Evidence>>, IndexError> {
    let mut rdr = csv_reader(reader);
    let mut by_event: HashMap<String, Vec<Evidence>> = HashMap::new();
    for row in rdr.deserialize::<EvidenceRow>() {
        let row = row?;
        by_event.entry(row.event_id).or_default().push(Evidence {
            text: row.text.unwrap_or_default(),
            fine_grained_location: non_empty(row.fine_grained_location),
        });
    }
    Ok(by_event)
}

/// Append evidence records to the events they belong to, in table order
pub fn attach_evidence(events: &mut [PolicyEvent], mut evidence: HashMap<String, Vec<Evidence>>) {
    for event in events.iter_mut() {
        let Some(id) = event.event_id.as_deref() else {
            continue;
        };
        if let Some(records) = evidence.remove(id) {
            event.evidence.extend(records);
        }
    }
}

#[derive(Debug, Deserialize)]
struct StringencyRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "CountryCode")]
    country_code: String,
    #[serde(rename = "RegionCode", default)]
    region_code: Option<String>,
    #[serde(rename = "StringencyIndex", default)]
    stringency_index: Option<f64>,
}

/// Read the external stringency table
pub fn read_stringency<R: Read>(reader: R) -> Result<Vec<StringencyRecord>, IndexError> {
    let mut rdr = csv_reader(reader);
    let mut records = Vec::new();
    for row in rdr.deserialize::<StringencyRow>() {
        let row = row?;
        records.push(StringencyRecord {
            date: parse_date(&row.date)?,
            country_code: row.country_code,
            region_code: non_empty(row.region_code),
            stringency_index: row.stringency_index,
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct MobilityRow {
    date: String,
    country_region_code: String,
    #[serde(default)]
    sub_region_1: Option<String>,
    #[serde(alias = "workplaces_percent_change_from_baseline", default)]
    workplaces: Option<f64>,
    #[serde(alias = "retail_and_recreation_percent_change_from_baseline", default)]
    retail_and_recreation: Option<f64>,
    #[serde(alias = "grocery_and_pharmacy_percent_change_from_baseline", default)]
    grocery_and_pharmacy: Option<f64>,
    #[serde(alias = "parks_percent_change_from_baseline", default)]
    parks: Option<f64>,
    #[serde(alias = "transit_stations_percent_change_from_baseline", default)]
    transit_stations: Option<f64>,
    #[serde(alias = "residential_percent_change_from_baseline", default)]
    residential: Option<f64>,
}

/// Read the mobility table (short or `_percent_change_from_baseline` column names)
pub fn read_mobility<R: Read>(reader: R) -> Result<Vec<MobilityRecord>, IndexError> {
    let mut rdr = csv_reader(reader);
    let mut records = Vec::new();
    for row in rdr.deserialize::<MobilityRow>() {
        let row = row?;
        records.push(MobilityRecord {
            date: parse_date(&row.date)?,
            country_region_code: row.country_region_code,
            sub_region_1: non_empty(row.sub_region_1),
            workplaces: row.workplaces,
            retail_and_recreation: row.retail_and_recreation,
            grocery_and_pharmacy: row.grocery_and_pharmacy,
            parks: row.parks,
            transit_stations: row.transit_stations,
            residential: row.residential,
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct OutcomeRow {
    #[serde(alias = "dt")]
    date: String,
    country_id: String,
    #[serde(default)]
    province_id: Option<String>,
    #[serde(default)]
    confirmed_cases: Option<f64>,
    #[serde(default)]
    deaths: Option<f64>,
}

/// Read the outcome table; missing counts read as 0
pub fn read_outcomes<R: Read>(reader: R) -> Result<Vec<OutcomeRecord>, IndexError> {
    let mut rdr = csv_reader(reader);
    let mut records = Vec::new();
    for row in rdr.deserialize::<OutcomeRow>() {
        let row = row?;
        records.push(OutcomeRecord {
            date: parse_date(&row.date)?,
            country_id: row.country_id,
            province_id: non_empty(row.province_id),
            confirmed_cases: row.confirmed_cases.unwrap_or(0.0),
            deaths: row.deaths.unwrap_or(0.0),
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct IndicatorConfigRow {
    indicator: String,
    max_value: u8,
    flag: u8,
}

/// Read and validate the indicator configuration table
pub fn read_indicator_config<R: Read>(reader: R) -> Result<IndicatorConfigTable, IndexError> {
    let mut rdr = csv_reader(reader);
    let mut entries = Vec::new();
    for row in rdr.deserialize::<IndicatorConfigRow>() {
        let row = row?;
        entries.push(IndicatorConfig::new(row.indicator.parse()?, row.max_value, row.flag));
    }
    let table = IndicatorConfigTable::new(entries);
    table.validate()?;
    Ok(table)
}

/// Read the territory list (JSON array)
pub fn read_territories<R: Read>(reader: R) -> Result<Vec<Territory>, IndexError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Header of the wide output table
pub fn output_header(sources: &[StringencySource], categories: &[MobilityCategory]) -> Vec<String> {
    let mut header = vec![
        "date".to_string(),
        "deaths".to_string(),
        "confirmed_cases".to_string(),
    ];
    for source in sources {
        for category in categories {
            header.extend(
                GROUP_COLUMNS
                    .iter()
                    .map(|column| format!("{}_{}_{}", column, source, category)),
            );
        }
    }
    header.extend(IDENTITY_COLUMNS.iter().map(|c| c.to_string()));
    header
}

fn group_fields(columns: Option<&IndexColumns>) -> [String; 6] {
    match columns {
        Some(c) => [
            c.observed_mobility.to_string(),
            c.stringency.to_string(),
            c.anticipated_mobility.to_string(),
            c.deviation_ratio.to_string(),
            c.adherence.to_string(),
            c.npi_index.to_string(),
        ],
        None => Default::default(),
    }
}

/// Write the wide output table; absent (source, category) groups are blank
pub fn write_index_table<W: Write>(table: &IndexTable, writer: W) -> Result<(), IndexError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(output_header(&table.sources, &table.categories))?;

    for row in &table.rows {
        let mut record: Vec<String> = vec![
            row.date.format("%Y-%m-%d").to_string(),
            row.deaths.to_string(),
            row.confirmed_cases.to_string(),
        ];
        for &source in &table.sources {
            for &category in &table.categories {
                record.extend(group_fields(row.get(source, category)));
            }
        }
        let territory = &row.territory;
        record.push(territory.country_name.clone());
        record.push(territory.country_iso2.clone());
        record.push(territory.region_name.clone().unwrap_or_default());
        record.push(territory.region_iso2.clone().unwrap_or_default());
        record.push(territory.admin_label());
        record.push(territory.population.to_string());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
