//! End-to-end run over synthetic CSV inputs

use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use npi_index::config::{EngineConfig, IndicatorConfigTable};
use npi_index::pipeline::{compute_npi_index, NpiIndexEngine, PipelineInputs};
use npi_index::table;
use npi_index::timeline::TimelineExpander;
use npi_index::types::{MobilityCategory, StringencySource};
use npi_index::ScoringTable;

const EVENTS: &str = "\
even_id,type,date,country,state/province,restriction,value,fine_grained_location,text
w1,Mask wearing,2020-06-03,KEN,,1,Mandatory,na,Face masks mandatory in public
";

const TERRITORIES: &str = r#"[
    {"admin0_name": "Kenya", "admin0_iso2": "KE", "admin0_iso3": "KEN", "population": 53771300}
]"#;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 6, day).unwrap()
}

fn mobility_csv() -> String {
    let mut csv = String::from("date,country_region_code,sub_region_1,workplaces_percent_change_from_baseline\n");
    for day in 1..=10 {
        csv.push_str(&format!("2020-06-{:02},KE,,-20\n", day));
    }
    csv
}

fn outcomes_csv() -> String {
    let mut csv = String::from("dt,country_id,province_id,confirmed_cases,deaths\n");
    for day in 1..=10 {
        csv.push_str(&format!("2020-06-{:02},KE,,{},{}\n", day, day * 10, day / 5));
    }
    csv
}

fn inputs() -> PipelineInputs {
    PipelineInputs {
        territories: table::read_territories(TERRITORIES.as_bytes()).unwrap(),
        events: table::read_events(EVENTS.as_bytes()).unwrap(),
        stringency: Vec::new(),
        mobility: table::read_mobility(mobility_csv().as_bytes()).unwrap(),
        outcomes: table::read_outcomes(outcomes_csv().as_bytes()).unwrap(),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        categories: vec![MobilityCategory::Workplaces],
        sources: vec![StringencySource::Wntrac],
        window_start: date(1),
        window_end: Some(date(10)),
        ..EngineConfig::default()
    }
}

#[test]
fn mask_mandate_scenario() {
    let (table, summary) = compute_npi_index(&inputs(), config(), IndicatorConfigTable::default()).unwrap();

    assert_eq!(table.len(), 10);
    assert_eq!(summary.series_computed, 1);
    assert!(summary.skipped.is_empty());

    let stringency: Vec<f64> = table
        .rows
        .iter()
        .map(|r| r.get(StringencySource::Wntrac, MobilityCategory::Workplaces).unwrap().stringency)
        .collect();

    assert_eq!(&stringency[..2], &[0.0, 0.0]);
    // H1 "Mandatory" = level 3 of 4, general: 75 over 12 indicators
    for value in &stringency[2..] {
        assert!((value - 75.0 / 12.0).abs() < 1e-9, "{}", value);
    }

    for row in &table.rows {
        let columns = row.get(StringencySource::Wntrac, MobilityCategory::Workplaces).unwrap();
        // flat mobility: the fit reproduces it exactly
        assert!((columns.anticipated_mobility + 20.0).abs() < 1e-6);
        assert!((columns.observed_mobility + 20.0).abs() < 1e-6);
        assert!((-1.0..=0.0).contains(&columns.deviation_ratio));
        assert!((columns.adherence - 1.0).abs() < 1e-6);
        let expected = 0.5 * columns.stringency + 0.5 * columns.adherence * 100.0;
        assert!((columns.npi_index - expected).abs() < 1e-9);
    }
}

#[test]
fn output_rows_carry_outcomes_and_identity() {
    let (table, _) = compute_npi_index(&inputs(), config(), IndicatorConfigTable::default()).unwrap();

    let first = &table.rows[0];
    assert_eq!(first.date, date(1));
    assert_eq!(first.confirmed_cases, 10.0);
    assert_eq!(first.territory.admin_label(), "Kenya(KE)");
    assert_eq!(table.rows[9].deaths, 2.0);
}

#[test]
fn written_table_has_expected_layout() {
    let (index_table, _) = compute_npi_index(&inputs(), config(), IndicatorConfigTable::default()).unwrap();

    let mut buffer = Vec::new();
    table::write_index_table(&index_table, &mut buffer).unwrap();

    let mut reader = csv::Reader::from_reader(buffer.as_slice());
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(
        header,
        vec![
            "date",
            "deaths",
            "confirmed_cases",
            "observed-mobility_wntrac_workplaces",
            "stringency-index_wntrac_workplaces",
            "anticipated-mobility_wntrac_workplaces",
            "deviation-ratio_wntrac_workplaces",
            "compliance-score_wntrac_workplaces",
            "npi-index_wntrac_workplaces",
            "admin0_name",
            "admin0_iso2",
            "admin1_name",
            "admin1_iso2",
            "admin",
            "population",
        ]
    );

    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 10);
    assert_eq!(&records[0][0], "2020-06-01");
    assert_eq!(&records[0][4], "0");
    assert_eq!(&records[9][13], "Kenya(KE)");
    assert_eq!(&records[9][14], "53771300");
}

#[test]
fn timeline_expansion_is_deterministic() {
    let indicators = IndicatorConfigTable::default();
    let scoring = ScoringTable::build(&indicators).unwrap();
    let engine = NpiIndexEngine::new(config(), indicators.clone()).unwrap();
    let events = inputs().events;

    let expander = TimelineExpander::new(&indicators, &scoring);
    let first = expander.expand(&events, engine.window()).unwrap();
    let second = expander.expand(&events, engine.window()).unwrap();

    assert_eq!(first.len(), 10);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn regional_territory_uses_regional_rows_only() {
    let territories = r#"[
        {"admin0_name": "United States", "admin0_iso2": "US", "admin0_iso3": "USA",
         "admin1_name": "New York", "admin1_iso2": "US-NY", "admin1_iso3": "USA-NY", "population": 19453561}
    ]"#;
    let events = "\
even_id,type,date,country,state/province,restriction,value,fine_grained_location,text
n1,Mask wearing,2020-06-04,USA,USA-NY,1,Mandatory,na,NY mask order
c1,School closure,2020-06-02,USA,,1,all,na,National closure
";
    let mut mobility = String::from("date,country_region_code,sub_region_1,workplaces\n");
    let mut outcomes = String::from("date,country_id,province_id,confirmed_cases,deaths\n");
    for day in 1..=10 {
        mobility.push_str(&format!("2020-06-{:02},US,New York,-30\n", day));
        mobility.push_str(&format!("2020-06-{:02},US,,-5\n", day));
        outcomes.push_str(&format!("2020-06-{:02},US,US-NY,{},0\n", day, day));
        outcomes.push_str(&format!("2020-06-{:02},US,,{},0\n", day, day * 100));
    }

    let inputs = PipelineInputs {
        territories: table::read_territories(territories.as_bytes()).unwrap(),
        events: table::read_events(events.as_bytes()).unwrap(),
        stringency: Vec::new(),
        mobility: table::read_mobility(mobility.as_bytes()).unwrap(),
        outcomes: table::read_outcomes(outcomes.as_bytes()).unwrap(),
    };

    let (table, _) = compute_npi_index(&inputs, config(), IndicatorConfigTable::default()).unwrap();
    assert_eq!(table.len(), 10);

    let day2 = table.rows[1].get(StringencySource::Wntrac, MobilityCategory::Workplaces).unwrap();
    // the national school closure is not a New York event
    assert_eq!(day2.stringency, 0.0);
    assert!((day2.observed_mobility + 30.0).abs() < 1e-6);
    assert_eq!(table.rows[1].confirmed_cases, 2.0);
    assert_eq!(table.rows[1].territory.admin_label(), "New York(US-NY)");
}

#[test]
fn country_run_uses_national_outcomes_and_earlier_events() {
    let events = "\
even_id,type,date,country,state/province,restriction,value,fine_grained_location,text
w0,Mask wearing,2020-05-20,KEN,,1,Mandatory,na,Face masks mandatory before the window
w1,School closure,2020-06-05,KEN,,1,all,na,Schools closed
";
    let mut outcomes = String::from("dt,country_id,province_id,confirmed_cases,deaths\n");
    for day in 1..=10 {
        outcomes.push_str(&format!("2020-06-{:02},KE,KE-30,1,0\n", day));
        outcomes.push_str(&format!("2020-06-{:02},KE,,{},0\n", day, day * 100));
    }

    let inputs = PipelineInputs {
        events: table::read_events(events.as_bytes()).unwrap(),
        outcomes: table::read_outcomes(outcomes.as_bytes()).unwrap(),
        ..inputs()
    };

    let (table, summary) = compute_npi_index(&inputs, config(), IndicatorConfigTable::default()).unwrap();
    assert_eq!(table.len(), 10);
    assert!(summary.skipped.is_empty());

    for (i, row) in table.rows.iter().enumerate() {
        assert_eq!(row.confirmed_cases, (i as f64 + 1.0) * 100.0);
        let stringency = row
            .get(StringencySource::Wntrac, MobilityCategory::Workplaces)
            .unwrap()
            .stringency;
        // the May mask mandate is already in force on the first day
        if i < 4 {
            assert!((stringency - 75.0 / 12.0).abs() < 1e-9, "{}", stringency);
        } else {
            assert!(stringency > 75.0 / 12.0, "{}", stringency);
        }
    }
}
