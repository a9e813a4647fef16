//! Turns a detected raw table into per-zone observations.
//!
//! Coercion is always "parse or missing": a bad cell becomes `None` for that
//! zone and hour, a bad timestamp drops the row from the affected zone. Only
//! structural problems (no demand column, no usable date) fail the file.

use crate::detect::{self, DetectOptions, SchemaKind};
use crate::error::{IngestError, Result};
use crate::matchers::{self, find_column};
use crate::models::{RawTable, Stamp, Zone, ZoneSeries};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d/%m/%y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d"];

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("static regex"))
}

/// Calendar date embedded in a file name as `YYYY-MM-DD`.
pub fn date_from_filename(file: &str) -> Result<NaiveDate> {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file);
    date_pattern()
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
        .ok_or_else(|| IngestError::DateExtractionError {
            file: file.to_string(),
        })
}

/// Numeric cell or `None`. Non-finite values count as missing.
pub fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim().trim_matches('"').trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integral hour label in `1..=24` (`"3"`, `"03"`, `"3.0"`).
fn parse_hour(cell: &str) -> Option<i64> {
    parse_number(cell)
        .filter(|h| h.fract() == 0.0 && (1.0..=24.0).contains(h))
        .map(|h| h as i64)
}

fn parse_day_first(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim().trim_matches('"').trim();
    let date_part = cell.split_whitespace().next()?;
    DAY_FIRST_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// `date + (hour - 1)` for numeric hour labels; clock times are taken as-is.
fn stamp_for(date: NaiveDate, hour_cell: &str) -> Option<NaiveDateTime> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(hour) = parse_hour(hour_cell) {
        return midnight.checked_add_signed(Duration::try_hours(hour - 1)?);
    }
    if parse_number(hour_cell).is_some() {
        return None;
    }
    let cell = hour_cell.trim().trim_matches('"').trim();
    ["%H:%M", "%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(cell, fmt).ok())
        .map(|time| date.and_time(time))
}

enum DateSource {
    Column(usize),
    FileName(NaiveDate),
}

impl DateSource {
    fn resolve(headers: &[String], file: &str) -> Result<Self> {
        match find_column(headers, matchers::DATE) {
            Some(idx) => Ok(DateSource::Column(idx)),
            None => Ok(DateSource::FileName(date_from_filename(file)?)),
        }
    }

    fn stamp(&self, row: &[String], hour_idx: usize) -> Option<NaiveDateTime> {
        let hour_cell = row.get(hour_idx)?;
        let date = match self {
            DateSource::Column(idx) => parse_day_first(row.get(*idx)?)?,
            DateSource::FileName(date) => *date,
        };
        stamp_for(date, hour_cell)
    }
}

fn hour_column(table: &RawTable, file: &str) -> Result<usize> {
    find_column(&table.headers, matchers::HOUR).ok_or_else(|| IngestError::HeaderNotFound {
        file: file.to_string(),
    })
}

fn normalize_wide(table: &RawTable, file: &str) -> Result<ZoneSeries> {
    let zone_columns: Vec<(usize, Zone)> = table
        .headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| Zone::parse(h).map(|z| (idx, z)))
        .collect();
    if zone_columns.is_empty() {
        return Err(IngestError::NoZoneColumns {
            file: file.to_string(),
            columns: table.headers.clone(),
        });
    }

    let hour_idx = hour_column(table, file)?;
    let dates = DateSource::resolve(&table.headers, file)?;

    let mut series = ZoneSeries::new(file);
    let mut dropped = 0usize;
    for row in &table.rows {
        let blank = zone_columns.iter().all(|(idx, _)| {
            row.get(*idx)
                .map(|c| c.trim().trim_matches('"').trim().is_empty())
                .unwrap_or(true)
        });
        if blank {
            continue;
        }
        let Some(stamp) = dates.stamp(row, hour_idx) else {
            dropped += 1;
            continue;
        };
        for (idx, zone) in &zone_columns {
            let value = row.get(*idx).and_then(|c| parse_number(c));
            series.push(*zone, Stamp::Naive(stamp), value);
        }
    }

    if dropped > 0 {
        debug!("{}: dropped {} rows with unparseable timestamps", file, dropped);
    }
    Ok(series)
}

fn normalize_long(table: &RawTable, file: &str) -> Result<ZoneSeries> {
    let system_idx = find_column(&table.headers, matchers::SYSTEM).ok_or_else(|| {
        IngestError::NoZoneColumns {
            file: file.to_string(),
            columns: table.headers.clone(),
        }
    })?;
    let demand_idx = find_column(&table.headers, matchers::DEMAND_BALANCE).ok_or_else(|| {
        IngestError::DemandColumnNotFound {
            file: file.to_string(),
            columns: table.headers.clone(),
        }
    })?;
    let hour_idx = hour_column(table, file)?;
    let dates = DateSource::resolve(&table.headers, file)?;

    // Sub-area rows sum into their zone; this is aggregation, not duplication.
    let mut totals: BTreeMap<(Zone, NaiveDateTime), Option<f64>> = BTreeMap::new();
    let mut unknown_codes = 0usize;
    for row in &table.rows {
        let Some(zone) = row.get(system_idx).and_then(|c| Zone::parse(c)) else {
            unknown_codes += 1;
            continue;
        };
        let Some(stamp) = dates.stamp(row, hour_idx) else {
            continue;
        };
        let value = row.get(demand_idx).and_then(|c| parse_number(c));
        let total = totals.entry((zone, stamp)).or_insert(None);
        if let Some(v) = value {
            *total = Some(total.unwrap_or(0.0) + v);
        }
    }

    if unknown_codes > 0 {
        warn!(
            "{}: skipped {} rows whose system code is not SIN/BCA/BCS",
            file, unknown_codes
        );
    }

    let mut series = ZoneSeries::new(file);
    for ((zone, stamp), value) in totals {
        series.push(zone, Stamp::Naive(stamp), value);
    }
    Ok(series)
}

/// Converts a detected raw table into per-zone observations.
pub fn normalize(table: &RawTable, schema: SchemaKind, file: &str) -> Result<ZoneSeries> {
    match schema {
        SchemaKind::Wide => normalize_wide(table, file),
        SchemaKind::Long => normalize_long(table, file),
    }
}

/// Detection plus normalization of one raw export.
pub fn read_raw(bytes: &[u8], file: &str, options: DetectOptions) -> Result<ZoneSeries> {
    let detection = detect::detect(bytes, file, options)?;
    let table = detect::read_table(bytes, &detection)?;
    let series = normalize(&table, detection.schema, file)?;
    debug!(
        "{}: {} rows -> {} observations across {} zones",
        file,
        table.rows.len(),
        series.len(),
        series.zones.len()
    );
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn naive(s: &str) -> Stamp {
        Stamp::Naive(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap())
    }

    #[test]
    fn test_date_from_filename() {
        assert_eq!(
            date_from_filename("data/Demanda_2024-03-15_final.csv").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
        );
        let err = date_from_filename("demanda_marzo.csv").unwrap_err();
        assert!(matches!(err, IngestError::DateExtractionError { .. }));
        assert!(err.to_string().contains("demanda_marzo.csv"));
        // shaped like a date but not one
        assert!(date_from_filename("2024-13-40.csv").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 1234.5 "), Some(1234.5));
        assert_eq!(parse_number("\"42\""), Some(42.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/d"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_wide_timestamps_are_date_plus_hour_minus_one() {
        let rows: Vec<Vec<String>> = (1..=24)
            .map(|h| vec![h.to_string(), format!("{}", 1000 + h)])
            .collect();
        let table = RawTable {
            headers: vec!["Hora".to_string(), "SIN".to_string()],
            rows,
        };
        let series = normalize(&table, SchemaKind::Wide, "2024-01-01.csv").unwrap();
        let sin = series.get(Zone::Sin).unwrap();
        assert_eq!(sin.len(), 24);

        let midnight = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        for (h, (stamp, value)) in (1..=24).zip(sin) {
            assert_eq!(*stamp, Stamp::Naive(midnight + Duration::hours(h - 1)));
            assert_eq!(*value, Some(1000.0 + h as f64));
        }
    }

    #[test]
    fn test_wide_prefers_date_column_day_first() {
        let table = raw(
            &["Fecha", "Hora", "SIN", "BCA"],
            &[&["02/01/2024", "1", "100", "10"], &["02/01/2024", "2", "110", "x"]],
        );
        let series = normalize(&table, SchemaKind::Wide, "sin_fecha.csv").unwrap();
        let sin = series.get(Zone::Sin).unwrap();
        assert_eq!(sin[0].0, naive("2024-01-02 00:00"));
        assert_eq!(sin[1].0, naive("2024-01-02 01:00"));

        let bca = series.get(Zone::Bca).unwrap();
        assert_eq!(bca[1].1, None);
    }

    #[test]
    fn test_wide_drops_blank_rows_and_bad_timestamps() {
        let table = raw(
            &["Hora", "SIN", "BCA"],
            &[
                &["1", "100", "10"],
                &["2", "", ""],
                &["Total", "100", "10"],
                &["3", "abc", "12"],
            ],
        );
        let series = normalize(&table, SchemaKind::Wide, "2024-01-01.csv").unwrap();
        let sin = series.get(Zone::Sin).unwrap();
        assert_eq!(sin.len(), 2);
        assert_eq!(sin[1], (naive("2024-01-01 02:00"), None));
        assert_eq!(series.get(Zone::Bca).unwrap()[1].1, Some(12.0));
        assert!(series.get(Zone::Bcs).is_none());
    }

    #[test]
    fn test_out_of_range_hour_labels_drop_the_row() {
        let table = raw(
            &["Hora", "SIN"],
            &[
                &["1", "10"],
                &["0", "11"],
                &["25", "12"],
                &["1e18", "13"],
                &["10000000000000", "14"],
                &["24", "15"],
            ],
        );
        let series = normalize(&table, SchemaKind::Wide, "2024-01-01.csv").unwrap();
        assert_eq!(
            series.get(Zone::Sin).unwrap(),
            &[
                (naive("2024-01-01 00:00"), Some(10.0)),
                (naive("2024-01-01 23:00"), Some(15.0)),
            ]
        );

        let table = raw(
            &["Sistema", "Hora", "Demanda Balance"],
            &[&["BCA", "2", "7"], &["BCA", "1e18", "8"], &["BCA", "-3", "9"]],
        );
        let series = normalize(&table, SchemaKind::Long, "2024-01-01.csv").unwrap();
        assert_eq!(
            series.get(Zone::Bca).unwrap(),
            &[(naive("2024-01-01 01:00"), Some(7.0))]
        );
    }

    #[test]
    fn test_wide_without_any_date_fails_with_file_name() {
        let table = raw(&["Hora", "SIN"], &[&["1", "100"]]);
        let err = normalize(&table, SchemaKind::Wide, "export.csv").unwrap_err();
        assert!(matches!(err, IngestError::DateExtractionError { ref file } if file == "export.csv"));
    }

    #[test]
    fn test_long_sums_sub_areas_and_skips_unknown_codes() {
        let table = raw(
            &["Sistema", "Area", "Hora", "Demanda Balance (MW)"],
            &[
                &["SIN", "NORTE", "1", "100"],
                &["SIN", "SUR", "1", "50.5"],
                &["sin", "CENTRO", "1", "25"],
                &["BCA", "MEXICALI", "1", "30"],
                &["BCA", "TIJUANA", "1", "20"],
                &["SIN-ORIENTAL", "X", "1", "999"],
                &["SIN", "NORTE", "2", "n/d"],
            ],
        );
        let series = normalize(&table, SchemaKind::Long, "2024-01-02.csv").unwrap();
        let sin = series.get(Zone::Sin).unwrap();
        assert_eq!(sin[0], (naive("2024-01-02 00:00"), Some(175.5)));
        assert_eq!(sin[1], (naive("2024-01-02 01:00"), None));
        assert_eq!(series.get(Zone::Bca).unwrap()[0].1, Some(50.0));
        assert!(series.get(Zone::Bcs).is_none());
    }

    #[test]
    fn test_long_missing_demand_column() {
        let table = raw(&["Sistema", "Hora", "Demanda Neta"], &[&["SIN", "1", "100"]]);
        let err = normalize(&table, SchemaKind::Long, "2024-01-02.csv").unwrap_err();
        match err {
            IngestError::DemandColumnNotFound { file, columns } => {
                assert_eq!(file, "2024-01-02.csv");
                assert_eq!(columns.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_raw_end_to_end() {
        let text = "Demanda por sistema;;\n\nSistema;Hora;DemandaBalance\nSIN;1;100\nBCA;1;50\n";
        let series = read_raw(text.as_bytes(), "2024-01-02.csv", DetectOptions::default()).unwrap();
        assert_eq!(series.source, "2024-01-02.csv");
        assert_eq!(series.get(Zone::Sin).unwrap()[0].1, Some(100.0));
        assert_eq!(series.get(Zone::Bca).unwrap()[0].1, Some(50.0));
    }
}
