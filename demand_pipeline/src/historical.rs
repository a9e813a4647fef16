//! Loader for tidy historical extracts: one row per (timestamp, zone) with a
//! demand value, as CSV (header on the first line) or Parquet.

use crate::detect::detect_delimiter;
use crate::error::{IngestError, Result};
use crate::matchers::{self, find_column, ColumnMatcher};
use crate::models::{Stamp, Zone, ZoneSeries};
use crate::normalize::parse_number;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Timestamp text with or without an explicit offset.
pub fn parse_timestamp(cell: &str) -> Option<Stamp> {
    let cell = cell.trim().trim_matches('"').trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(Stamp::Zoned(dt));
    }
    if let Some(dt) = ZONED_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(cell, fmt).ok())
    {
        return Some(Stamp::Zoned(dt));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(cell, fmt).ok())
    {
        return Some(Stamp::Naive(naive));
    }
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cell, fmt).ok())
        .map(|date| Stamp::Naive(date.and_time(NaiveTime::MIN)))
}

struct TidyColumns {
    timestamp: usize,
    zone: usize,
    demand: usize,
}

fn locate<S: AsRef<str>>(headers: &[S], file: &str) -> Result<TidyColumns> {
    let lookups: [(&str, &[ColumnMatcher]); 3] = [
        ("timestamp", matchers::TIDY_TIMESTAMP),
        ("zone", matchers::TIDY_ZONE),
        ("demand_mw", matchers::TIDY_DEMAND),
    ];
    let found: Vec<Option<usize>> = lookups
        .iter()
        .map(|(_, m)| find_column(headers, m))
        .collect();

    match found.as_slice() {
        [Some(timestamp), Some(zone), Some(demand)] => Ok(TidyColumns {
            timestamp: *timestamp,
            zone: *zone,
            demand: *demand,
        }),
        _ => Err(IngestError::MissingColumns {
            file: file.to_string(),
            missing: lookups
                .iter()
                .zip(&found)
                .filter(|(_, f)| f.is_none())
                .map(|((name, _), _)| name.to_string())
                .collect(),
        }),
    }
}

#[derive(Default)]
struct Tally {
    kept: usize,
    incomplete: usize,
    unknown_zone: usize,
}

impl Tally {
    fn accept(
        &mut self,
        series: &mut ZoneSeries,
        stamp: Option<Stamp>,
        zone: Option<&str>,
        demand: Option<f64>,
    ) {
        let (Some(stamp), Some(zone), Some(demand)) = (stamp, zone, demand) else {
            self.incomplete += 1;
            return;
        };
        match Zone::parse(zone) {
            Some(zone) => {
                series.push(zone, stamp, Some(demand));
                self.kept += 1;
            }
            None => self.unknown_zone += 1,
        }
    }

    fn report(&self, file: &str) {
        if self.unknown_zone > 0 {
            warn!(
                "{}: skipped {} rows with zones outside SIN/BCA/BCS",
                file, self.unknown_zone
            );
        }
        info!(
            "{}: kept {} rows, dropped {} incomplete",
            file, self.kept, self.incomplete
        );
    }
}

fn load_csv(path: &Path, file: &str) -> Result<ZoneSeries> {
    let bytes = fs::read(path)?;
    let delimiter = detect_delimiter(&bytes, 3000);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes.as_slice());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').trim_matches('"').to_string())
        .collect();
    let columns = locate(&headers, file)?;

    let mut series = ZoneSeries::new(file);
    let mut tally = Tally::default();
    for record in reader.records() {
        let record = record?;
        tally.accept(
            &mut series,
            record.get(columns.timestamp).and_then(parse_timestamp),
            record.get(columns.zone).map(str::trim).filter(|z| !z.is_empty()),
            record.get(columns.demand).and_then(parse_number),
        );
    }
    tally.report(file);
    Ok(series)
}

fn stamps_from_series(series: &Series) -> Result<Vec<Option<Stamp>>> {
    if let DataType::Datetime(unit, tz) = series.dtype() {
        let per_ms = match unit {
            TimeUnit::Nanoseconds => 1_000_000,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1,
        };
        let zoned = tz.is_some();
        let raw = series.cast(&DataType::Int64)?;
        return Ok(raw
            .i64()?
            .into_iter()
            .map(|v| {
                let utc = DateTime::from_timestamp_millis(v? / per_ms)?;
                Some(if zoned {
                    Stamp::Zoned(utc.fixed_offset())
                } else {
                    Stamp::Naive(utc.naive_utc())
                })
            })
            .collect());
    }
    let text = series.cast(&DataType::String)?;
    Ok(text
        .str()?
        .into_iter()
        .map(|v| v.and_then(parse_timestamp))
        .collect())
}

fn load_parquet(path: &Path, file: &str) -> Result<ZoneSeries> {
    let df = ParquetReader::new(File::open(path)?).finish()?;
    let headers: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let columns = locate(&headers, file)?;

    let stamps = stamps_from_series(df.column(&headers[columns.timestamp])?)?;
    let zones = df.column(&headers[columns.zone])?.cast(&DataType::String)?;
    let demand = df.column(&headers[columns.demand])?.cast(&DataType::Float64)?;

    let mut series = ZoneSeries::new(file);
    let mut tally = Tally::default();
    for ((stamp, zone), value) in stamps
        .into_iter()
        .zip(zones.str()?.into_iter())
        .zip(demand.f64()?.into_iter())
    {
        tally.accept(&mut series, stamp, zone, value.filter(|v| v.is_finite()));
    }
    tally.report(file);
    Ok(series)
}

/// Reads a tidy (timestamp, zone, demand) extract into per-zone observations.
pub fn load_tidy(path: &Path) -> Result<ZoneSeries> {
    let file = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => load_csv(path, &file),
        "parquet" | "pq" => load_parquet(path, &file),
        _ => Err(IngestError::UnsupportedInput { file }),
    }
}
