//! On-disk form of `NormalizedTable`.
//!
//! Parquet frame layout: `timestamp` (datetime[ms], UTC instant), one Float64
//! column per zone, one per auxiliary measure, then constant `meta_*` columns
//! holding the timezone, live day and merge counters.

use crate::error::{IngestError, Result};
use crate::models::{NormalizedTable, Provenance, Zone};
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

const TIMESTAMP: &str = "timestamp";
const META_TIMEZONE: &str = "meta_timezone";
const META_LIVE_DAY: &str = "meta_live_day";
const META_DUPLICATES: &str = "meta_duplicate_rows";
const META_UNRESOLVED: &str = "meta_unresolved_timestamps";
const HOUR_MS: i64 = 3_600_000;

fn corrupt(path: &Path, reason: impl Into<String>) -> IngestError {
    IngestError::CorruptTable {
        file: path.display().to_string(),
        reason: reason.into(),
    }
}

fn data_columns(table: &NormalizedTable) -> Vec<Series> {
    let mut columns = Vec::new();
    for (zone, values) in table.zones() {
        columns.push(Series::new(zone.as_str().into(), values.to_vec()));
    }
    for (name, values) in table.measures() {
        columns.push(Series::new(name.into(), values.to_vec()));
    }
    columns
}

/// Full frame, including metadata, as persisted in parquet.
pub fn to_frame(table: &NormalizedTable) -> Result<DataFrame> {
    let height = table.height();
    let millis: Vec<i64> = table.index().iter().map(|t| t.timestamp_millis()).collect();
    let provenance = table.provenance();
    let live_day = provenance.live_day.map(|d| d.format("%Y-%m-%d").to_string());

    let mut columns = vec![Series::new(TIMESTAMP.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?];
    columns.extend(data_columns(table));
    columns.push(Series::new(
        META_TIMEZONE.into(),
        vec![table.timezone().name(); height],
    ));
    columns.push(Series::new(META_LIVE_DAY.into(), vec![live_day; height]));
    columns.push(Series::new(
        META_DUPLICATES.into(),
        vec![provenance.duplicate_rows as i64; height],
    ));
    columns.push(Series::new(
        META_UNRESOLVED.into(),
        vec![provenance.unresolved_timestamps as i64; height],
    ));

    Ok(DataFrame::new(columns)?)
}

/// Frame meant for people: local RFC 3339 timestamps, no metadata.
pub fn to_export_frame(table: &NormalizedTable) -> Result<DataFrame> {
    let local: Vec<String> = table.index().iter().map(|t| t.to_rfc3339()).collect();
    let mut columns = vec![Series::new(TIMESTAMP.into(), local)];
    columns.extend(data_columns(table));
    Ok(DataFrame::new(columns)?)
}

fn first_str(df: &DataFrame, name: &str) -> Result<Option<String>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column.str()?.get(0).map(str::to_string))
}

fn first_count(df: &DataFrame, name: &str) -> Result<usize> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.get(0).unwrap_or(0).max(0) as usize)
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

/// Rebuilds a table from a persisted frame. Empty frames carry no metadata
/// and come back in UTC.
pub fn from_frame(df: &DataFrame, path: &Path) -> Result<NormalizedTable> {
    let stamps = df.column(TIMESTAMP)?.cast(&DataType::Int64)?;
    let millis: Vec<i64> = stamps
        .i64()?
        .into_iter()
        .map(|v| v.ok_or_else(|| corrupt(path, "null timestamp")))
        .collect::<Result<_>>()?;
    if millis.windows(2).any(|w| w[1] - w[0] != HOUR_MS) {
        return Err(corrupt(path, "index is not a contiguous hourly grid"));
    }

    let tz = match first_str(df, META_TIMEZONE)? {
        Some(name) => Tz::from_str(&name).map_err(|e| corrupt(path, e.to_string()))?,
        None => chrono_tz::UTC,
    };
    let live_day = first_str(df, META_LIVE_DAY)?
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| corrupt(path, e.to_string()))?;
    let provenance = Provenance {
        duplicate_rows: first_count(df, META_DUPLICATES)?,
        unresolved_timestamps: first_count(df, META_UNRESOLVED)?,
        live_day,
    };

    let index = millis
        .iter()
        .map(|ms| {
            DateTime::from_timestamp_millis(*ms)
                .map(|utc| utc.with_timezone(&tz))
                .ok_or_else(|| corrupt(path, format!("timestamp {} out of range", ms)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut zones = BTreeMap::new();
    let mut measures = BTreeMap::new();
    for name in df.get_column_names().iter().map(|s| s.to_string()) {
        if name == TIMESTAMP || name.starts_with("meta_") {
            continue;
        }
        let values = float_column(df, &name)?;
        match Zone::parse(&name) {
            Some(zone) => {
                zones.insert(zone, values);
            }
            None => {
                measures.insert(name, values);
            }
        }
    }

    Ok(NormalizedTable::from_parts(tz, index, zones, measures, provenance))
}

/// Writes through a temp file in the target directory and renames it into
/// place, so readers never see a half-written file.
pub fn write_parquet(table: &NormalizedTable, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut df = to_frame(table)?;
    let mut tmp = NamedTempFile::new_in(&parent)?;
    ParquetWriter::new(tmp.as_file_mut()).finish(&mut df)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<NormalizedTable> {
    let df = ParquetReader::new(File::open(path)?).finish()?;
    from_frame(&df, path)
}

pub fn write_csv(table: &NormalizedTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut df = to_export_frame(table)?;
    CsvWriter::new(File::create(path)?).finish(&mut df)?;
    Ok(())
}

/// Directory of named, finished tables (`<root>/<name>.parquet`).
#[derive(Debug, Clone)]
pub struct CleanStore {
    root: PathBuf,
}

impl CleanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.parquet", name))
    }

    pub fn save(&self, name: &str, table: &NormalizedTable) -> Result<PathBuf> {
        let path = self.path_for(name);
        write_parquet(table, &path)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<NormalizedTable> {
        read_parquet(&self.path_for(name))
    }

    /// Sorted names of stored tables; empty when the root does not exist.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension()?.to_str()? == "parquet" {
                    Some(path.file_stem()?.to_str()?.to_string())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge;
    use crate::models::{Stamp, ZoneSeries};
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn sample() -> NormalizedTable {
        let mut s = ZoneSeries::new("sample");
        let start = NaiveDateTime::parse_from_str("2024-01-01 00:00", "%Y-%m-%d %H:%M").unwrap();
        for h in 0..5 {
            let value = if h == 3 { None } else { Some(1000.0 + h as f64 * 0.1) };
            s.push(Zone::Sin, Stamp::Naive(start + chrono::Duration::hours(h)), value);
        }
        s.push(Zone::Sin, Stamp::Naive(start), Some(999.5));
        merge(&[s], chrono_tz::America::Mexico_City)
    }

    #[test]
    fn test_parquet_preserves_table_exactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("table.parquet");
        let table = sample();
        assert_eq!(table.provenance().duplicate_rows, 1);

        write_parquet(&table, &path).unwrap();
        let back = read_parquet(&path).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_export_frame_has_no_metadata() {
        let df = to_export_frame(&sample()).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["timestamp", "BCA", "BCS", "SIN"]);
        assert_eq!(df.height(), 5);
    }

    #[test]
    fn test_clean_store_lists_saved_tables() {
        let dir = TempDir::new().unwrap();
        let store = CleanStore::new(dir.path().join("demand"));
        assert!(store.list().unwrap().is_empty());

        store.save("historical_demand", &sample()).unwrap();
        store.save("balance_2024", &sample()).unwrap();
        fs::write(dir.path().join("demand").join("notes.txt"), "x").unwrap();

        assert_eq!(store.list().unwrap(), vec!["balance_2024", "historical_demand"]);
        assert_eq!(store.load("balance_2024").unwrap(), sample());
    }

    #[test]
    fn test_non_hourly_frame_is_rejected() {
        let df = DataFrame::new(vec![Series::new(TIMESTAMP.into(), vec![0i64, 1_800_000])
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .unwrap()])
        .unwrap();
        let err = from_frame(&df, Path::new("bad.parquet")).unwrap_err();
        assert!(matches!(err, IngestError::CorruptTable { .. }));
    }
}
