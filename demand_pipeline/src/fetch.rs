//! Same-day demand from the operator's live endpoint, cached on disk.
//!
//! The endpoint only ever serves the current day, so a cache entry keyed by
//! (system, calendar date) is exactly as fresh as the source. Freshness is
//! date equality, never elapsed time.

use crate::error::{IngestError, Result};
use crate::merge::{hourly_grid, localize, Observations};
use crate::models::{FetchResult, NormalizedTable, Provenance, Zone};
use crate::normalize::parse_number;
use crate::store;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const GENERATION: &str = "generation_mw";
pub const FORECAST: &str = "forecast_mw";

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// One hourly record of the live payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRecord {
    /// 1-based hour label.
    pub hour: i64,
    pub demand_mw: Option<f64>,
    pub generation_mw: Option<f64>,
    pub forecast_mw: Option<f64>,
}

/// Remote provider of the current day's hourly records for one system.
pub trait DemandSource {
    fn fetch_day(&self, zone: Zone, timeout: Duration) -> std::result::Result<Vec<LiveRecord>, SourceError>;
}

fn coerce(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Parses either a bare array of records or an envelope `{"d": ...}` whose
/// payload may itself be a JSON-encoded string.
pub fn parse_payload(text: &str) -> std::result::Result<Vec<LiveRecord>, SourceError> {
    let mut value: Value = serde_json::from_str(text)?;
    if let Some(inner) = value.as_object_mut().and_then(|o| o.remove("d")) {
        value = match inner {
            Value::String(s) => serde_json::from_str(&s)?,
            other => other,
        };
    }
    let Value::Array(items) = value else {
        return Err("payload is not an array of hourly records".into());
    };

    let mut records: Vec<LiveRecord> = items
        .iter()
        .filter_map(|item| {
            let hour = coerce(item.get("hora"))
                .filter(|h| h.fract() == 0.0 && (1.0..=24.0).contains(h))? as i64;
            Some(LiveRecord {
                hour,
                demand_mw: coerce(item.get("valorDemanda")),
                generation_mw: coerce(item.get("valorGeneracion")),
                forecast_mw: coerce(item.get("valorPronostico")),
            })
        })
        .collect();
    if records.is_empty() {
        return Err("payload has no records with an hour".into());
    }
    records.sort_by_key(|r| r.hour);
    Ok(records)
}

/// HTTP client for the operator's `obtieneValoresTotal` endpoint.
pub struct CenaceClient {
    endpoint: String,
}

impl CenaceClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl DemandSource for CenaceClient {
    fn fetch_day(&self, zone: Zone, timeout: Duration) -> std::result::Result<Vec<LiveRecord>, SourceError> {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let body = format!(r#"{{"gerencia":"{}"}}"#, zone.gerencia());

        debug!("POST {} for {}", self.endpoint, zone);
        let response = agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json; charset=utf-8")
            .set("Accept", "application/json, text/plain, */*")
            .set("User-Agent", "Mozilla/5.0")
            .set("Origin", "https://www.cenace.gob.mx")
            .set("Referer", "https://www.cenace.gob.mx/GraficaDemanda.aspx")
            .set("X-Requested-With", "XMLHttpRequest")
            .send_string(&body)?;

        let text = response.into_string()?;
        parse_payload(&text)
    }
}

fn midnight(day: NaiveDate) -> chrono::NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

/// Hourly table for one live day: demand in the requested zone's column,
/// generation and forecast as auxiliary measures.
pub fn live_table(records: &[LiveRecord], zone: Zone, day: NaiveDate, tz: Tz) -> NormalizedTable {
    let mut demand = Observations::default();
    let mut generation: BTreeMap<i64, Option<f64>> = BTreeMap::new();
    let mut forecast: BTreeMap<i64, Option<f64>> = BTreeMap::new();

    for record in records {
        if !(1..=24).contains(&record.hour) {
            demand.unresolved += 1;
            continue;
        }
        let Some(at) = ChronoDuration::try_hours(record.hour - 1)
            .and_then(|offset| midnight(day).checked_add_signed(offset))
            .and_then(|naive| localize(naive, tz))
        else {
            demand.unresolved += 1;
            continue;
        };
        demand.insert(zone, at, record.demand_mw);
        generation.insert(at.timestamp(), record.generation_mw);
        forecast.insert(at.timestamp(), record.forecast_mw);
    }

    let grid = demand
        .span()
        .map(|(start, end)| hourly_grid(start, end, tz))
        .unwrap_or_default();
    let lookup = |values: &BTreeMap<i64, Option<f64>>| -> Vec<Option<f64>> {
        grid.iter()
            .map(|ts| values.get(&ts.timestamp()).copied().flatten())
            .collect()
    };

    let zones = BTreeMap::from([(zone, demand.column(zone, &grid))]);
    let measures = BTreeMap::from([
        (GENERATION.to_string(), lookup(&generation)),
        (FORECAST.to_string(), lookup(&forecast)),
    ]);
    let provenance = Provenance {
        duplicate_rows: demand.duplicates,
        unresolved_timestamps: demand.unresolved,
        live_day: Some(day),
    };
    NormalizedTable::from_parts(tz, grid, zones, measures, provenance)
}

/// 24 hourly rows starting at local midnight of `day`, every numeric column
/// zero.
///
/// The rows are 24 consecutive absolute hours, so the index stays a regular
/// grid. On a 23-hour DST day the last row falls on the next local date; on a
/// 25-hour day the last local hour of `day` is not covered.
pub fn placeholder_table(day: NaiveDate, tz: Tz) -> NormalizedTable {
    let grid = match localize(midnight(day), tz) {
        Some(start) => hourly_grid(start.timestamp(), start.timestamp() + 23 * 3600, tz),
        None => Vec::new(),
    };
    let zeros = vec![Some(0.0); grid.len()];
    let zones = Zone::ALL.iter().map(|z| (*z, zeros.clone())).collect();
    let measures = BTreeMap::from([
        (GENERATION.to_string(), zeros.clone()),
        (FORECAST.to_string(), zeros),
    ]);
    let provenance = Provenance {
        live_day: Some(day),
        ..Default::default()
    };
    NormalizedTable::from_parts(tz, grid, zones, measures, provenance)
}

/// Live single-day fetch behind a (system, date) keyed parquet cache.
pub struct FetchCache<S> {
    source: S,
    cache_dir: PathBuf,
    tz: Tz,
}

impl<S: DemandSource> FetchCache<S> {
    pub fn new(source: S, cache_dir: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            source,
            cache_dir: cache_dir.into(),
            tz,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Calendar date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    pub fn cache_path(&self, zone: Zone, day: NaiveDate) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}", zone, day.format("%Y-%m-%d")));
        let key = format!("{:x}", hasher.finalize());
        self.cache_dir.join(format!("demanda_{}_{}.parquet", zone, key))
    }

    /// Today's demand for `zone`.
    ///
    /// Cache hits return `from_cache = true, batches = 0`. A remote failure
    /// becomes an all-zero placeholder when `allow_fallback` is set and a
    /// `FetchFailed` error otherwise.
    pub fn fetch(
        &self,
        zone: Zone,
        use_cache: bool,
        timeout: Duration,
        allow_fallback: bool,
    ) -> Result<FetchResult> {
        self.fetch_on(self.today(), zone, use_cache, timeout, allow_fallback)
    }

    pub fn fetch_on(
        &self,
        day: NaiveDate,
        zone: Zone,
        use_cache: bool,
        timeout: Duration,
        allow_fallback: bool,
    ) -> Result<FetchResult> {
        let path = self.cache_path(zone, day);

        if use_cache && path.exists() {
            match store::read_parquet(&path) {
                Ok(table) => {
                    info!("{} {}: served from cache {}", zone, day, path.display());
                    return Ok(FetchResult {
                        table,
                        from_cache: true,
                        batches: 0,
                        synthetic: false,
                    });
                }
                Err(e) => warn!("ignoring unreadable cache entry {}: {}", path.display(), e),
            }
        }

        match self.source.fetch_day(zone, timeout) {
            Ok(records) => {
                let table = live_table(&records, zone, day, self.tz);
                info!("{} {}: fetched {} hourly records", zone, day, records.len());
                if use_cache {
                    if let Err(e) = store::write_parquet(&table, &path) {
                        warn!("could not cache {}: {}", path.display(), e);
                    }
                }
                Ok(FetchResult {
                    table,
                    from_cache: false,
                    batches: 1,
                    synthetic: false,
                })
            }
            Err(cause) if allow_fallback => {
                warn!("{} {}: live fetch failed ({}); using placeholder", zone, day, cause);
                Ok(FetchResult {
                    table: placeholder_table(day, self.tz),
                    from_cache: false,
                    batches: 1,
                    synthetic: true,
                })
            }
            Err(cause) => Err(IngestError::FetchFailed {
                system: zone,
                source: cause,
            }),
        }
    }
}
