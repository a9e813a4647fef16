use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Top-level interconnection systems published by the grid operator.
///
/// Declaration order is the column order of every table: BCA, BCS, SIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Zone {
    #[serde(rename = "BCA")]
    Bca,
    #[serde(rename = "BCS")]
    Bcs,
    #[serde(rename = "SIN")]
    Sin,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Bca, Zone::Bcs, Zone::Sin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Bca => "BCA",
            Zone::Bcs => "BCS",
            Zone::Sin => "SIN",
        }
    }

    /// Numeric "gerencia" code the live demand endpoint expects.
    pub fn gerencia(&self) -> &'static str {
        match self {
            Zone::Sin => "10",
            Zone::Bca => "1",
            Zone::Bcs => "2",
        }
    }

    /// Case-insensitive exact match on a trimmed cell. Sub-area codes such as
    /// `SIN-NORTE` are not zones and return `None`.
    pub fn parse(code: &str) -> Option<Zone> {
        let code = code.trim().trim_matches('"').trim();
        Zone::ALL
            .into_iter()
            .find(|z| z.as_str().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Zone::parse(s).ok_or_else(|| format!("unknown system '{}'; use SIN, BCA or BCS", s))
    }
}

/// Timestamp as read from a source, before timezone resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Wall-clock time with no offset; localized at merge time.
    Naive(NaiveDateTime),
    /// Absolute instant; converted at merge time.
    Zoned(DateTime<FixedOffset>),
}

impl From<NaiveDateTime> for Stamp {
    fn from(value: NaiveDateTime) -> Self {
        Stamp::Naive(value)
    }
}

/// Ordered cells of a delimiter-separated export, starting after the
/// detected header row. Lives only between detection and normalization.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    /// Header cells, trimmed and quote-stripped.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }
}

/// Per-zone observations from one source, in source order.
#[derive(Debug, Clone, Default)]
pub struct ZoneSeries {
    pub source: String,
    pub zones: BTreeMap<Zone, Vec<(Stamp, Option<f64>)>>,
}

impl ZoneSeries {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            zones: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, zone: Zone, stamp: Stamp, value: Option<f64>) {
        self.zones.entry(zone).or_default().push((stamp, value));
    }

    pub fn get(&self, zone: Zone) -> Option<&[(Stamp, Option<f64>)]> {
        self.zones.get(&zone).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.zones.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters recorded while a table was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// (timestamp, zone) observations discarded because a later one won.
    pub duplicate_rows: usize,
    /// Observations dropped because their local time was ambiguous.
    pub unresolved_timestamps: usize,
    /// Set for single-day live tables; quality is then judged against hours 1-24.
    pub live_day: Option<NaiveDate>,
}

/// Canonical hourly, timezone-aware demand table.
///
/// The index is a contiguous hourly grid with no duplicates; every known zone
/// has a column of the same length, missing hours are `None`. Auxiliary
/// measures (generation, forecast) share the index.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    timezone: Tz,
    index: Vec<DateTime<Tz>>,
    zones: BTreeMap<Zone, Vec<Option<f64>>>,
    measures: BTreeMap<String, Vec<Option<f64>>>,
    provenance: Provenance,
}

impl NormalizedTable {
    pub(crate) fn from_parts(
        timezone: Tz,
        index: Vec<DateTime<Tz>>,
        mut zones: BTreeMap<Zone, Vec<Option<f64>>>,
        measures: BTreeMap<String, Vec<Option<f64>>>,
        provenance: Provenance,
    ) -> Self {
        for zone in Zone::ALL {
            zones.entry(zone).or_insert_with(|| vec![None; index.len()]);
        }
        debug_assert!(zones.values().all(|c| c.len() == index.len()));
        debug_assert!(measures.values().all(|c| c.len() == index.len()));
        debug_assert!(index
            .windows(2)
            .all(|w| w[1].timestamp() - w[0].timestamp() == 3600));
        Self {
            timezone,
            index,
            zones,
            measures,
            provenance,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn index(&self) -> &[DateTime<Tz>] {
        &self.index
    }

    pub fn height(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn start(&self) -> Option<DateTime<Tz>> {
        self.index.first().copied()
    }

    pub fn end(&self) -> Option<DateTime<Tz>> {
        self.index.last().copied()
    }

    pub fn zone(&self, zone: Zone) -> &[Option<f64>] {
        self.zones.get(&zone).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn zones(&self) -> impl Iterator<Item = (Zone, &[Option<f64>])> {
        self.zones.iter().map(|(z, v)| (*z, v.as_slice()))
    }

    pub fn measure(&self, name: &str) -> Option<&[Option<f64>]> {
        self.measures.get(name).map(Vec::as_slice)
    }

    pub fn measures(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.measures.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Row position of an instant on the grid.
    pub fn position(&self, at: DateTime<Utc>) -> Option<usize> {
        let start = self.index.first()?.timestamp();
        let offset = at.timestamp() - start;
        if offset < 0 || offset % 3600 != 0 {
            return None;
        }
        let pos = (offset / 3600) as usize;
        (pos < self.index.len()).then_some(pos)
    }

    pub fn value_at(&self, zone: Zone, at: DateTime<Utc>) -> Option<f64> {
        self.position(at).and_then(|pos| self.zone(zone)[pos])
    }

    /// Missing-value count per column name, zones first.
    pub fn missing_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (zone, values) in &self.zones {
            counts.insert(
                zone.to_string(),
                values.iter().filter(|v| v.is_none()).count(),
            );
        }
        for (name, values) in &self.measures {
            counts.insert(name.clone(), values.iter().filter(|v| v.is_none()).count());
        }
        counts
    }

    /// Re-expresses the zone columns as a series of zoned observations, so a
    /// finished table can be merged again.
    pub fn to_series(&self, source: impl Into<String>) -> ZoneSeries {
        let mut series = ZoneSeries::new(source);
        for (zone, values) in &self.zones {
            for (ts, value) in self.index.iter().zip(values) {
                series.push(*zone, Stamp::Zoned(ts.fixed_offset()), *value);
            }
        }
        series
    }
}

/// Outcome of one live fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub table: NormalizedTable,
    pub from_cache: bool,
    /// 0 when served from cache, 1 otherwise.
    pub batches: usize,
    /// True when the table is the all-zero placeholder built after a failure.
    pub synthetic: bool,
}
