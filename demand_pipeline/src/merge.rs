//! Combines normalized series onto one timezone-aware hourly grid.
//!
//! The merge needs the full set of inputs: dedup and the grid span are only
//! known once every source has been read.

use crate::models::{NormalizedTable, Provenance, Stamp, Zone, ZoneSeries};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;
use log::{info, warn};
use std::collections::BTreeMap;

const HOUR_SECS: i64 = 3600;
/// Upper bound when searching past a DST gap.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Attaches `tz` to a wall-clock time.
///
/// Times inside a spring-forward gap move to the first valid instant after
/// the gap. Times repeated by a fall-back transition are ambiguous and yield
/// `None`.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(_, _) => None,
        LocalResult::None => (1..=MAX_GAP_MINUTES).find_map(|m| {
            match tz.from_local_datetime(&(naive + Duration::minutes(m))) {
                LocalResult::Single(dt) => Some(dt),
                _ => None,
            }
        }),
    }
}

pub fn resolve(stamp: Stamp, tz: Tz) -> Option<DateTime<Tz>> {
    match stamp {
        Stamp::Naive(naive) => localize(naive, tz),
        Stamp::Zoned(dt) => Some(dt.with_timezone(&tz)),
    }
}

/// Contiguous hourly instants from `start` to `end` inclusive (Unix seconds).
pub(crate) fn hourly_grid(start: i64, end: i64, tz: Tz) -> Vec<DateTime<Tz>> {
    (0..)
        .map(|step| start + step * HOUR_SECS)
        .take_while(|secs| *secs <= end)
        .filter_map(|secs| DateTime::from_timestamp(secs, 0))
        .map(|utc| utc.with_timezone(&tz))
        .collect()
}

/// Unix seconds of the start of the local hour containing `at`.
pub(crate) fn hour_floor(at: &DateTime<Tz>) -> i64 {
    let secs = at.timestamp();
    let offset = i64::from(at.offset().fix().local_minus_utc());
    secs - (secs + offset).rem_euclid(HOUR_SECS)
}

/// Observations keyed by zone and hour, last write wins.
#[derive(Debug, Default)]
pub(crate) struct Observations {
    values: BTreeMap<Zone, BTreeMap<i64, Option<f64>>>,
    pub(crate) duplicates: usize,
    pub(crate) unresolved: usize,
    /// Observations that fell between hours and were moved to the hour start.
    pub(crate) floored: usize,
}

impl Observations {
    pub(crate) fn insert(&mut self, zone: Zone, at: DateTime<Tz>, value: Option<f64>) {
        let hour = hour_floor(&at);
        if hour != at.timestamp() {
            self.floored += 1;
        }
        let previous = self.values.entry(zone).or_default().insert(hour, value);
        if previous.is_some() {
            self.duplicates += 1;
        }
    }

    pub(crate) fn span(&self) -> Option<(i64, i64)> {
        let min = self.values.values().filter_map(|m| m.keys().next()).min()?;
        let max = self.values.values().filter_map(|m| m.keys().next_back()).max()?;
        Some((*min, *max))
    }

    pub(crate) fn column(&self, zone: Zone, grid: &[DateTime<Tz>]) -> Vec<Option<f64>> {
        let Some(values) = self.values.get(&zone) else {
            return vec![None; grid.len()];
        };
        grid.iter()
            .map(|ts| values.get(&ts.timestamp()).copied().flatten())
            .collect()
    }
}

/// Merges `series` (in order) into one hourly table in `tz`.
///
/// Later observations of the same (timestamp, zone) replace earlier ones.
/// Hours without data stay `None`; nothing is interpolated.
pub fn merge(series: &[ZoneSeries], tz: Tz) -> NormalizedTable {
    let mut observations = Observations::default();

    for source in series {
        for (zone, rows) in &source.zones {
            for (stamp, value) in rows {
                match resolve(*stamp, tz) {
                    Some(at) => observations.insert(*zone, at, *value),
                    None => observations.unresolved += 1,
                }
            }
        }
    }

    if observations.unresolved > 0 {
        warn!(
            "dropped {} observations with ambiguous local times in {}",
            observations.unresolved,
            tz.name()
        );
    }

    if observations.floored > 0 {
        warn!(
            "{} observations between hours were moved to the start of their hour",
            observations.floored
        );
    }

    let grid = observations
        .span()
        .map(|(start, end)| hourly_grid(start, end, tz))
        .unwrap_or_default();

    let zones: BTreeMap<Zone, Vec<Option<f64>>> = Zone::ALL
        .iter()
        .map(|zone| (*zone, observations.column(*zone, &grid)))
        .collect();

    info!(
        "merged {} sources into {} hourly rows ({} duplicates replaced)",
        series.len(),
        grid.len(),
        observations.duplicates
    );

    NormalizedTable::from_parts(
        tz,
        grid,
        zones,
        BTreeMap::new(),
        Provenance {
            duplicate_rows: observations.duplicates,
            unresolved_timestamps: observations.unresolved,
            live_day: None,
        },
    )
}
