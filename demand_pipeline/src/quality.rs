//! Completeness summary of a finished table.

use crate::models::NormalizedTable;
use chrono::{DateTime, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Hours with no value in any zone column.
#[derive(Debug, Clone, PartialEq)]
pub enum MissingHours {
    /// Live single-day tables, checked against hour labels 1..=24.
    Labels { day: NaiveDate, hours: Vec<u32> },
    /// Everything else, checked against the table's own hourly span.
    Span(Vec<DateTime<Tz>>),
}

impl MissingHours {
    pub fn len(&self) -> usize {
        match self {
            MissingHours::Labels { hours, .. } => hours.len(),
            MissingHours::Span(hours) => hours.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub rows: usize,
    pub missing_hours: MissingHours,
    /// Observations replaced by a later one for the same (timestamp, zone).
    pub duplicate_rows: usize,
    pub unresolved_timestamps: usize,
    /// Missing values per zone and measure column.
    pub missing_values: BTreeMap<String, usize>,
}

fn row_is_empty(table: &NormalizedTable, row: usize) -> bool {
    table.zones().all(|(_, values)| values[row].is_none())
}

fn missing_labels(table: &NormalizedTable, day: NaiveDate) -> Vec<u32> {
    let midnight = day.and_time(NaiveTime::MIN);
    let present: BTreeSet<u32> = table
        .index()
        .iter()
        .enumerate()
        .filter(|(row, _)| !row_is_empty(table, *row))
        .filter_map(|(_, ts)| {
            let offset = (ts.naive_local() - midnight).num_hours();
            (0..24).contains(&offset).then_some(offset as u32 + 1)
        })
        .collect();
    (1..=24).filter(|h| !present.contains(h)).collect()
}

pub fn report(table: &NormalizedTable) -> QualityReport {
    let missing_hours = match table.provenance().live_day {
        Some(day) => MissingHours::Labels {
            day,
            hours: missing_labels(table, day),
        },
        None => MissingHours::Span(
            table
                .index()
                .iter()
                .enumerate()
                .filter(|(row, _)| row_is_empty(table, *row))
                .map(|(_, ts)| *ts)
                .collect(),
        ),
    };

    QualityReport {
        rows: table.height(),
        missing_hours,
        duplicate_rows: table.provenance().duplicate_rows,
        unresolved_timestamps: table.provenance().unresolved_timestamps,
        missing_values: table.missing_counts(),
    }
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows: {}", self.rows)?;
        match &self.missing_hours {
            MissingHours::Labels { day, hours } if hours.is_empty() => {
                writeln!(f, "Missing hours ({}): none", day)?
            }
            MissingHours::Labels { day, hours } => {
                let labels: Vec<String> = hours.iter().map(u32::to_string).collect();
                writeln!(f, "Missing hours ({}): {}", day, labels.join(", "))?
            }
            MissingHours::Span(hours) => {
                writeln!(f, "Missing hours: {}", hours.len())?;
                for ts in hours.iter().take(10) {
                    writeln!(f, "  {}", ts.format("%Y-%m-%d %H:%M %Z"))?;
                }
                if hours.len() > 10 {
                    writeln!(f, "  ... and {} more", hours.len() - 10)?;
                }
            }
        }
        writeln!(f, "Duplicate rows replaced: {}", self.duplicate_rows)?;
        writeln!(f, "Unresolved timestamps: {}", self.unresolved_timestamps)?;
        writeln!(f, "Missing values:")?;
        for (column, count) in &self.missing_values {
            writeln!(f, "  {:<16} {}", column, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{live_table, placeholder_table, LiveRecord};
    use crate::merge::merge;
    use crate::models::{Stamp, Zone, ZoneSeries};
    use chrono::{Duration, NaiveDateTime};
    use chrono_tz::America::Mexico_City;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn test_live_day_checked_against_24_labels() {
        let records: Vec<LiveRecord> = [1, 2, 3, 5]
            .iter()
            .map(|h| LiveRecord {
                hour: *h,
                demand_mw: if *h == 3 { None } else { Some(100.0) },
                generation_mw: None,
                forecast_mw: Some(90.0),
            })
            .collect();
        let table = live_table(&records, Zone::Sin, day(), Mexico_City);
        let summary = report(&table);

        assert_eq!(summary.rows, 5);
        let MissingHours::Labels { day: d, hours } = &summary.missing_hours else {
            panic!("expected hour labels");
        };
        assert_eq!(*d, day());
        let mut expected = vec![3, 4];
        expected.extend(6..=24);
        assert_eq!(hours, &expected);
        assert_eq!(summary.missing_values["SIN"], 2);
        assert_eq!(summary.missing_values["BCA"], 5);
        assert_eq!(summary.missing_values["generation_mw"], 5);
        assert_eq!(summary.missing_values["forecast_mw"], 1);
    }

    #[test]
    fn test_placeholder_has_no_missing_hours() {
        let summary = report(&placeholder_table(day(), Mexico_City));
        assert_eq!(summary.rows, 24);
        assert!(summary.missing_hours.is_empty());
        assert!(summary.missing_values.values().all(|c| *c == 0));
    }

    #[test]
    fn test_historical_span_and_duplicates() {
        let start = NaiveDateTime::parse_from_str("2024-01-01 00:00", "%Y-%m-%d %H:%M").unwrap();
        let mut s = ZoneSeries::new("h");
        s.push(Zone::Sin, Stamp::Naive(start), Some(1.0));
        s.push(Zone::Bca, Stamp::Naive(start + Duration::hours(1)), None);
        s.push(Zone::Sin, Stamp::Naive(start + Duration::hours(3)), Some(4.0));
        s.push(Zone::Sin, Stamp::Naive(start + Duration::hours(3)), Some(5.0));
        let table = merge(&[s], Mexico_City);
        let summary = report(&table);

        assert_eq!(summary.rows, 4);
        assert_eq!(summary.duplicate_rows, 1);
        let MissingHours::Span(hours) = &summary.missing_hours else {
            panic!("expected span");
        };
        let local: Vec<NaiveDateTime> = hours.iter().map(|t| t.naive_local()).collect();
        assert_eq!(local, vec![start + Duration::hours(1), start + Duration::hours(2)]);
        assert!(summary.to_string().contains("Duplicate rows replaced: 1"));
    }

    #[test]
    fn test_report_leaves_table_untouched() {
        let table = placeholder_table(day(), Mexico_City);
        let before = table.clone();
        let _ = report(&table);
        assert_eq!(table, before);
    }
}
