//! Hand-off from a demand table to an external economic-dispatch solver.
//!
//! No solver ships here; callers plug one in through `DispatchSolver`.

use crate::models::{NormalizedTable, Zone};
use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub name: String,
    pub zone: Zone,
    pub capacity_mw: f64,
    pub cost_per_mwh: f64,
}

/// Demand as the solver sees it: local wall-clock snapshots, no gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchInput {
    pub snapshots: Vec<NaiveDateTime>,
    pub demand: BTreeMap<Zone, Vec<f64>>,
    /// Hours left out because at least one zone had no value.
    pub dropped_hours: usize,
}

impl DispatchInput {
    pub fn from_table(table: &NormalizedTable) -> Self {
        let mut snapshots = Vec::new();
        let mut demand: BTreeMap<Zone, Vec<f64>> =
            Zone::ALL.iter().map(|z| (*z, Vec::new())).collect();
        let mut dropped_hours = 0;

        for (row, ts) in table.index().iter().enumerate() {
            let values: Option<Vec<(Zone, f64)>> = table
                .zones()
                .map(|(zone, column)| column[row].map(|v| (zone, v)))
                .collect();
            let Some(values) = values else {
                dropped_hours += 1;
                continue;
            };
            snapshots.push(ts.naive_local());
            for (zone, value) in values {
                demand.entry(zone).or_default().push(value);
            }
        }

        if dropped_hours > 0 {
            warn!("{} hours with missing zone demand left out of dispatch", dropped_hours);
        }
        Self {
            snapshots,
            demand,
            dropped_hours,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub objective: f64,
    /// MW per generator name, aligned with `DispatchInput::snapshots`.
    pub production: BTreeMap<String, Vec<f64>>,
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("dispatch problem is infeasible: {0}")]
    Infeasible(String),

    #[error("solver failed: {0}")]
    Failed(String),
}

pub trait DispatchSolver {
    fn solve(
        &self,
        input: &DispatchInput,
        generators: &[GeneratorSpec],
    ) -> Result<DispatchOutcome, SolverError>;
}
