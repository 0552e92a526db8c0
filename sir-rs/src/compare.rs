use log::debug;
use serde::Serialize;

use crate::compartments::Compartment;
use crate::error::{Result, SirError};
use crate::scenario::Scenario;
use crate::trajectory::Trajectory;

/// One compartment from several trajectories, keyed by the shared time grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTable {
    compartment: Compartment,
    labels: Vec<String>,
    times: Vec<f64>,
    series: Vec<Vec<f64>>,
}

impl ComparisonTable {
    pub fn compartment(&self) -> Compartment {
        self.compartment
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn series(&self, label: &str) -> Option<&[f64]> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.series[i].as_slice())
    }

    /// `(time, value per label)` in grid order.
    pub fn rows(&self) -> impl Iterator<Item = (f64, Vec<f64>)> + '_ {
        self.times
            .iter()
            .enumerate()
            .map(|(row, time)| (*time, self.series.iter().map(|s| s[row]).collect()))
    }
}

/// Aligns `compartment` across trajectories. All trajectories must share
/// exactly the same time grid.
pub fn compare(runs: &[(&str, &Trajectory)], compartment: Compartment) -> Result<ComparisonTable> {
    let times = runs
        .first()
        .map(|(_, trajectory)| trajectory.times())
        .unwrap_or_default();
    if let Some((reference, first)) = runs.first() {
        for (label, trajectory) in &runs[1..] {
            if !first.same_grid(trajectory) {
                return Err(SirError::GridMismatch {
                    label: label.to_string(),
                    reference: reference.to_string(),
                });
            }
        }
    }
    Ok(ComparisonTable {
        compartment,
        labels: runs.iter().map(|(label, _)| label.to_string()).collect(),
        times,
        series: runs
            .iter()
            .map(|(_, trajectory)| trajectory.column(compartment))
            .collect(),
    })
}

/// Compares every completed scenario; scenarios without a trajectory are
/// left out.
pub fn compare_scenarios(
    scenarios: &[Scenario],
    compartment: Compartment,
) -> Result<ComparisonTable> {
    let runs: Vec<(&str, &Trajectory)> = scenarios
        .iter()
        .filter_map(|scenario| match scenario.trajectory() {
            Some(trajectory) => Some((scenario.label(), trajectory)),
            None => {
                debug!(
                    "leaving {} scenario `{}` out of the {compartment} comparison",
                    scenario.state().name(),
                    scenario.label()
                );
                None
            }
        })
        .collect();
    compare(&runs, compartment)
}
