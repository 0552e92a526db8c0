use serde::{Deserialize, Serialize};

use crate::error::{Result, SirError};

/// Upper bound on the number of points a uniform grid may hold.
pub const MAX_GRID_POINTS: usize = 10_000_000;

/// Query times at which a trajectory is reported. Non-empty, finite,
/// non-negative and strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    /// `start, start + step, ...` up to and including `end` when `end - start`
    /// is a whole number of steps.
    pub fn uniform(start: f64, end: f64, step: f64) -> Result<Self> {
        if !step.is_finite() || step <= 0.0 {
            return Err(SirError::invalid(
                "time.step",
                format!("must be a finite positive number, got {step}"),
            ));
        }
        if !end.is_finite() || end < start {
            return Err(SirError::invalid(
                "time.end",
                format!("must be finite and not before start {start}, got {end}"),
            ));
        }
        if !start.is_finite() {
            return Err(SirError::invalid(
                "time.start",
                format!("must be finite, got {start}"),
            ));
        }
        let intervals = ((end - start) / step + 1e-9).floor();
        if !intervals.is_finite() || intervals >= MAX_GRID_POINTS as f64 {
            return Err(SirError::invalid(
                "time.step",
                format!(
                    "step {step} over [{start}, {end}] gives more than {MAX_GRID_POINTS} points"
                ),
            ));
        }
        let intervals = intervals as usize;
        let mut times: Vec<f64> = (0..=intervals).map(|k| start + k as f64 * step).collect();
        if let Some(last) = times.last_mut()
            && (*last - end).abs() < 1e-9 * step
        {
            *last = end;
        }
        Self::from_times(times)
    }

    pub fn from_times(times: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(SirError::invalid("time", "grid must contain at least one time"));
        }
        if let Some(bad) = times.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(SirError::invalid(
                "time",
                format!("grid times must be finite and non-negative, got {bad}"),
            ));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SirError::invalid("time", "grid times must be strictly increasing"));
        }
        Ok(Self { times })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn start(&self) -> f64 {
        self.times[0]
    }

    pub fn end(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl TryFrom<Vec<f64>> for TimeGrid {
    type Error = SirError;

    fn try_from(times: Vec<f64>) -> Result<Self> {
        TimeGrid::from_times(times)
    }
}

impl From<TimeGrid> for Vec<f64> {
    fn from(grid: TimeGrid) -> Self {
        grid.times
    }
}
