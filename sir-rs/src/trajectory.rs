use serde::{Deserialize, Serialize};

use crate::compartments::{Compartment, Compartments};
use crate::parameters::ParameterSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    #[serde(flatten)]
    pub state: Compartments,
}

impl Sample {
    pub fn new(time: f64, state: Compartments) -> Self {
        Self { time, state }
    }
}

/// States on every point of a time grid, in grid order. Only the scenario
/// runner builds one, and it cannot be modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    samples: Vec<Sample>,
}

impl Trajectory {
    /// `samples` must be non-empty and ordered by time.
    pub(crate) fn new(samples: Vec<Sample>) -> Self {
        debug_assert!(!samples.is_empty());
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> &Sample {
        &self.samples[0]
    }

    pub fn last(&self) -> &Sample {
        &self.samples[self.samples.len() - 1]
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }

    pub fn column(&self, compartment: Compartment) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.state.get(compartment))
            .collect()
    }

    /// Whether both trajectories are sampled at exactly the same times.
    pub fn same_grid(&self, other: &Trajectory) -> bool {
        self.samples.len() == other.samples.len()
            && self
                .samples
                .iter()
                .zip(&other.samples)
                .all(|(a, b)| a.time == b.time)
    }

    /// Whether `compartment` never decreases by more than `slack` between
    /// consecutive samples.
    pub fn is_non_decreasing(&self, compartment: Compartment, slack: f64) -> bool {
        self.samples
            .windows(2)
            .all(|w| w[1].state.get(compartment) >= w[0].state.get(compartment) - slack)
    }

    /// Largest |S + I + R - N| over the trajectory.
    pub fn max_conservation_error(&self, population: f64) -> f64 {
        self.samples
            .iter()
            .map(|s| (s.state.total() - population).abs())
            .fold(0.0, f64::max)
    }

    /// Rt = β(t) / γ * S(t) / N at every sample.
    pub fn effective_reproduction(&self, parameters: &ParameterSet) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| {
                parameters.reproduction_number_at(s.time) * s.state.susceptible
                    / parameters.population
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
