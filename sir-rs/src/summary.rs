use log::warn;
use serde::{Deserialize, Serialize};

use crate::compartments::Compartment;
use crate::integrator::Tolerance;
use crate::parameters::{InitialConditions, ParameterSet};
use crate::schedule::RateSchedule;
use crate::trajectory::Trajectory;

/// Which transmission rate a reproduction number refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePhase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReproductionNumbers {
    pub pre_intervention: f64,
    /// `None` when β never changes.
    pub post_intervention: Option<f64>,
}

impl ReproductionNumbers {
    pub fn for_schedule(parameters: &ParameterSet, start: f64, end: f64) -> Self {
        let gamma = parameters.gamma;
        match &parameters.transmission {
            RateSchedule::Constant { beta } => Self {
                pre_intervention: beta / gamma,
                post_intervention: None,
            },
            RateSchedule::StepAtTime { before, after, .. } => Self {
                pre_intervention: before / gamma,
                post_intervention: Some(after / gamma),
            },
            schedule @ RateSchedule::PiecewiseLinear { .. } => {
                let (first, last) = (schedule.rate_at(start), schedule.rate_at(end));
                Self {
                    pre_intervention: first / gamma,
                    post_intervention: (last != first).then(|| last / gamma),
                }
            }
        }
    }

    pub fn get(&self, phase: RatePhase) -> f64 {
        match phase {
            RatePhase::Pre => self.pre_intervention,
            RatePhase::Post => self.post_intervention.unwrap_or(self.pre_intervention),
        }
    }
}

/// An output point where S + I + R drifted from N by more than the solver
/// tolerance. Reported, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConservationViolation {
    pub time: f64,
    pub total: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpidemicSummary {
    pub population: f64,
    /// R at the last sampled time.
    pub final_size: f64,
    pub attack_rate: f64,
    pub peak_infected: f64,
    /// Earliest sampled time at which `peak_infected` is reached.
    pub peak_time: f64,
    pub reproduction_numbers: ReproductionNumbers,
    pub herd_immunity_threshold: f64,
    pub recovered_monotone: bool,
    /// Largest |S + I + R - N| over the sampled times.
    pub max_conservation_error: f64,
    pub conservation_warnings: Vec<ConservationViolation>,
}

impl EpidemicSummary {
    pub fn from_trajectory(
        trajectory: &Trajectory,
        parameters: &ParameterSet,
        tolerance: &Tolerance,
    ) -> Self {
        let population = parameters.population;
        let final_size = trajectory.last().state.recovered;

        let mut peak = trajectory.first();
        for sample in trajectory {
            if sample.state.infectious > peak.state.infectious {
                peak = sample;
            }
        }

        let max_conservation_error = trajectory.max_conservation_error(population);
        let bound = tolerance.weight(population);
        let conservation_warnings: Vec<ConservationViolation> = trajectory
            .iter()
            .filter(|s| (s.state.total() - population).abs() > bound)
            .map(|s| ConservationViolation {
                time: s.time,
                total: s.state.total(),
                expected: population,
            })
            .collect();
        if !conservation_warnings.is_empty() {
            warn!(
                "population drifted by up to {max_conservation_error} at {} of {} points",
                conservation_warnings.len(),
                trajectory.len()
            );
        }

        let reproduction_numbers = ReproductionNumbers::for_schedule(
            parameters,
            trajectory.first().time,
            trajectory.last().time,
        );

        Self {
            population,
            final_size,
            attack_rate: final_size / population,
            peak_infected: peak.state.infectious,
            peak_time: peak.time,
            herd_immunity_threshold: herd_immunity_threshold(reproduction_numbers.pre_intervention),
            reproduction_numbers,
            recovered_monotone: trajectory
                .is_non_decreasing(Compartment::Recovered, tolerance.absolute),
            max_conservation_error,
            conservation_warnings,
        }
    }

    /// β/γ for the requested phase.
    pub fn r0(&self, phase: RatePhase) -> f64 {
        self.reproduction_numbers.get(phase)
    }

    pub fn is_conserved(&self) -> bool {
        self.conservation_warnings.is_empty()
    }
}

/// Fraction immune above which a single case cannot start an outbreak.
pub fn herd_immunity_threshold(r0: f64) -> f64 {
    if r0 > 1.0 { 1.0 - 1.0 / r0 } else { 0.0 }
}

/// Final size of an epidemic with constant `r0`, from the final-size
/// relation S∞ = S0 exp(-r0 (N - S∞ - R0_initial) / N), solved by bisection
/// on (0, S0). Returns cumulative recoveries R∞ = N - S∞.
pub fn analytic_final_size(r0: f64, population: f64, initial: &InitialConditions) -> f64 {
    let s0 = population - initial.infectious - initial.recovered;
    if initial.infectious <= 0.0 || s0 <= 0.0 {
        return population - s0;
    }
    let residual = |s: f64| {
        s - s0 * (-r0 * (population - s - initial.recovered) / population).exp()
    };
    let (mut lo, mut hi) = (0.0, s0);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if residual(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    population - 0.5 * (lo + hi)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compartments::Compartments;
    use crate::schedule::Intervention;
    use crate::trajectory::Sample;

    fn trajectory(points: &[(f64, f64, f64, f64)]) -> Trajectory {
        Trajectory::new(
            points
                .iter()
                .map(|(t, s, i, r)| Sample::new(*t, Compartments::new(*s, *i, *r)))
                .collect(),
        )
    }

    #[test]
    fn test_peak_and_final_size() {
        let trajectory = trajectory(&[
            (0.0, 99.0, 1.0, 0.0),
            (1.0, 80.0, 15.0, 5.0),
            (2.0, 60.0, 15.0, 25.0),
            (3.0, 55.0, 5.0, 40.0),
        ]);
        let parameters = ParameterSet::constant(100.0, 0.3, 0.1);
        let summary =
            EpidemicSummary::from_trajectory(&trajectory, &parameters, &Tolerance::default());
        assert_eq!(summary.final_size, 40.0);
        assert_eq!(summary.attack_rate, 0.4);
        assert_eq!(summary.peak_infected, 15.0);
        assert_eq!(summary.peak_time, 1.0);
        assert!(summary.recovered_monotone);
        assert!(summary.is_conserved());
        assert_eq!(summary.max_conservation_error, 0.0);
        assert_eq!(summary.r0(RatePhase::Pre), 0.3 / 0.1);
        assert_eq!(summary.r0(RatePhase::Post), 0.3 / 0.1);
        assert_eq!(summary.reproduction_numbers.post_intervention, None);
    }

    #[test]
    fn test_conservation_warning() {
        let trajectory = trajectory(&[(0.0, 99.0, 1.0, 0.0), (1.0, 90.0, 5.0, 6.0)]);
        let parameters = ParameterSet::constant(100.0, 0.3, 0.1);
        let summary =
            EpidemicSummary::from_trajectory(&trajectory, &parameters, &Tolerance::default());
        assert_eq!(
            summary.conservation_warnings,
            vec![ConservationViolation {
                time: 1.0,
                total: 101.0,
                expected: 100.0
            }]
        );
        assert_eq!(summary.max_conservation_error, 1.0);
    }

    #[test]
    fn test_reproduction_numbers_with_intervention() {
        let parameters = ParameterSet::new(1e5, Intervention::new(30.0, 0.2).schedule(0.3), 0.1);
        let numbers = ReproductionNumbers::for_schedule(&parameters, 0.0, 160.0);
        assert_eq!(numbers.get(RatePhase::Pre), 0.3 / 0.1);
        assert_eq!(numbers.get(RatePhase::Post), 0.2 / 0.1);

        let parameters = ParameterSet::new(
            1e5,
            RateSchedule::PiecewiseLinear {
                knots: vec![(10.0, 0.5), (20.0, 0.25)],
            },
            0.1,
        );
        let numbers = ReproductionNumbers::for_schedule(&parameters, 0.0, 160.0);
        assert_eq!(numbers.pre_intervention, 0.5 / 0.1);
        assert_eq!(numbers.post_intervention, Some(0.25 / 0.1));
    }

    #[test]
    fn test_herd_immunity_threshold() {
        assert!((herd_immunity_threshold(3.0) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(herd_immunity_threshold(0.8), 0.0);
    }

    #[test]
    fn test_analytic_final_size() {
        // Classic value for R0 = 2: about 79.7% of the population is infected.
        let size = analytic_final_size(2.0, 1e6, &InitialConditions::new(1.0, 0.0));
        assert!((size / 1e6 - 0.7968).abs() < 1e-3);
        assert_eq!(analytic_final_size(2.0, 1e6, &InitialConditions::new(0.0, 10.0)), 10.0);
    }
}
