use std::sync::OnceLock;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::compartments::Compartments;
use crate::error::{IntegrationFailure, PartialTrajectory, Result, SirError};
use crate::grid::TimeGrid;
use crate::integrator::{SolverOptions, State};
use crate::model::SirModel;
use crate::parameters::{InitialConditions, ParameterSet};
use crate::schedule::{Intervention, RateSchedule};
use crate::summary::EpidemicSummary;
use crate::trajectory::{Sample, Trajectory};

/// Everything needed to produce one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub label: String,
    pub parameters: ParameterSet,
    pub initial: InitialConditions,
    pub grid: TimeGrid,
    #[serde(default)]
    pub solver: SolverOptions,
}

impl ScenarioConfig {
    pub fn new(
        label: impl Into<String>,
        parameters: ParameterSet,
        initial: InitialConditions,
        grid: TimeGrid,
    ) -> Self {
        Self {
            label: label.into(),
            parameters,
            initial,
            grid,
            solver: SolverOptions::default(),
        }
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(SirError::invalid("label", "must not be empty"));
        }
        self.parameters.validate()?;
        self.initial.validate(self.parameters.population)?;
        self.solver.validate()
    }

    pub fn initial_state(&self) -> Compartments {
        self.initial.state(self.parameters.population)
    }

    /// SHA-256 of everything that determines the trajectory (the label is
    /// excluded). Equal fingerprints give identical trajectories.
    pub fn fingerprint(&self) -> Result<String> {
        let encoded =
            serde_json::to_vec(&(&self.parameters, &self.initial, &self.grid, &self.solver))?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }

    /// Same scenario with the transmission rate replaced by a schedule.
    pub fn with_schedule(&self, label: impl Into<String>, schedule: RateSchedule) -> Self {
        let mut config = self.clone();
        config.label = label.into();
        config.parameters.transmission = schedule;
        config
    }

    pub fn with_beta(&self, label: impl Into<String>, beta: f64) -> Self {
        self.with_schedule(label, RateSchedule::constant(beta))
    }

    /// Same scenario with β stepping to `intervention.beta` at
    /// `intervention.time`; the pre-intervention rate is this scenario's
    /// rate at the start of the grid.
    pub fn with_intervention(&self, label: impl Into<String>, intervention: Intervention) -> Self {
        let base = self.parameters.beta_at(self.grid.start());
        self.with_schedule(label, intervention.schedule(base))
    }
}

/// One scenario per intervention time, all reducing β to `reduced_beta`.
pub fn intervention_timing_sweep(
    base: &ScenarioConfig,
    reduced_beta: f64,
    times: &[f64],
) -> Vec<ScenarioConfig> {
    times
        .iter()
        .map(|time| {
            base.with_intervention(
                format!("{}-intervention-t{time}", base.label),
                Intervention::new(*time, reduced_beta),
            )
        })
        .collect()
}

#[derive(Debug)]
pub struct CompletedRun {
    trajectory: Trajectory,
    summary: OnceLock<EpidemicSummary>,
}

impl CompletedRun {
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }
}

#[derive(Debug)]
pub enum ScenarioState {
    Configured,
    Running,
    Completed(CompletedRun),
    Failed(Box<IntegrationFailure>),
}

impl ScenarioState {
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioState::Configured => "configured",
            ScenarioState::Running => "running",
            ScenarioState::Completed(_) => "completed",
            ScenarioState::Failed(_) => "failed",
        }
    }
}

/// A validated configuration and the outcome of running it once.
#[derive(Debug)]
pub struct Scenario {
    config: ScenarioConfig,
    state: ScenarioState,
}

impl Scenario {
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: ScenarioState::Configured,
        })
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn state(&self) -> &ScenarioState {
        &self.state
    }

    /// Integrates the model over the grid. A scenario runs at most once.
    pub fn run(&mut self) -> Result<&Trajectory> {
        if !matches!(self.state, ScenarioState::Configured) {
            return Err(SirError::AlreadyRun {
                label: self.config.label.clone(),
            });
        }
        debug!(
            "running scenario `{}` over {} time points",
            self.config.label,
            self.config.grid.len()
        );
        self.state = ScenarioState::Running;
        self.state = match integrate(&self.config) {
            Ok(trajectory) => {
                debug!(
                    "scenario `{}` completed with R={} at t={}",
                    self.config.label,
                    trajectory.last().state.recovered,
                    trajectory.last().time
                );
                ScenarioState::Completed(CompletedRun {
                    trajectory,
                    summary: OnceLock::new(),
                })
            }
            Err(failure) => {
                warn!("scenario `{}` failed: {failure}", self.config.label);
                ScenarioState::Failed(Box::new(failure))
            }
        };
        if let ScenarioState::Failed(failure) = &self.state {
            return Err(SirError::Integration {
                label: self.config.label.clone(),
                failure: failure.clone(),
            });
        }
        self.trajectory().ok_or_else(|| SirError::NotCompleted {
            label: self.config.label.clone(),
        })
    }

    pub fn trajectory(&self) -> Option<&Trajectory> {
        match &self.state {
            ScenarioState::Completed(run) => Some(&run.trajectory),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&IntegrationFailure> {
        match &self.state {
            ScenarioState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Summary of a completed run, computed on first request.
    pub fn summary(&self) -> Result<&EpidemicSummary> {
        match &self.state {
            ScenarioState::Completed(run) => Ok(run.summary.get_or_init(|| {
                EpidemicSummary::from_trajectory(
                    &run.trajectory,
                    &self.config.parameters,
                    &self.config.solver.tolerance,
                )
            })),
            _ => Err(SirError::NotCompleted {
                label: self.config.label.clone(),
            }),
        }
    }
}

fn integrate(config: &ScenarioConfig) -> std::result::Result<Trajectory, IntegrationFailure> {
    let model = SirModel::new(&config.parameters);
    let times = config.grid.times();
    let to_samples = |states: Vec<State>| -> Vec<Sample> {
        times
            .iter()
            .zip(states)
            .map(|(t, y)| Sample::new(*t, Compartments::from(y)))
            .collect()
    };
    match config
        .solver
        .integrator()
        .integrate(&model, config.initial_state().into(), times)
    {
        Ok(states) => Ok(Trajectory::new(to_samples(states))),
        Err(failure) => Err(IntegrationFailure {
            reason: failure.reason,
            query_time: times[failure.query_index],
            solver_time: failure.solver_time,
            last_good: (failure.last_time, Compartments::from(failure.last_state)),
            partial: PartialTrajectory {
                samples: to_samples(failure.outputs),
                requested: times.len(),
            },
        }),
    }
}

/// Validates every configuration, failing on the first invalid one.
pub fn build_all(configs: Vec<ScenarioConfig>) -> Result<Vec<Scenario>> {
    configs.into_iter().map(Scenario::new).collect()
}

/// Runs every configured scenario, at most one thread per available core.
/// Scenarios share nothing, so one failure leaves the others untouched.
/// Order is preserved.
pub fn run_all(mut scenarios: Vec<Scenario>) -> Vec<Scenario> {
    let workers = std::thread::available_parallelism().map_or(1, usize::from);
    debug!("running {} scenarios on {workers} threads", scenarios.len());
    for batch in scenarios.chunks_mut(workers) {
        std::thread::scope(|scope| {
            for scenario in batch.iter_mut() {
                scope.spawn(move || {
                    // Failures are recorded in the scenario state.
                    let _ = scenario.run();
                });
            }
        });
    }
    scenarios
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::compartments::Compartment;
    use crate::error::FailureReason;
    use crate::integrator::{SolverMethod, Tolerance};
    use crate::summary::{RatePhase, analytic_final_size};

    fn config(label: &str, beta: f64, gamma: f64) -> ScenarioConfig {
        ScenarioConfig::new(
            label,
            ParameterSet::constant(100_000.0, beta, gamma),
            InitialConditions::new(1.0, 0.0),
            TimeGrid::uniform(0.0, 160.0, 1.0).unwrap(),
        )
    }

    fn run(config: ScenarioConfig) -> Scenario {
        let mut scenario = Scenario::new(config).unwrap();
        scenario.run().unwrap();
        scenario
    }

    #[test]
    fn test_conservation() {
        let scenario = run(config("baseline", 0.3, 0.1));
        let trajectory = scenario.trajectory().unwrap();
        assert_eq!(trajectory.len(), 161);
        assert_eq!(trajectory.times(), scenario.config().grid.times());
        for sample in trajectory {
            assert!((sample.state.total() - 100_000.0).abs() <= 1e-3);
        }
        assert!(scenario.summary().unwrap().is_conserved());
    }

    #[test]
    fn test_recovered_monotone_and_infectious_non_negative() {
        let scenario = run(config("baseline", 0.3, 0.1));
        let trajectory = scenario.trajectory().unwrap();
        assert!(trajectory.is_non_decreasing(Compartment::Recovered, 0.0));
        assert!(trajectory.iter().all(|s| s.state.infectious >= 0.0));
        assert!(scenario.summary().unwrap().recovered_monotone);
    }

    #[test]
    fn test_final_size_is_last_recovered() {
        let scenario = run(config("baseline", 0.3, 0.1));
        let trajectory = scenario.trajectory().unwrap();
        let summary = scenario.summary().unwrap();
        let max_r = trajectory
            .column(Compartment::Recovered)
            .into_iter()
            .fold(f64::MIN, f64::max);
        assert_eq!(summary.final_size, trajectory.last().state.recovered);
        assert_eq!(summary.final_size, max_r);
    }

    #[test]
    fn test_r0_is_exact() {
        for (beta, gamma, expected) in [(0.3, 0.1, 3.0), (0.6, 0.1, 6.0), (0.3, 0.05, 6.0)] {
            let scenario = run(config("r0", beta, gamma));
            let r0 = scenario.summary().unwrap().r0(RatePhase::Pre);
            assert_eq!(r0, beta / gamma);
            assert_relative_eq!(r0, expected, max_relative = 1e-15);
        }
    }

    #[test]
    fn test_intervention_timing_monotone() {
        let base = config("base", 0.3, 0.1);
        let mut sizes: Vec<f64> = intervention_timing_sweep(&base, 0.2, &[15.0, 30.0, 45.0])
            .into_iter()
            .map(|config| run(config).summary().unwrap().final_size)
            .collect();
        sizes.push(run(base).summary().unwrap().final_size);
        for pair in sizes.windows(2) {
            assert!(pair[0] <= pair[1], "{sizes:?}");
        }
    }

    #[test]
    fn test_intervention_reproduction_numbers() {
        let config =
            config("base", 0.3, 0.1).with_intervention("late", Intervention::new(30.0, 0.2));
        let scenario = run(config);
        let summary = scenario.summary().unwrap();
        assert_eq!(summary.r0(RatePhase::Pre), 0.3 / 0.1);
        assert_eq!(summary.r0(RatePhase::Post), 0.2 / 0.1);
    }

    #[test]
    fn test_no_infectious_is_constant() {
        let mut config = config("idle", 0.3, 0.1);
        config.initial = InitialConditions::new(0.0, 250.0);
        let scenario = run(config);
        for sample in scenario.trajectory().unwrap() {
            assert_eq!(sample.state, Compartments::new(99_750.0, 0.0, 250.0));
        }
    }

    #[test]
    fn test_higher_r0_peaks_higher_and_earlier() {
        let low = run(config("r0=3", 0.3, 0.1));
        let high = run(config("r0=6", 0.6, 0.1));
        let (low, high) = (low.summary().unwrap(), high.summary().unwrap());
        assert!(high.peak_infected > low.peak_infected);
        assert!(high.peak_time < low.peak_time);
    }

    #[test]
    fn test_matches_analytic_final_size() {
        let mut config = config("long", 0.3, 0.1);
        config.grid = TimeGrid::uniform(0.0, 400.0, 1.0).unwrap();
        let expected = analytic_final_size(3.0, 100_000.0, &config.initial);
        let scenario = run(config);
        assert_relative_eq!(
            scenario.summary().unwrap().final_size,
            expected,
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_rk4_agrees_with_adaptive() {
        let adaptive = run(config("dp", 0.3, 0.1));
        let fixed = run(config("rk4", 0.3, 0.1).with_solver(SolverOptions {
            method: SolverMethod::Rk4 { step: 0.1 },
            ..SolverOptions::default()
        }));
        let (a, b) = (adaptive.summary().unwrap(), fixed.summary().unwrap());
        assert_relative_eq!(a.final_size, b.final_size, max_relative = 1e-4);
        assert_relative_eq!(a.peak_infected, b.peak_infected, max_relative = 1e-4);
        assert!((a.peak_time - b.peak_time).abs() <= 1.0);
    }

    #[test]
    fn test_budget_exhaustion_is_a_failure() {
        let config = config("stiff", 0.3, 1e-9).with_solver(SolverOptions {
            tolerance: Tolerance {
                relative: 1e-10,
                absolute: 1e-10,
            },
            max_steps: 20,
            ..SolverOptions::default()
        });
        let mut scenario = Scenario::new(config).unwrap();
        let err = scenario.run().unwrap_err();
        assert!(matches!(err, SirError::Integration { .. }));
        assert!(scenario.trajectory().is_none());
        assert!(scenario.summary().is_err());

        let failure = scenario.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::StepBudgetExceeded { max_steps: 20 });
        assert!(!failure.partial.is_complete());
        assert!(failure.partial.missing() > 0);
        assert!(failure.partial.samples.iter().all(|s| s.state.total().is_finite()));
        assert!(failure.last_good.1.total().is_finite());
        assert!(failure.query_time <= 21.0);
    }

    #[test]
    fn test_single_use() {
        let mut scenario = run(config("once", 0.3, 0.1));
        assert!(matches!(scenario.run(), Err(SirError::AlreadyRun { .. })));
        assert_eq!(scenario.state().name(), "completed");
    }

    #[test]
    fn test_not_completed() {
        let scenario = Scenario::new(config("fresh", 0.3, 0.1)).unwrap();
        assert_eq!(scenario.state().name(), "configured");
        assert!(scenario.trajectory().is_none());
        assert!(matches!(scenario.summary(), Err(SirError::NotCompleted { .. })));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut bad = config("bad", 0.3, 0.1);
        bad.initial = InitialConditions::new(100_001.0, 0.0);
        assert!(matches!(
            Scenario::new(bad),
            Err(SirError::InvalidParameter { .. })
        ));
        assert!(Scenario::new(config("bad", 0.0, 0.1)).is_err());
        assert!(Scenario::new(config("bad", 0.3, -0.1)).is_err());
        assert!(Scenario::new(config("", 0.3, 0.1)).is_err());
    }

    #[test]
    fn test_run_all_isolates_failures() {
        let failing = config("stiff", 0.3, 1e-9).with_solver(SolverOptions {
            max_steps: 5,
            ..SolverOptions::default()
        });
        let scenarios = build_all(vec![
            config("baseline", 0.3, 0.1),
            failing,
            config("high", 0.6, 0.1),
        ])
        .unwrap();
        let scenarios = run_all(scenarios);
        let labels: Vec<&str> = scenarios.iter().map(Scenario::label).collect();
        assert_eq!(labels, vec!["baseline", "stiff", "high"]);
        assert!(scenarios[0].trajectory().is_some());
        assert!(scenarios[1].failure().is_some());
        assert!(scenarios[2].trajectory().is_some());

        let alone = run(config("baseline", 0.3, 0.1));
        assert_eq!(scenarios[0].trajectory(), alone.trajectory());
    }

    #[test]
    fn test_run_all_more_scenarios_than_threads() {
        let workers = std::thread::available_parallelism().map_or(1, usize::from);
        let base = config("base", 0.3, 0.1);
        let configs: Vec<ScenarioConfig> = (0..2 * workers + 1)
            .map(|k| base.with_beta(format!("beta-{k}"), 0.2 + 0.01 * k as f64))
            .collect();
        let scenarios = run_all(build_all(configs).unwrap());
        assert_eq!(scenarios.len(), 2 * workers + 1);
        for (k, scenario) in scenarios.iter().enumerate() {
            assert_eq!(scenario.label(), format!("beta-{k}"));
            assert_eq!(scenario.state().name(), "completed");
        }
    }

    #[test]
    fn test_fingerprint() {
        let a = config("a", 0.3, 0.1);
        let b = config("b", 0.3, 0.1);
        let c = config("a", 0.31, 0.1);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn test_config_from_json() {
        let config: ScenarioConfig = serde_json::from_value(serde_json::json!({
            "label": "lockdown",
            "parameters": {
                "population": 1000,
                "transmission": {
                    "kind": "step_at_time",
                    "before": 0.3,
                    "after": 0.1,
                    "switch_time": 20
                },
                "gamma": 0.1
            },
            "initial": {"infectious": 5},
            "grid": [0, 10, 20, 30],
            "solver": {"max_steps": 500}
        }))
        .unwrap();
        assert_eq!(config.initial.recovered, 0.0);
        assert_eq!(config.solver.max_steps, 500);
        assert_eq!(config.solver.tolerance, Tolerance::default());
        assert_eq!(config.grid.len(), 4);
        assert!(Scenario::new(config).is_ok());
    }
}
