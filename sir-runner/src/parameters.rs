use std::collections::HashSet;

use cfa_sir::{
    Compartment, InitialConditions, Intervention, ParameterSet, RateSchedule, ScenarioConfig,
    SirError, SolverOptions, TimeGrid, intervention_timing_sweep,
};
use serde::Deserialize;

/// The input section of a run: shared defaults plus the scenarios that
/// override them.
#[derive(Debug, Clone, Deserialize)]
pub struct RunInput {
    pub population: f64,
    pub initial_infectious: f64,
    #[serde(default)]
    pub initial_recovered: f64,
    pub beta: f64,
    pub gamma: f64,
    pub time: TimeInput,
    #[serde(default)]
    pub solver: SolverOptions,
    #[serde(default)]
    pub scenarios: Vec<ScenarioInput>,
    pub intervention_sweep: Option<SweepInput>,
    #[serde(default = "default_compare")]
    pub compare: Vec<Compartment>,
}

fn default_compare() -> Vec<Compartment> {
    vec![Compartment::Infectious]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeInput {
    Points {
        times: Vec<f64>,
    },
    Uniform {
        #[serde(default)]
        start: f64,
        end: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
}

fn default_step() -> f64 {
    1.0
}

impl TimeInput {
    pub fn grid(&self) -> cfa_sir::Result<TimeGrid> {
        match self {
            TimeInput::Points { times } => TimeGrid::from_times(times.clone()),
            TimeInput::Uniform { start, end, step } => TimeGrid::uniform(*start, *end, *step),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioInput {
    pub label: String,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub initial_infectious: Option<f64>,
    pub initial_recovered: Option<f64>,
    pub intervention: Option<Intervention>,
    pub schedule: Option<RateSchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepInput {
    pub beta: f64,
    pub times: Vec<f64>,
}

impl RunInput {
    fn baseline(&self) -> cfa_sir::Result<ScenarioConfig> {
        Ok(ScenarioConfig::new(
            "baseline",
            ParameterSet::constant(self.population, self.beta, self.gamma),
            InitialConditions::new(self.initial_infectious, self.initial_recovered),
            self.time.grid()?,
        )
        .with_solver(self.solver))
    }

    fn scenario(
        &self,
        base: &ScenarioConfig,
        input: &ScenarioInput,
    ) -> cfa_sir::Result<ScenarioConfig> {
        let conflict = |other: &str| SirError::InvalidParameter {
            name: "schedule",
            reason: format!(
                "scenario `{}` sets both `schedule` and `{other}`",
                input.label
            ),
        };
        if input.schedule.is_some() && input.beta.is_some() {
            return Err(conflict("beta"));
        }
        let beta = input.beta.unwrap_or(self.beta);
        let transmission = match (&input.schedule, &input.intervention) {
            (Some(_), Some(_)) => return Err(conflict("intervention")),
            (Some(schedule), None) => schedule.clone(),
            (None, Some(intervention)) => intervention.schedule(beta),
            (None, None) => RateSchedule::constant(beta),
        };
        let mut config = base.with_schedule(input.label.clone(), transmission);
        if let Some(gamma) = input.gamma {
            config.parameters.gamma = gamma;
        }
        if let Some(infectious) = input.initial_infectious {
            config.initial.infectious = infectious;
        }
        if let Some(recovered) = input.initial_recovered {
            config.initial.recovered = recovered;
        }
        Ok(config)
    }

    /// Expands the input into one configuration per scenario: the listed
    /// scenarios (or a single `baseline` when none are listed) followed by
    /// the intervention sweep.
    pub fn scenario_configs(&self) -> cfa_sir::Result<Vec<ScenarioConfig>> {
        let base = self.baseline()?;
        let mut configs = if self.scenarios.is_empty() {
            vec![base.clone()]
        } else {
            self.scenarios
                .iter()
                .map(|input| self.scenario(&base, input))
                .collect::<cfa_sir::Result<Vec<_>>>()?
        };
        if let Some(sweep) = &self.intervention_sweep {
            configs.extend(intervention_timing_sweep(&base, sweep.beta, &sweep.times));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = configs.iter().find(|c| !seen.insert(c.label.as_str())) {
            return Err(SirError::InvalidParameter {
                name: "label",
                reason: format!("scenario label `{}` is used more than once", duplicate.label),
            });
        }
        Ok(configs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn input(extra: serde_json::Value) -> RunInput {
        let mut value = json!({
            "population": 100000,
            "initial_infectious": 1,
            "beta": 0.3,
            "gamma": 0.1,
            "time": {"end": 160}
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_baseline() {
        let configs = input(json!({})).scenario_configs().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].label, "baseline");
        assert_eq!(configs[0].grid.len(), 161);
        assert_eq!(configs[0].parameters.transmission, RateSchedule::constant(0.3));
        assert_eq!(configs[0].initial.recovered, 0.0);
    }

    #[test]
    fn test_scenario_overrides() {
        let configs = input(json!({
            "scenarios": [
                {"label": "baseline"},
                {"label": "high", "beta": 0.6},
                {"label": "lockdown", "intervention": {"time": 20, "beta": 0.2}},
                {"label": "slow", "gamma": 0.05, "initial_infectious": 10}
            ]
        }))
        .scenario_configs()
        .unwrap();
        assert_eq!(configs.len(), 4);
        assert_eq!(configs[1].parameters.beta_at(0.0), 0.6);
        assert_eq!(
            configs[2].parameters.transmission,
            Intervention::new(20.0, 0.2).schedule(0.3)
        );
        assert_eq!(configs[3].parameters.gamma, 0.05);
        assert_eq!(configs[3].initial.infectious, 10.0);
    }

    #[test]
    fn test_sweep_and_explicit_times() {
        let configs = input(json!({
            "time": {"times": [0, 5, 10, 40]},
            "intervention_sweep": {"beta": 0.2, "times": [15, 30]}
        }))
        .scenario_configs()
        .unwrap();
        let labels: Vec<&str> = configs.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["baseline", "baseline-intervention-t15", "baseline-intervention-t30"]
        );
        assert_eq!(configs[2].grid.times(), &[0.0, 5.0, 10.0, 40.0]);
    }

    #[test]
    fn test_rejects_ambiguous_and_duplicate_scenarios() {
        let both = input(json!({
            "scenarios": [{
                "label": "both",
                "intervention": {"time": 20, "beta": 0.2},
                "schedule": {"kind": "constant", "beta": 0.1}
            }]
        }));
        assert!(both.scenario_configs().is_err());

        let schedule_and_beta = input(json!({
            "scenarios": [{
                "label": "ramp",
                "beta": 0.4,
                "schedule": {"kind": "piecewise_linear", "knots": [[0, 0.3], [30, 0.1]]}
            }]
        }));
        let err = schedule_and_beta.scenario_configs().unwrap_err();
        assert!(err.to_string().contains("`schedule` and `beta`"), "{err}");

        let schedule_only = input(json!({
            "scenarios": [{
                "label": "ramp",
                "schedule": {"kind": "piecewise_linear", "knots": [[0, 0.3], [30, 0.1]]}
            }]
        }));
        let configs = schedule_only.scenario_configs().unwrap();
        assert_eq!(configs[0].parameters.beta_at(30.0), 0.1);

        let duplicate = input(json!({
            "scenarios": [{"label": "a"}, {"label": "a", "beta": 0.4}]
        }));
        assert!(duplicate.scenario_configs().is_err());
    }

    #[test]
    fn test_compare_default() {
        assert_eq!(input(json!({})).compare, vec![Compartment::Infectious]);
        let input = input(json!({"compare": ["susceptible", "recovered"]}));
        assert_eq!(
            input.compare,
            vec![Compartment::Susceptible, Compartment::Recovered]
        );
    }
}
