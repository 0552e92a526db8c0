use cfa_sir::{ComparisonTable, RatePhase, Scenario};
use serde::Serialize;

pub const TRAJECTORY_HEADERS: [&str; 5] =
    ["label", "time", "susceptible", "infectious", "recovered"];

pub const SUMMARY_HEADERS: [&str; 11] = [
    "label",
    "status",
    "r0_pre",
    "r0_post",
    "final_size",
    "attack_rate",
    "peak_infected",
    "peak_time",
    "herd_immunity_threshold",
    "conservation_warnings",
    "failure",
];

/// One row per sample of every completed scenario.
pub fn trajectory_rows(scenarios: &[Scenario]) -> Vec<Vec<String>> {
    scenarios
        .iter()
        .filter_map(|scenario| scenario.trajectory().map(|t| (scenario.label(), t)))
        .flat_map(|(label, trajectory)| {
            trajectory.iter().map(move |sample| {
                vec![
                    label.to_string(),
                    sample.time.to_string(),
                    sample.state.susceptible.to_string(),
                    sample.state.infectious.to_string(),
                    sample.state.recovered.to_string(),
                ]
            })
        })
        .collect()
}

/// One row per scenario; failed scenarios keep their label and reason.
pub fn summary_rows(scenarios: &[Scenario]) -> Vec<Vec<String>> {
    scenarios
        .iter()
        .map(|scenario| {
            let mut row = vec![
                scenario.label().to_string(),
                scenario.state().name().to_string(),
            ];
            match scenario.summary() {
                Ok(summary) => {
                    row.extend([
                        summary.r0(RatePhase::Pre).to_string(),
                        summary
                            .reproduction_numbers
                            .post_intervention
                            .map(|r| r.to_string())
                            .unwrap_or_default(),
                        summary.final_size.to_string(),
                        summary.attack_rate.to_string(),
                        summary.peak_infected.to_string(),
                        summary.peak_time.to_string(),
                        summary.herd_immunity_threshold.to_string(),
                        summary.conservation_warnings.len().to_string(),
                        String::new(),
                    ]);
                }
                Err(_) => {
                    row.extend(std::iter::repeat_n(String::new(), 8));
                    row.push(
                        scenario
                            .failure()
                            .map(|f| f.to_string())
                            .unwrap_or_default(),
                    );
                }
            }
            row
        })
        .collect()
}

/// Wide table: `time` followed by one column per scenario.
pub fn comparison_rows(table: &ComparisonTable) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = std::iter::once("time".to_string())
        .chain(table.labels().iter().cloned())
        .collect();
    let rows = table
        .rows()
        .map(|(time, values)| {
            std::iter::once(time.to_string())
                .chain(values.iter().map(|v| v.to_string()))
                .collect()
        })
        .collect();
    (headers, rows)
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub input_digest: String,
    pub scenarios: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    pub label: String,
    pub fingerprint: String,
    pub status: String,
    pub failure: Option<String>,
}

impl Manifest {
    pub fn new(input_digest: String, scenarios: &[Scenario]) -> cfa_sir::Result<Self> {
        let scenarios = scenarios
            .iter()
            .map(|scenario| -> cfa_sir::Result<ManifestEntry> {
                Ok(ManifestEntry {
                    label: scenario.label().to_string(),
                    fingerprint: scenario.config().fingerprint()?,
                    status: scenario.state().name().to_string(),
                    failure: scenario.failure().map(|f| f.to_string()),
                })
            })
            .collect::<cfa_sir::Result<Vec<_>>>()?;
        Ok(Self {
            input_digest,
            scenarios,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cfa_sir::{
        Compartment, InitialConditions, ParameterSet, ScenarioConfig, SolverOptions, TimeGrid,
        build_all, compare_scenarios, run_all,
    };

    fn scenarios() -> Vec<Scenario> {
        let grid = TimeGrid::uniform(0.0, 10.0, 1.0).unwrap();
        let ok = ScenarioConfig::new(
            "ok",
            ParameterSet::constant(1000.0, 0.3, 0.1),
            InitialConditions::new(1.0, 0.0),
            grid,
        );
        let capped = ok.with_beta("capped", 0.4).with_solver(SolverOptions {
            max_steps: 2,
            ..SolverOptions::default()
        });
        run_all(build_all(vec![ok, capped]).unwrap())
    }

    #[test]
    fn test_trajectory_rows_skip_failures() {
        let rows = trajectory_rows(&scenarios());
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[0], vec!["ok", "0", "999", "1", "0"]);
        assert!(rows.iter().all(|row| row.len() == TRAJECTORY_HEADERS.len()));
    }

    #[test]
    fn test_summary_rows() {
        let rows = summary_rows(&scenarios());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.len() == SUMMARY_HEADERS.len()));
        assert_eq!(rows[0][1], "completed");
        assert_eq!(rows[0][3], "");
        assert_eq!(rows[1][1], "failed");
        assert!(rows[1][10].contains("step budget of 2 exhausted"));
    }

    #[test]
    fn test_comparison_rows() {
        let scenarios = scenarios();
        let table = compare_scenarios(&scenarios, Compartment::Infectious).unwrap();
        let (headers, rows) = comparison_rows(&table);
        assert_eq!(headers, vec!["time", "ok"]);
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[0], vec!["0", "1"]);
    }

    #[test]
    fn test_manifest() {
        let manifest = Manifest::new("abc".to_string(), &scenarios()).unwrap();
        assert_eq!(manifest.scenarios.len(), 2);
        assert_eq!(manifest.scenarios[1].status, "failed");
        assert!(manifest.scenarios[1].failure.is_some());
        assert_ne!(
            manifest.scenarios[0].fingerprint,
            manifest.scenarios[1].fingerprint
        );
    }
}
