pub mod environment;
pub mod logging;
pub mod output;
pub mod parameters;

use std::path::PathBuf;

use anyhow::Context;
use cfa_sir::{build_all, compare_scenarios, run_all};
use clap::Parser;
use log::{LevelFilter, info, warn};

use environment::Environment;
use output::{
    Manifest, SUMMARY_HEADERS, TRAJECTORY_HEADERS, comparison_rows, summary_rows, trajectory_rows,
};
use parameters::RunInput;

/// Runs a set of SIR scenarios and writes their trajectories, summaries and
/// side-by-side comparisons.
#[derive(Parser, Debug)]
#[command(name = "sir-runner", version)]
struct Args {
    /// Scenario set as a TOML or JSON file. Without it, the run envelope is
    /// read from stdin.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for output files. Overrides the envelope's output section.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug or trace.
    #[arg(short, long, default_value = "warn")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_level)?;

    let env = match &args.config {
        Some(path) => Environment::from_config_file(path)?,
        None => Environment::from_stdin()?,
    };
    let mut env = env
        .with_input_type::<RunInput>()
        .context("failed to parse the scenario input")?;
    if let Some(dir) = args.output_dir {
        env.set_output_dir(dir);
    }
    let input = env
        .input
        .as_ref()
        .context("scenario input is missing")?;

    let configs = input.scenario_configs()?;
    info!("running {} scenarios", configs.len());
    let scenarios = run_all(build_all(configs)?);

    let failed = scenarios.iter().filter(|s| s.failure().is_some()).count();
    if failed > 0 {
        warn!("{failed} of {} scenarios failed", scenarios.len());
    }

    env.write_csv(
        "trajectories.csv",
        &TRAJECTORY_HEADERS,
        &trajectory_rows(&scenarios),
    )?;

    // stdout carries a single table
    if env.output_dir().is_none() {
        warn!("no output directory: summary, comparison and manifest files were not written");
        return Ok(());
    }

    env.write_csv("summary.csv", &SUMMARY_HEADERS, &summary_rows(&scenarios))?;
    for compartment in &input.compare {
        let table = compare_scenarios(&scenarios, *compartment)?;
        let (headers, rows) = comparison_rows(&table);
        env.write_csv(&format!("comparison_{compartment}.csv"), &headers, &rows)?;
    }
    let manifest = Manifest::new(env.input_digest(), &scenarios)?;
    env.write("manifest.json", &serde_json::to_vec_pretty(&manifest)?)?;
    info!("wrote outputs for {} scenarios", scenarios.len());
    Ok(())
}
