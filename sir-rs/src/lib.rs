//! Deterministic SIR compartmental model with scheduled interventions.

pub mod compare;
pub mod compartments;
pub mod error;
pub mod grid;
pub mod integrator;
pub mod model;
pub mod parameters;
pub mod scenario;
pub mod schedule;
pub mod summary;
pub mod trajectory;

pub use compare::{ComparisonTable, compare, compare_scenarios};
pub use compartments::{Compartment, Compartments};
pub use error::{FailureReason, IntegrationFailure, PartialTrajectory, Result, SirError};
pub use grid::TimeGrid;
pub use integrator::{SolverMethod, SolverOptions, Tolerance};
pub use parameters::{InitialConditions, ParameterSet};
pub use scenario::{
    Scenario, ScenarioConfig, ScenarioState, build_all, intervention_timing_sweep, run_all,
};
pub use schedule::{Intervention, RateSchedule};
pub use summary::{EpidemicSummary, RatePhase, ReproductionNumbers};
pub use trajectory::{Sample, Trajectory};
