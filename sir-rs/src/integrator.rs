//! Initial-value-problem integrators: adaptive Dormand-Prince 5(4) and
//! fixed-step RK4. Steps always end on query times and breakpoints.

use log::trace;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{FailureReason, Result, SirError};

pub type State = Vector3<f64>;

pub trait OdeSystem {
    fn derivative(&self, t: f64, y: &State) -> State;

    /// Limit of the derivative as time approaches `t` from below. Differs
    /// from [`OdeSystem::derivative`] only at a jump of the right-hand side;
    /// used for every stage of a step except its first so that a step ending
    /// on a breakpoint sees the rule that held during the step.
    fn derivative_left(&self, t: f64, y: &State) -> State {
        self.derivative(t, y)
    }

    /// Times where the right-hand side is not smooth.
    fn breakpoints(&self) -> Vec<f64> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub relative: f64,
    pub absolute: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            relative: 1e-6,
            absolute: 1e-6,
        }
    }
}

impl Tolerance {
    /// Error weight for a component of magnitude `scale`.
    pub fn weight(&self, scale: f64) -> f64 {
        self.absolute + self.relative * scale.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    DormandPrince45,
    Rk4 { step: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub method: SolverMethod,
    pub tolerance: Tolerance,
    pub max_steps: usize,
    pub min_step: f64,
    pub initial_step: Option<f64>,
    pub max_step: Option<f64>,
    /// Fail when a component drops below `-tolerance.weight(max |y|)`.
    pub non_negative: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            method: SolverMethod::DormandPrince45,
            tolerance: Tolerance::default(),
            max_steps: 100_000,
            min_step: 1e-10,
            initial_step: None,
            max_step: None,
            non_negative: true,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.tolerance.relative) || !positive(self.tolerance.absolute) {
            return Err(SirError::invalid(
                "solver.tolerance",
                format!(
                    "tolerances must be finite and positive, got relative={} absolute={}",
                    self.tolerance.relative, self.tolerance.absolute
                ),
            ));
        }
        if self.max_steps == 0 {
            return Err(SirError::invalid("solver.max_steps", "must be at least 1"));
        }
        if !positive(self.min_step) {
            return Err(SirError::invalid(
                "solver.min_step",
                format!("must be finite and positive, got {}", self.min_step),
            ));
        }
        for (name, value) in [
            ("solver.initial_step", self.initial_step),
            ("solver.max_step", self.max_step),
        ] {
            if let Some(value) = value
                && !positive(value)
            {
                return Err(SirError::invalid(
                    name,
                    format!("must be finite and positive, got {value}"),
                ));
            }
        }
        if let SolverMethod::Rk4 { step } = self.method
            && !positive(step)
        {
            return Err(SirError::invalid(
                "solver.step",
                format!("must be finite and positive, got {step}"),
            ));
        }
        Ok(())
    }

    pub fn integrator(&self) -> Box<dyn Integrator + Send + Sync> {
        match self.method {
            SolverMethod::DormandPrince45 => Box::new(DormandPrince45::new(*self)),
            SolverMethod::Rk4 { step } => Box::new(Rk4::new(step, *self)),
        }
    }
}

/// Partial result of an integration that could not reach every query time.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverFailure {
    pub reason: FailureReason,
    /// Index into the query times of the first output that was not produced.
    pub query_index: usize,
    pub solver_time: f64,
    pub last_time: f64,
    pub last_state: State,
    /// States at `times[..query_index]`.
    pub outputs: Vec<State>,
}

pub trait Integrator {
    /// Integrates from `times[0]`, where the state is `y0`, and returns one
    /// state per entry of `times`.
    fn integrate(
        &self,
        system: &dyn OdeSystem,
        y0: State,
        times: &[f64],
    ) -> std::result::Result<Vec<State>, SolverFailure>;
}

/// Bookkeeping shared by both methods: the accepted state, the outputs
/// produced so far, the step budget and the breakpoint cursor.
struct Sweep<'a> {
    t: f64,
    y: State,
    outputs: Vec<State>,
    steps: usize,
    options: &'a SolverOptions,
    breakpoints: Vec<f64>,
    next_breakpoint: usize,
}

impl<'a> Sweep<'a> {
    fn new(system: &dyn OdeSystem, y0: State, times: &[f64], options: &'a SolverOptions) -> Self {
        let mut breakpoints = system.breakpoints();
        breakpoints.retain(|b| b.is_finite());
        breakpoints.sort_by(f64::total_cmp);
        breakpoints.dedup();
        let mut outputs = Vec::with_capacity(times.len());
        outputs.push(y0);
        Self {
            t: times[0],
            y: y0,
            outputs,
            steps: 0,
            options,
            breakpoints,
            next_breakpoint: 0,
        }
    }

    /// End of the next step: the query time or an earlier breakpoint.
    fn target(&mut self, query: f64) -> f64 {
        while self.next_breakpoint < self.breakpoints.len()
            && self.breakpoints[self.next_breakpoint] <= self.t
        {
            self.next_breakpoint += 1;
        }
        match self.breakpoints.get(self.next_breakpoint) {
            Some(b) if *b < query => *b,
            _ => query,
        }
    }

    fn is_breakpoint(&self, t: f64) -> bool {
        self.breakpoints
            .binary_search_by(|b| b.total_cmp(&t))
            .is_ok()
    }

    fn count_step(&mut self) -> std::result::Result<(), FailureReason> {
        self.steps += 1;
        if self.steps > self.options.max_steps {
            return Err(FailureReason::StepBudgetExceeded {
                max_steps: self.options.max_steps,
            });
        }
        Ok(())
    }

    fn check_state(&self, y: &State) -> std::result::Result<(), FailureReason> {
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FailureReason::NonFinite);
        }
        if self.options.non_negative {
            let floor = -self.options.tolerance.weight(y.amax());
            if y.iter().any(|v| *v < floor) {
                return Err(FailureReason::NonPhysical);
            }
        }
        Ok(())
    }

    fn fail(self, reason: FailureReason, query_index: usize, solver_time: f64) -> SolverFailure {
        SolverFailure {
            reason,
            query_index,
            solver_time,
            last_time: self.t,
            last_state: self.y,
            outputs: self.outputs,
        }
    }
}

/// Snaps a step onto `target` when it would otherwise leave a sliver.
fn clip_step(h: f64, t: f64, target: f64) -> f64 {
    let remaining = target - t;
    if h >= remaining || remaining - h <= 1e-12 * target.abs().max(1.0) {
        remaining
    } else {
        h
    }
}

// Dormand-Prince 5(4) tableau.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const A71: f64 = 35.0 / 384.0;
const A73: f64 = 500.0 / 1113.0;
const A74: f64 = 125.0 / 192.0;
const A75: f64 = -2187.0 / 6784.0;
const A76: f64 = 11.0 / 84.0;

// Fifth-order weights minus embedded fourth-order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct DormandPrince45 {
    options: SolverOptions,
}

impl DormandPrince45 {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    fn error_norm(&self, y: &State, y_new: &State, err: &State) -> f64 {
        let sum: f64 = (0..3)
            .map(|i| {
                let weight = self.options.tolerance.weight(y[i].abs().max(y_new[i].abs()));
                (err[i] / weight).powi(2)
            })
            .sum();
        (sum / 3.0).sqrt()
    }

    /// Starting step from the size of the state relative to its derivative.
    fn initial_step(&self, y: &State, f: &State, span: f64) -> f64 {
        if let Some(h) = self.options.initial_step {
            return h.min(span);
        }
        let weights = y.map(|v| self.options.tolerance.weight(v));
        let d0 = y.component_div(&weights).norm() / 3f64.sqrt();
        let d1 = f.component_div(&weights).norm() / 3f64.sqrt();
        let h = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        h.min(span)
    }
}

impl Integrator for DormandPrince45 {
    fn integrate(
        &self,
        system: &dyn OdeSystem,
        y0: State,
        times: &[f64],
    ) -> std::result::Result<Vec<State>, SolverFailure> {
        let mut sweep = Sweep::new(system, y0, times, &self.options);
        if times.len() == 1 {
            return Ok(sweep.outputs);
        }
        let span = times[times.len() - 1] - times[0];
        let max_step = self.options.max_step.unwrap_or(span);

        let mut k1 = system.derivative(sweep.t, &sweep.y);
        if k1.iter().any(|v| !v.is_finite()) {
            return Err(sweep.fail(FailureReason::NonFinite, 1, times[0]));
        }
        let mut h = self.initial_step(&sweep.y, &k1, span).min(max_step);

        for (index, &query) in times.iter().enumerate().skip(1) {
            while sweep.t < query {
                let target = sweep.target(query);
                let step = clip_step(h, sweep.t, target);
                if let Err(reason) = sweep.count_step() {
                    let t = sweep.t;
                    return Err(sweep.fail(reason, index, t));
                }

                let (t, y) = (sweep.t, sweep.y);
                let t_new = if step == target - t { target } else { t + step };
                let rhs = |c: f64, y: State| system.derivative_left(t + c * step, &y);
                let k2 = rhs(C2, y + step * (A21 * k1));
                let k3 = rhs(C3, y + step * (A31 * k1 + A32 * k2));
                let k4 = rhs(C4, y + step * (A41 * k1 + A42 * k2 + A43 * k3));
                let k5 = rhs(C5, y + step * (A51 * k1 + A52 * k2 + A53 * k3 + A54 * k4));
                let k6 = system.derivative_left(
                    t_new,
                    &(y + step * (A61 * k1 + A62 * k2 + A63 * k3 + A64 * k4 + A65 * k5)),
                );
                let y_new = y + step * (A71 * k1 + A73 * k3 + A74 * k4 + A75 * k5 + A76 * k6);
                let k7 = system.derivative_left(t_new, &y_new);
                let err = step * (E1 * k1 + E3 * k3 + E4 * k4 + E5 * k5 + E6 * k6 + E7 * k7);
                let norm = self.error_norm(&y, &y_new, &err);

                if norm.is_finite() && norm <= 1.0 {
                    if let Err(reason) = sweep.check_state(&y_new) {
                        return Err(sweep.fail(reason, index, t_new));
                    }
                    sweep.t = t_new;
                    sweep.y = y_new;
                    k1 = if sweep.is_breakpoint(t_new) {
                        system.derivative(t_new, &y_new)
                    } else {
                        k7
                    };
                    let factor = if norm == 0.0 {
                        MAX_FACTOR
                    } else {
                        (SAFETY * norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                    };
                    h = (step * factor).min(max_step);
                } else {
                    let factor = if norm.is_finite() {
                        (SAFETY * norm.powf(-0.2)).clamp(MIN_FACTOR, 1.0)
                    } else {
                        MIN_FACTOR
                    };
                    h = step * factor;
                    trace!("rejected step of {step} at t={t} (error norm {norm})");
                    if h < self.options.min_step {
                        return Err(sweep.fail(FailureReason::StepSizeUnderflow, index, t));
                    }
                }
            }
            sweep.outputs.push(sweep.y);
        }
        Ok(sweep.outputs)
    }
}

/// Classical fourth-order Runge-Kutta with a fixed step, shortened where
/// needed to land on query times and breakpoints.
#[derive(Debug, Clone, Copy)]
pub struct Rk4 {
    step: f64,
    options: SolverOptions,
}

impl Rk4 {
    pub fn new(step: f64, options: SolverOptions) -> Self {
        Self { step, options }
    }
}

impl Integrator for Rk4 {
    fn integrate(
        &self,
        system: &dyn OdeSystem,
        y0: State,
        times: &[f64],
    ) -> std::result::Result<Vec<State>, SolverFailure> {
        let mut sweep = Sweep::new(system, y0, times, &self.options);
        for (index, &query) in times.iter().enumerate().skip(1) {
            while sweep.t < query {
                let target = sweep.target(query);
                let h = clip_step(self.step, sweep.t, target);
                if let Err(reason) = sweep.count_step() {
                    let t = sweep.t;
                    return Err(sweep.fail(reason, index, t));
                }
                let (t, y) = (sweep.t, sweep.y);
                let t_new = if h == target - t { target } else { t + h };
                let k1 = system.derivative(t, &y);
                let k2 = system.derivative_left(t + 0.5 * h, &(y + 0.5 * h * k1));
                let k3 = system.derivative_left(t + 0.5 * h, &(y + 0.5 * h * k2));
                let k4 = system.derivative_left(t_new, &(y + h * k3));
                let y_new = y + h / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4);
                if let Err(reason) = sweep.check_state(&y_new) {
                    return Err(sweep.fail(reason, index, t_new));
                }
                sweep.t = t_new;
                sweep.y = y_new;
            }
            sweep.outputs.push(sweep.y);
        }
        Ok(sweep.outputs)
    }
}
