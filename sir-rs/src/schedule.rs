use serde::{Deserialize, Serialize};

use crate::error::{Result, SirError};

/// A closed set of β(t) shapes. Kept as plain data so a schedule can be
/// serialized, compared and shared between threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateSchedule {
    Constant {
        beta: f64,
    },
    /// `before` for `t < switch_time`, `after` from `switch_time` on.
    StepAtTime {
        before: f64,
        after: f64,
        switch_time: f64,
    },
    /// Linear interpolation between `(time, beta)` knots, held constant
    /// outside the knot range.
    PiecewiseLinear {
        knots: Vec<(f64, f64)>,
    },
}

impl RateSchedule {
    pub fn constant(beta: f64) -> Self {
        RateSchedule::Constant { beta }
    }

    pub fn rate_at(&self, t: f64) -> f64 {
        match self {
            RateSchedule::Constant { beta } => *beta,
            RateSchedule::StepAtTime {
                before,
                after,
                switch_time,
            } => {
                if t < *switch_time {
                    *before
                } else {
                    *after
                }
            }
            RateSchedule::PiecewiseLinear { knots } => {
                let idx = knots.partition_point(|(time, _)| *time <= t);
                if idx == 0 {
                    knots[0].1
                } else if idx == knots.len() {
                    knots[idx - 1].1
                } else {
                    let (t0, b0) = knots[idx - 1];
                    let (t1, b1) = knots[idx];
                    b0 + (b1 - b0) * (t - t0) / (t1 - t0)
                }
            }
        }
    }

    /// Limit of β(s) as s approaches `t` from below. Equal to `rate_at`
    /// everywhere except exactly at a step switch.
    pub fn rate_before(&self, t: f64) -> f64 {
        match self {
            RateSchedule::StepAtTime {
                before,
                after,
                switch_time,
            } => {
                if t <= *switch_time {
                    *before
                } else {
                    *after
                }
            }
            _ => self.rate_at(t),
        }
    }

    /// Times at which β(t) is not smooth. The integrator ends a step on each
    /// of them.
    pub fn breakpoints(&self) -> Vec<f64> {
        match self {
            RateSchedule::Constant { .. } => Vec::new(),
            RateSchedule::StepAtTime { switch_time, .. } => vec![*switch_time],
            RateSchedule::PiecewiseLinear { knots } => knots.iter().map(|(t, _)| *t).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            RateSchedule::Constant { beta } => check_rate("beta", *beta),
            RateSchedule::StepAtTime {
                before,
                after,
                switch_time,
            } => {
                check_rate("beta", *before)?;
                check_rate("intervention.beta", *after)?;
                if !switch_time.is_finite() || *switch_time < 0.0 {
                    return Err(SirError::invalid(
                        "intervention.time",
                        format!("must be a finite non-negative time, got {switch_time}"),
                    ));
                }
                Ok(())
            }
            RateSchedule::PiecewiseLinear { knots } => {
                if knots.is_empty() {
                    return Err(SirError::invalid("schedule.knots", "must not be empty"));
                }
                for (t, beta) in knots {
                    if !t.is_finite() {
                        return Err(SirError::invalid(
                            "schedule.knots",
                            format!("knot time {t} is not finite"),
                        ));
                    }
                    check_rate("schedule.knots", *beta)?;
                }
                if knots.windows(2).any(|w| w[1].0 <= w[0].0) {
                    return Err(SirError::invalid(
                        "schedule.knots",
                        "knot times must be strictly increasing",
                    ));
                }
                Ok(())
            }
        }
    }
}

pub(crate) fn check_rate(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SirError::invalid(
            name,
            format!("must be a finite positive rate, got {value}"),
        ))
    }
}

/// A single scripted reduction of β at a fixed time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub time: f64,
    pub beta: f64,
}

impl Intervention {
    pub fn new(time: f64, beta: f64) -> Self {
        Self { time, beta }
    }

    pub fn schedule(&self, base_beta: f64) -> RateSchedule {
        RateSchedule::StepAtTime {
            before: base_beta,
            after: self.beta,
            switch_time: self.time,
        }
    }
}
