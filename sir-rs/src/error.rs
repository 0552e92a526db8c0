use std::fmt;

use thiserror::Error;

use crate::compartments::Compartments;
use crate::trajectory::Sample;

pub type Result<T> = std::result::Result<T, SirError>;

#[derive(Debug, Error)]
pub enum SirError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("scenario `{label}` failed: {failure}")]
    Integration {
        label: String,
        failure: Box<IntegrationFailure>,
    },

    #[error("trajectory `{label}` is not sampled on the same time grid as `{reference}`")]
    GridMismatch { label: String, reference: String },

    #[error("scenario `{label}` has already been run")]
    AlreadyRun { label: String },

    #[error("scenario `{label}` has not completed")]
    NotCompleted { label: String },

    #[error("failed to serialize scenario: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SirError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SirError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Why the integrator gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// More than `max_steps` attempted steps (accepted or rejected).
    StepBudgetExceeded { max_steps: usize },
    /// The controller asked for a step smaller than `min_step`.
    StepSizeUnderflow,
    /// A derivative or state component became NaN or infinite.
    NonFinite,
    /// A compartment went negative beyond the solver tolerance.
    NonPhysical,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepBudgetExceeded { max_steps } => {
                write!(f, "step budget of {max_steps} exhausted")
            }
            FailureReason::StepSizeUnderflow => write!(f, "step size underflow"),
            FailureReason::NonFinite => write!(f, "non-finite state"),
            FailureReason::NonPhysical => write!(f, "negative compartment value"),
        }
    }
}

/// Samples that were produced before an integration failure.
///
/// Never usable as a `Trajectory`: it covers only a prefix of the requested
/// grid and is kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialTrajectory {
    pub samples: Vec<Sample>,
    pub requested: usize,
}

impl PartialTrajectory {
    pub fn is_complete(&self) -> bool {
        false
    }

    pub fn missing(&self) -> usize {
        self.requested - self.samples.len()
    }
}

/// Diagnostic record of a failed integration.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationFailure {
    pub reason: FailureReason,
    /// First query time that could not be produced.
    pub query_time: f64,
    /// Solver time at which the failure was detected.
    pub solver_time: f64,
    /// Last accepted solver state.
    pub last_good: (f64, Compartments),
    pub partial: PartialTrajectory,
}

impl fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at t={} while integrating towards t={} ({} of {} samples produced)",
            self.reason,
            self.solver_time,
            self.query_time,
            self.partial.samples.len(),
            self.partial.requested
        )
    }
}
