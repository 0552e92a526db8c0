use serde::{Deserialize, Serialize};

use crate::compartments::Compartments;
use crate::error::{Result, SirError};
use crate::schedule::{RateSchedule, check_rate};

/// Rate parameters of one scenario. `population` is the fixed N used as the
/// mixing denominator; it is never re-derived from the live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub population: f64,
    pub transmission: RateSchedule,
    pub gamma: f64,
}

impl ParameterSet {
    pub fn new(population: f64, transmission: RateSchedule, gamma: f64) -> Self {
        Self {
            population,
            transmission,
            gamma,
        }
    }

    pub fn constant(population: f64, beta: f64, gamma: f64) -> Self {
        Self::new(population, RateSchedule::constant(beta), gamma)
    }

    pub fn beta_at(&self, t: f64) -> f64 {
        self.transmission.rate_at(t)
    }

    pub fn reproduction_number_at(&self, t: f64) -> f64 {
        self.beta_at(t) / self.gamma
    }

    pub fn validate(&self) -> Result<()> {
        if !self.population.is_finite() || self.population <= 0.0 {
            return Err(SirError::invalid(
                "population",
                format!("must be a finite positive number, got {}", self.population),
            ));
        }
        check_rate("gamma", self.gamma)?;
        self.transmission.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialConditions {
    pub infectious: f64,
    #[serde(default)]
    pub recovered: f64,
}

impl InitialConditions {
    pub fn new(infectious: f64, recovered: f64) -> Self {
        Self {
            infectious,
            recovered,
        }
    }

    /// S0 = N - I0 - R0.
    pub fn state(&self, population: f64) -> Compartments {
        Compartments::new(
            population - self.infectious - self.recovered,
            self.infectious,
            self.recovered,
        )
    }

    pub fn validate(&self, population: f64) -> Result<()> {
        if !self.infectious.is_finite() || self.infectious < 0.0 {
            return Err(SirError::invalid(
                "initial_infectious",
                format!("must be finite and non-negative, got {}", self.infectious),
            ));
        }
        if !self.recovered.is_finite() || self.recovered < 0.0 {
            return Err(SirError::invalid(
                "initial_recovered",
                format!("must be finite and non-negative, got {}", self.recovered),
            ));
        }
        if self.infectious + self.recovered > population {
            return Err(SirError::invalid(
                "initial_infectious",
                format!(
                    "I0 + R0 = {} exceeds the population {population}",
                    self.infectious + self.recovered
                ),
            ));
        }
        Ok(())
    }
}
