use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Susceptible, infectious and recovered counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Compartments {
    pub susceptible: f64,
    pub infectious: f64,
    pub recovered: f64,
}

impl Compartments {
    pub fn new(susceptible: f64, infectious: f64, recovered: f64) -> Self {
        Self {
            susceptible,
            infectious,
            recovered,
        }
    }

    pub fn total(&self) -> f64 {
        self.susceptible + self.infectious + self.recovered
    }

    pub fn get(&self, compartment: Compartment) -> f64 {
        match compartment {
            Compartment::Susceptible => self.susceptible,
            Compartment::Infectious => self.infectious,
            Compartment::Recovered => self.recovered,
        }
    }

}

impl From<Vector3<f64>> for Compartments {
    fn from(v: Vector3<f64>) -> Self {
        Compartments::new(v[0], v[1], v[2])
    }
}

impl From<Compartments> for Vector3<f64> {
    fn from(c: Compartments) -> Self {
        Vector3::new(c.susceptible, c.infectious, c.recovered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compartment {
    Susceptible,
    Infectious,
    Recovered,
}

impl Compartment {
    pub fn name(&self) -> &'static str {
        match self {
            Compartment::Susceptible => "susceptible",
            Compartment::Infectious => "infectious",
            Compartment::Recovered => "recovered",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vector_conversion() {
        let c = Compartments::new(99.0, 1.0, 0.0);
        let v: Vector3<f64> = c.into();
        assert_eq!(v, Vector3::new(99.0, 1.0, 0.0));
        assert_eq!(Compartments::from(v), c);
        assert_eq!(c.total(), 100.0);
    }
}
