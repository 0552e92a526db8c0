use nalgebra::Vector3;

use crate::compartments::Compartments;
use crate::integrator::OdeSystem;
use crate::parameters::ParameterSet;

/// Rates of change of (S, I, R) at time `t`.
///
/// ```text
/// dS/dt = -β(t) S I / N
/// dI/dt =  β(t) S I / N - γ I
/// dR/dt =  γ I
/// ```
///
/// Values are not clamped; keeping the state non-negative is the
/// integrator's job.
pub fn derivatives(t: f64, state: &Compartments, parameters: &ParameterSet) -> Compartments {
    rates(parameters.beta_at(t), state, parameters)
}

fn rates(beta: f64, state: &Compartments, parameters: &ParameterSet) -> Compartments {
    let infection = beta * state.susceptible * state.infectious / parameters.population;
    let recovery = parameters.gamma * state.infectious;
    Compartments::new(-infection, infection - recovery, recovery)
}

/// Adapts a borrowed [`ParameterSet`] to the integrator's right-hand side.
#[derive(Debug, Clone, Copy)]
pub struct SirModel<'a> {
    parameters: &'a ParameterSet,
}

impl<'a> SirModel<'a> {
    pub fn new(parameters: &'a ParameterSet) -> Self {
        Self { parameters }
    }
}

impl OdeSystem for SirModel<'_> {
    fn derivative(&self, t: f64, y: &Vector3<f64>) -> Vector3<f64> {
        derivatives(t, &Compartments::from(*y), self.parameters).into()
    }

    fn derivative_left(&self, t: f64, y: &Vector3<f64>) -> Vector3<f64> {
        let beta = self.parameters.transmission.rate_before(t);
        rates(beta, &Compartments::from(*y), self.parameters).into()
    }

    fn breakpoints(&self) -> Vec<f64> {
        self.parameters.transmission.breakpoints()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schedule::Intervention;

    #[test]
    fn test_derivatives_sum_to_zero() {
        let parameters = ParameterSet::constant(1000.0, 0.3, 0.1);
        let state = Compartments::new(990.0, 10.0, 0.0);
        let d = derivatives(0.0, &state, &parameters);
        assert!((d.susceptible - -0.3 * 990.0 * 10.0 / 1000.0).abs() < 1e-12);
        assert!((d.recovered - 1.0).abs() < 1e-12);
        assert!(d.total().abs() < 1e-12);
    }

    #[test]
    fn test_uses_fixed_population() {
        // N comes from the parameters, not from S + I + R.
        let parameters = ParameterSet::constant(2000.0, 0.4, 0.1);
        let state = Compartments::new(500.0, 100.0, 0.0);
        let d = derivatives(0.0, &state, &parameters);
        assert!((d.susceptible - -0.4 * 500.0 * 100.0 / 2000.0).abs() < 1e-12);
    }

    #[test]
    fn test_intervention_switches_at_threshold() {
        let parameters = ParameterSet::new(1000.0, Intervention::new(10.0, 0.1).schedule(0.3), 0.1);
        let state = Compartments::new(900.0, 100.0, 0.0);
        let before = derivatives(9.999, &state, &parameters);
        let at = derivatives(10.0, &state, &parameters);
        assert!((before.susceptible - -27.0).abs() < 1e-9);
        assert!((at.susceptible - -9.0).abs() < 1e-9);
        let model = SirModel::new(&parameters);
        let y: Vector3<f64> = state.into();
        assert!((model.derivative_left(10.0, &y)[0] - -27.0).abs() < 1e-9);
        assert!((model.derivative(10.0, &y)[0] - -9.0).abs() < 1e-9);
        assert_eq!(SirModel::new(&parameters).breakpoints(), vec![10.0]);
    }

    #[test]
    fn test_no_infectious_no_change() {
        let parameters = ParameterSet::constant(1000.0, 0.3, 0.1);
        let d = derivatives(3.0, &Compartments::new(1000.0, 0.0, 0.0), &parameters);
        assert_eq!(d, Compartments::new(0.0, 0.0, 0.0));
    }
}
