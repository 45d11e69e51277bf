//! The abstract derivative evaluator (C2).
//!
//! The core never knows how a model computes a derivative; it only knows how
//! to ask for one. A derivative function is handed a time `t` and the
//! current quantized state of every declared observee (in declaration
//! order), and returns the derivative value plus as many of its time
//! derivatives as the owning variable's order requires.

use crate::variable::VariableId;

/// A snapshot of an observee's quantized polynomial at the moment its
/// observer's derivative function is evaluated. Copied out of the arena so
/// the evaluator never needs a borrow of another variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserveeState {
    /// The observee's variable id, for evaluators that dispatch on identity.
    pub id: VariableId,
    /// Quantized value coefficient.
    pub q0: f64,
    /// Quantized first-derivative coefficient (0 if the observee's order
    /// doesn't carry one).
    pub q1: f64,
    /// Quantized second-derivative coefficient (0 if the observee's order
    /// doesn't carry one).
    pub q2: f64,
    /// Time the observee's quantized polynomial was last anchored (`tQ`).
    pub t_q: f64,
}

impl ObserveeState {
    /// Evaluate the observee's quantized polynomial `q(t)` at `t`.
    pub fn q(&self, t: f64) -> f64 {
        let dt = t - self.t_q;
        self.q0 + dt * (self.q1 + dt * self.q2)
    }

    /// Evaluate the observee's quantized first derivative `q1(t)` at `t`.
    pub fn q1(&self, t: f64) -> f64 {
        let dt = t - self.t_q;
        self.q1 + 2.0 * dt * self.q2
    }
}

/// The value returned by a derivative function: the derivative itself and,
/// when the owning variable's order requires them, its first and second
/// time derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DerivativeValue {
    /// d/dt of the state variable (or the zero-crossing expression value,
    /// for zero-crossing variables).
    pub value: f64,
    /// d²/dt² (needed by QSS2/QSS3/LIQSS2 and ZC2+).
    pub d1: f64,
    /// d³/dt³ (needed by QSS3 and ZC3-style variants).
    pub d2: f64,
}

impl DerivativeValue {
    /// Construct from just the leading derivative (QSS1/Input1/ZC1 use
    /// only this field).
    pub fn order1(value: f64) -> Self {
        Self {
            value,
            d1: 0.0,
            d2: 0.0,
        }
    }

    /// Construct with value and first derivative (QSS2/Input2/ZC2 use
    /// these two fields).
    pub fn order2(value: f64, d1: f64) -> Self {
        Self { value, d1, d2: 0.0 }
    }

    /// Construct with value, first and second derivatives (QSS3/Input3
    /// use all three fields).
    pub fn order3(value: f64, d1: f64, d2: f64) -> Self {
        Self { value, d1, d2 }
    }

    /// `true` if any field is non-finite, the numerical-error trigger
    /// condition of §4.7.
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.d1.is_finite() && self.d2.is_finite()
    }
}

/// The evaluator a QSS/LIQSS/ZC variable calls to obtain its derivative.
/// Permitted to read the quantized state handed to it; must not mutate
/// anything (the core never exposes a mutation path to a derivative
/// function, only to a zero-crossing handler via
/// [`crate::driver::MutationChannel`]).
pub type DerivativeFn = Box<dyn FnMut(f64, &[ObserveeState]) -> DerivativeValue + Send>;

/// The evaluator an Input variable calls to sample its exogenous function
/// `f(t)`; it ignores observees since Input variables have none.
pub type InputFn = Box<dyn FnMut(f64) -> DerivativeValue + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observee_state_eval() {
        let obs = ObserveeState {
            id: VariableId(0),
            q0: 2.5,
            q1: 17.0,
            q2: 0.0,
            t_q: 0.0,
        };
        assert_eq!(obs.q(1.0e-6), 2.5 + 17.0e-6);
        assert_eq!(obs.q1(0.0), 17.0);
    }

    #[test]
    fn test_derivative_value_is_finite() {
        assert!(DerivativeValue::order1(1.0).is_finite());
        assert!(!DerivativeValue::order1(f64::NAN).is_finite());
        assert!(!DerivativeValue::order3(1.0, f64::INFINITY, 0.0).is_finite());
    }
}
