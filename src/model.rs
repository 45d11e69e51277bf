//! The model builder: the only way to construct variables, wire the
//! observer/observee graph, and attach derivative/handler callbacks before
//! handing the model to a [`crate::driver::Simulation`] (§6 "Model-to-core
//! API").

use std::collections::HashMap;

use crate::config::{clamp_tolerance, SimulationOptions};
use crate::derivative::{DerivativeFn, InputFn};
use crate::driver::{HandlerFn, Simulation};
use crate::error::{QssError, Result};
use crate::variable::{Kind, Variable, VariableId};

/// Builds a QSS model: variables, their observer/observee wiring, and their
/// derivative/handler callbacks. Consumed by [`Model::build`] into a
/// [`Simulation`] that owns everything from then on.
pub struct Model {
    variables: Vec<Variable>,
    handlers: HashMap<VariableId, HandlerFn>,
}

impl Model {
    /// An empty model.
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Create a variable. `order` must be 0 (Discrete only), 1, 2, or 3.
    /// Non-positive `r_tol`/`a_tol` are clamped to
    /// [`crate::config::MIN_TOLERANCE`] with a warning (§4.7).
    pub fn new_variable(
        &mut self,
        name: impl Into<String>,
        kind: Kind,
        order: u8,
        r_tol: f64,
        a_tol: f64,
        x_ini: f64,
    ) -> VariableId {
        let id = VariableId(self.variables.len());
        let name = name.into();

        let (r_tol, r_clamped) = clamp_tolerance(r_tol);
        let (a_tol, a_clamped) = clamp_tolerance(a_tol);
        if r_clamped {
            tracing::warn!("{}", QssError::tolerance(name.as_str(), "rTol"));
        }
        if a_clamped {
            tracing::warn!("{}", QssError::tolerance(name.as_str(), "aTol"));
        }

        self.variables
            .push(Variable::new(id, name, kind, order, r_tol, a_tol, x_ini));
        id
    }

    /// Register that `dependent`'s derivative reads `observee`'s quantized
    /// state (§6). Reciprocal `observers` wiring happens at [`Model::build`]
    /// time so declaration order doesn't matter.
    pub fn declare_observee(&mut self, dependent: VariableId, observee: VariableId) -> Result<()> {
        self.check_id(dependent)?;
        self.check_id(observee)?;
        self.variables[dependent.0].observees.push(observee);
        Ok(())
    }

    /// Attach a QSS/LIQSS/zero-crossing derivative evaluator to a variable.
    pub fn set_derivative_function(&mut self, id: VariableId, f: DerivativeFn) -> Result<()> {
        self.check_id(id)?;
        self.variables[id.0].derivative = Some(f);
        Ok(())
    }

    /// Attach an exogenous time function to an Input variable.
    pub fn set_input_function(&mut self, id: VariableId, f: InputFn) -> Result<()> {
        self.check_id(id)?;
        self.variables[id.0].input_fn = Some(f);
        Ok(())
    }

    /// Set the crossing-value tolerance and upper `dt_max` bound for a
    /// variable (ZeroCrossing and Input kinds respectively; harmless no-op
    /// fields on other kinds).
    pub fn set_z_tol(&mut self, id: VariableId, z_tol: f64) -> Result<()> {
        self.check_id(id)?;
        let (z_tol, clamped) = clamp_tolerance(z_tol);
        if clamped {
            tracing::warn!("{}", QssError::tolerance(self.variables[id.0].name.as_str(), "zTol"));
        }
        self.variables[id.0].z_tol = z_tol;
        Ok(())
    }

    /// Set the upper bound on an Input variable's event step.
    pub fn set_dt_max(&mut self, id: VariableId, dt_max: f64) -> Result<()> {
        self.check_id(id)?;
        self.variables[id.0].dt_max = dt_max;
        Ok(())
    }

    /// Attach a zero-crossing handler, invoked with `(t, crossing,
    /// mutation_channel)` when `id`'s detected root fires (§6).
    pub fn set_handler(&mut self, id: VariableId, handler: HandlerFn) -> Result<()> {
        self.check_id(id)?;
        if !matches!(self.variables[id.0].kind, Kind::ZeroCrossing) {
            return Err(QssError::builder(format!(
                "handler attached to non-zero-crossing variable {:?}",
                self.variables[id.0].name
            )));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    fn check_id(&self, id: VariableId) -> Result<()> {
        if id.0 >= self.variables.len() {
            Err(QssError::builder(format!("unknown variable id {:?}", id)))
        } else {
            Ok(())
        }
    }

    /// Finalize wiring (reciprocal observer edges, dedup) and hand the
    /// model to a fresh [`Simulation`] (§4.1, §4.8).
    pub fn build(mut self, options: SimulationOptions) -> Result<Simulation> {
        let n = self.variables.len();
        let mut observer_edges: Vec<(VariableId, VariableId)> = Vec::new();
        for dependent in 0..n {
            for &observee in &self.variables[dependent].observees {
                if observee.0 >= n {
                    return Err(QssError::builder(format!(
                        "{:?} observes unknown variable {:?}",
                        self.variables[dependent].name, observee
                    )));
                }
                observer_edges.push((observee, VariableId(dependent)));
            }
        }
        for (observee, dependent) in observer_edges {
            self.variables[observee.0].add_observer(dependent);
        }
        for v in &mut self.variables {
            v.shrink_observers();
        }
        for (id, _) in &self.handlers {
            if id.0 >= n {
                return Err(QssError::builder(format!("handler attached to unknown variable {:?}", id)));
            }
        }
        Ok(Simulation::new(self.variables, self.handlers, options))
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivative::DerivativeValue;

    #[test]
    fn test_new_variable_clamps_bad_tolerance() {
        let mut m = Model::new();
        let id = m.new_variable("x", Kind::Qss, 1, -1.0, 0.0, 1.0);
        // Accessing through build() below exercises the clamp; here we just
        // check the id was allocated.
        assert_eq!(id, VariableId(0));
    }

    #[test]
    fn test_declare_observee_unknown_errors() {
        let mut m = Model::new();
        let x = m.new_variable("x", Kind::Qss, 1, 1.0e-4, 1.0e-6, 1.0);
        let bogus = VariableId(99);
        assert!(m.declare_observee(x, bogus).is_err());
    }

    #[test]
    fn test_build_wires_reciprocal_observers() {
        let mut m = Model::new();
        let x1 = m.new_variable("x1", Kind::Qss, 2, 1.0e-4, 1.0e-6, 0.0);
        let x2 = m.new_variable("x2", Kind::Qss, 2, 1.0e-4, 1.0e-6, 2.0);
        m.declare_observee(x1, x2).unwrap();
        m.set_derivative_function(
            x1,
            Box::new(|_t, obs| DerivativeValue::order1(-0.5 * 0.0 + 1.5 * obs[0].q0)),
        )
        .unwrap();
        m.set_derivative_function(x2, Box::new(|_t, _obs| DerivativeValue::order1(0.0)))
            .unwrap();
        let sim = m.build(SimulationOptions::default()).unwrap();
        assert_eq!(sim.variable(x2).observers, vec![x1]);
    }

    #[test]
    fn test_set_handler_rejects_non_zc() {
        let mut m = Model::new();
        let x = m.new_variable("x", Kind::Qss, 1, 1.0e-4, 1.0e-6, 1.0);
        let err = m.set_handler(x, Box::new(|_t, _c, _ch| {}));
        assert!(err.is_err());
    }
}
