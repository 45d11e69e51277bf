//! Variable base: polynomial state, tolerances, and the observer/observee
//! graph shared by every variable kind (C3).

use crate::crossing::Crossing;
use crate::derivative::{DerivativeFn, InputFn};
use crate::time::{quantum_tolerance, INFINITY};

/// Index of a [`Variable`] in the arena owned by [`crate::model::Model`] /
/// [`crate::driver::Simulation`]. Observer and observee edges are stored as
/// `VariableId`s rather than references so the graph can be cyclic (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub usize);

/// The closed sum of variable kinds (§4.2, §9 "Polymorphic Variable
/// family"). Carried as a plain tag on [`Variable`] rather than as a trait
/// object so the hot-path `match` in [`crate::kinds`] dispatches without
/// virtual calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Canonical QSS of order 1, 2, or 3.
    Qss,
    /// Linear-implicit QSS of order 1 or 2.
    Liqss,
    /// Discrete variable: order 0, mutated only by handlers.
    Discrete,
    /// Exogenous time function sampled at each requantization.
    Input,
    /// Zero-crossing detector.
    ZeroCrossing,
}

/// Per-variable polynomial state, tolerances, and observer/observee edges.
///
/// Continuous coefficients `x0..x3` describe `x(t) = x0 + x1*dt + x2*dt^2 +
/// x3*dt^3` about anchor `tX`; quantized coefficients `q0..q2` describe
/// `q(t) = q0 + q1*dt + q2*dt^2` about anchor `tQ` (§3). Unused slots for a
/// variable's order are always zero so evaluators don't need to branch on
/// order.
pub struct Variable {
    /// Identifying label.
    pub name: String,
    /// Arena index, set by `Model::new_variable`.
    pub id: VariableId,
    /// Which requantization algorithm this variable uses.
    pub kind: Kind,
    /// Method order: 0 (Discrete), 1, 2, or 3.
    pub order: u8,
    /// Relative tolerance.
    pub r_tol: f64,
    /// Absolute tolerance.
    pub a_tol: f64,
    /// Initial value, applied during `init0`.
    pub x_ini: f64,

    /// Most recent continuous-update time.
    pub t_x: f64,
    /// Most recent quantization time.
    pub t_q: f64,
    /// Scheduled next internal event time. `INFINITY` if this variable
    /// never self-advances (Discrete variables).
    pub t_e: f64,
    /// Next zero-crossing time (ZeroCrossing variables only).
    pub t_z: f64,

    /// Continuous polynomial coefficients.
    pub x0: f64,
    pub x1: f64,
    pub x2: f64,
    pub x3: f64,

    /// Quantized polynomial coefficients.
    pub q0: f64,
    pub q1: f64,
    pub q2: f64,

    /// `max(aTol, rTol * |q0|)`, recomputed at each requantization.
    pub q_tol: f64,

    /// Variables this variable's derivative reads.
    pub observees: Vec<VariableId>,
    /// Variables whose derivative reads this variable.
    pub observers: Vec<VariableId>,

    /// Derivative evaluator (Qss/Liqss/ZeroCrossing kinds).
    pub derivative: Option<DerivativeFn>,
    /// Exogenous function sampler (Input kind only).
    pub input_fn: Option<InputFn>,
    /// Upper bound on this Input variable's event step (Input kind only).
    pub dt_max: f64,

    /// Crossing-value tolerance (ZeroCrossing kind only).
    pub z_tol: f64,
    /// Current crossing classification (ZeroCrossing kind only).
    pub crossing: Crossing,
}

impl Variable {
    /// Construct a variable with the given identity and tolerances; all
    /// polynomial state is zeroed until `init0`/`init1`/`init2` run.
    pub fn new(
        id: VariableId,
        name: impl Into<String>,
        kind: Kind,
        order: u8,
        r_tol: f64,
        a_tol: f64,
        x_ini: f64,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            kind,
            order,
            r_tol,
            a_tol,
            x_ini,
            t_x: 0.0,
            t_q: 0.0,
            t_e: INFINITY,
            t_z: INFINITY,
            x0: 0.0,
            x1: 0.0,
            x2: 0.0,
            x3: 0.0,
            q0: 0.0,
            q1: 0.0,
            q2: 0.0,
            q_tol: a_tol,
            observees: Vec::new(),
            observers: Vec::new(),
            derivative: None,
            input_fn: None,
            dt_max: crate::config::DEFAULT_DT_MAX,
            z_tol: crate::config::DEFAULT_Z_TOL,
            crossing: Crossing::Flat,
        }
    }

    /// Continuous value `x(t)`.
    pub fn x(&self, t: f64) -> f64 {
        let dt = t - self.t_x;
        self.x0 + dt * (self.x1 + dt * (self.x2 + dt * self.x3))
    }

    /// Continuous first derivative `x1(t)`.
    pub fn x1(&self, t: f64) -> f64 {
        let dt = t - self.t_x;
        self.x1 + dt * (2.0 * self.x2 + dt * 3.0 * self.x3)
    }

    /// Continuous second derivative `x2(t)`.
    pub fn x2(&self, t: f64) -> f64 {
        let dt = t - self.t_x;
        2.0 * self.x2 + dt * 6.0 * self.x3
    }

    /// Continuous third derivative `x3(t)` (constant for an order-3
    /// polynomial).
    pub fn x3(&self, _t: f64) -> f64 {
        6.0 * self.x3
    }

    /// Quantized value `q(t)`.
    pub fn q(&self, t: f64) -> f64 {
        let dt = t - self.t_q;
        self.q0 + dt * (self.q1 + dt * self.q2)
    }

    /// Quantized first derivative `q1(t)`.
    pub fn q1(&self, t: f64) -> f64 {
        let dt = t - self.t_q;
        self.q1 + 2.0 * dt * self.q2
    }

    /// Quantized second derivative `q2(t)` (constant for an order-2
    /// quantized polynomial).
    pub fn q2(&self, _t: f64) -> f64 {
        2.0 * self.q2
    }

    /// Recompute `qTol` from the current `q0` (invariant 2, §3).
    pub fn refresh_q_tol(&mut self) {
        self.q_tol = quantum_tolerance(self.a_tol, self.r_tol, self.q0);
    }

    /// Register `observer` as depending on this variable's quantized state.
    /// Called by the model builder once per `declare_observee` wiring
    /// (§4.1: "at finalization each observee must call `add_observer(self)`
    /// on the dependent variable").
    pub fn add_observer(&mut self, observer: VariableId) {
        self.observers.push(observer);
    }

    /// Sort and deduplicate the observer list. Optional at runtime; used
    /// when the builder may have registered the same observer more than
    /// once (§4.4).
    pub fn shrink_observers(&mut self) {
        self.observers.sort_unstable();
        self.observers.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(order: u8) -> Variable {
        let mut v = Variable::new(VariableId(0), "x", Kind::Qss, order, 1.0e-4, 1.0e-6, 2.5);
        v.t_x = 0.0;
        v.t_q = 0.0;
        v.x0 = 2.5;
        v.x1 = 12.0 + 2.0 * 2.5;
        v.q0 = 2.5;
        v
    }

    #[test]
    fn test_x_eval_order1() {
        let v = make(1);
        assert_eq!(v.x(0.0), 2.5);
        assert!((v.x(1.0e-6) - (2.5 + 17.0e-6)).abs() < 1.0e-15);
    }

    #[test]
    fn test_q_eval() {
        let v = make(2);
        assert_eq!(v.q(0.0), 2.5);
    }

    #[test]
    fn test_refresh_q_tol() {
        let mut v = make(1);
        v.q0 = 2.5;
        v.refresh_q_tol();
        assert_eq!(v.q_tol, 1.0e-4 * 2.5);
    }

    #[test]
    fn test_shrink_observers_dedupes() {
        let mut v = make(1);
        v.add_observer(VariableId(3));
        v.add_observer(VariableId(1));
        v.add_observer(VariableId(3));
        v.shrink_observers();
        assert_eq!(v.observers, vec![VariableId(1), VariableId(3)]);
    }
}
