//! The simulation driver (C8): owns the variable arena, the event queue, and
//! the main loop that alternates staged initialization, simultaneous-batch
//! requantization, zero-crossing handler dispatch, and output sampling
//! (§4.1, §4.3, §4.5).

use std::collections::HashMap;

use crate::config::SimulationOptions;
use crate::crossing::Crossing;
use crate::derivative::{DerivativeValue, ObserveeState};
use crate::error::{QssError, Result};
use crate::kinds::{self, OldPoly};
use crate::queue::{EventKind, EventQueue};
use crate::time::quantum_tolerance;
use crate::variable::{Kind, Variable, VariableId};

/// A zero-crossing handler: given the event time, the crossing
/// classification, and a channel restricted to reinitializing variables by
/// value, updates the model's discrete (or continuous) state (§4.2
/// "ZeroCrossing", §6 "handler callback").
pub type HandlerFn = Box<dyn FnMut(f64, Crossing, &mut MutationChannel) + Send>;

/// The only way a handler may reach outside its own variable: setting a
/// Discrete variable's value at the current event time. Every call is
/// recorded so the driver can propagate the mutation to that variable's
/// observers after the batch's handlers have all run (§4.5 two-phase
/// commit).
pub struct MutationChannel<'a> {
    variables: &'a mut [Variable],
    touched: Vec<VariableId>,
}

impl<'a> MutationChannel<'a> {
    fn new(variables: &'a mut [Variable]) -> Self {
        Self {
            variables,
            touched: Vec::new(),
        }
    }

    /// Reinitialize any variable's state to `new_value` at time `t`
    /// (§3 "Lifecycle": `advance_handler` "reinitializes other variables").
    /// Reseats both polynomials to a constant (`x0 = q0 = new_value`,
    /// all higher coefficients zeroed) at `t`; a no-op if `target` is out of
    /// range. For Discrete variables this is the final word — they never
    /// self-schedule. For self-advancing kinds (Qss/Liqss/Input/
    /// ZeroCrossing) the driver re-derives the slope and next event time
    /// from this fresh anchor once every handler in the batch has run (§4.5
    /// two-phase commit), since that requires the derivative evaluator,
    /// which this channel intentionally does not expose.
    pub fn reinit(&mut self, target: VariableId, t: f64, new_value: f64) {
        let Some(v) = self.variables.get_mut(target.0) else {
            return;
        };
        v.t_x = t;
        v.x0 = new_value;
        v.x1 = 0.0;
        v.x2 = 0.0;
        v.x3 = 0.0;
        v.t_q = t;
        v.q0 = new_value;
        v.q1 = 0.0;
        v.q2 = 0.0;
        v.refresh_q_tol();
        self.touched.push(target);
    }
}

/// An owned, runnable QSS model: every variable's polynomial state, its
/// handlers, and the global event queue (§4.8 "Simulation").
pub struct Simulation {
    variables: Vec<Variable>,
    handlers: HashMap<VariableId, HandlerFn>,
    queue: EventQueue,
    t: f64,
    options: SimulationOptions,
    trace: Vec<(f64, Vec<f64>)>,
}

impl Simulation {
    pub(crate) fn new(
        variables: Vec<Variable>,
        handlers: HashMap<VariableId, HandlerFn>,
        options: SimulationOptions,
    ) -> Self {
        Self {
            variables,
            handlers,
            queue: EventQueue::new(),
            t: 0.0,
            options,
            trace: Vec::new(),
        }
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Read-only access to a variable, for inspection and tests.
    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    pub(crate) fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id.0]
    }

    /// Every variable's continuous value `x(t)` at the current time.
    pub fn value(&self, id: VariableId) -> f64 {
        self.variables[id.0].x(self.t)
    }

    /// Samples recorded at `Output` events, `(t, values_in_id_order)`.
    pub fn trace(&self) -> &[(f64, Vec<f64>)] {
        &self.trace
    }

    /// The time of the queue's earliest pending event, or `None` if the
    /// queue is empty. Lets a caller drive [`Simulation::process_batch`]
    /// directly (e.g. to count events) while still honoring a horizon, the
    /// same check [`Simulation::run`] performs internally (§5
    /// "Cancellation & timeouts").
    pub fn next_event_time(&self) -> Option<f64> {
        self.queue.top().map(|e| e.time)
    }

    pub(crate) fn snapshot_states(&self) -> Vec<ObserveeState> {
        self.variables
            .iter()
            .map(|v| ObserveeState {
                id: v.id,
                q0: v.q0,
                q1: v.q1,
                q2: v.q2,
                t_q: v.t_q,
            })
            .collect()
    }

    fn ids(&self) -> Vec<VariableId> {
        self.variables.iter().map(|v| v.id).collect()
    }

    /// Call `id`'s derivative function with the observee snapshot, optionally
    /// substituting `(q0, q1)` for `id`'s own entry (the LIQSS bracket
    /// perturbation, §4.2). Errors if the result is non-finite (§4.7).
    pub(crate) fn eval_derivative(
        &mut self,
        id: VariableId,
        t: f64,
        snapshot: &[ObserveeState],
        self_override: Option<(f64, f64)>,
    ) -> Result<DerivativeValue> {
        let observee_ids = self.variables[id.0].observees.clone();
        let mut args = Vec::with_capacity(observee_ids.len());
        for oid in observee_ids {
            let mut s = snapshot[oid.0];
            if oid == id {
                if let Some((q0, q1)) = self_override {
                    s.q0 = q0;
                    s.q1 = q1;
                }
            }
            args.push(s);
        }
        let mut f = self.variables[id.0].derivative.take().ok_or_else(|| {
            QssError::builder(format!(
                "variable {:?} has no derivative function",
                self.variables[id.0].name
            ))
        })?;
        let result = f(t, &args);
        self.variables[id.0].derivative = Some(f);
        if !result.is_finite() {
            let err = QssError::numerical(t, self.variables[id.0].name.clone(), result.value);
            tracing::error!("{err}");
            return Err(err);
        }
        Ok(result)
    }

    fn eval_input(&mut self, id: VariableId, t: f64) -> Result<DerivativeValue> {
        let mut f = self.variables[id.0].input_fn.take().ok_or_else(|| {
            QssError::builder(format!("variable {:?} has no input function", self.variables[id.0].name))
        })?;
        let result = f(t);
        self.variables[id.0].input_fn = Some(f);
        if !result.is_finite() {
            let err = QssError::numerical(t, self.variables[id.0].name.clone(), result.value);
            tracing::error!("{err}");
            return Err(err);
        }
        Ok(result)
    }

    /// `init0` (§4.1): anchor every variable's continuous and quantized
    /// polynomial at the initial value, at `t = 0`.
    pub fn init0(&mut self) {
        self.t = 0.0;
        for v in &mut self.variables {
            v.t_x = 0.0;
            v.t_q = 0.0;
            v.x0 = v.x_ini;
            v.x1 = 0.0;
            v.x2 = 0.0;
            v.x3 = 0.0;
            v.q0 = v.x_ini;
            v.q1 = 0.0;
            v.q2 = 0.0;
            v.refresh_q_tol();
        }
    }

    /// `init1` (§4.1): first-order derivative pass, across all variables.
    pub fn init1(&mut self) -> Result<()> {
        let t0 = self.t;
        let snapshot = self.snapshot_states();
        for id in self.ids() {
            let kind = self.variables[id.0].kind;
            if matches!(kind, Kind::Discrete) {
                continue;
            }
            let d = if matches!(kind, Kind::Input) {
                self.eval_input(id, t0)?
            } else {
                self.eval_derivative(id, t0, &snapshot, None)?
            };
            kinds::init_pass1(&mut self.variables[id.0], d);
        }
        Ok(())
    }

    /// `init2` (§4.1): second-order derivative pass, run after every
    /// variable's first-order quantized state is available system-wide.
    pub fn init2(&mut self) -> Result<()> {
        let t0 = self.t;
        let snapshot = self.snapshot_states();
        for id in self.ids() {
            let kind = self.variables[id.0].kind;
            let order = self.variables[id.0].order;
            if matches!(kind, Kind::Discrete) || order < 2 {
                continue;
            }
            let d = if matches!(kind, Kind::Input) {
                self.eval_input(id, t0)?
            } else {
                self.eval_derivative(id, t0, &snapshot, None)?
            };
            kinds::init_pass2(&mut self.variables[id.0], d);
        }
        Ok(())
    }

    /// `init_event` (§4.1): compute every self-scheduling variable's first
    /// `tE`, plus `tZ` for zero-crossing variables, and populate the queue.
    pub fn init_event(&mut self) -> Result<()> {
        let t0 = self.t;
        for id in self.ids() {
            let kind = self.variables[id.0].kind;
            if matches!(kind, Kind::Discrete) {
                continue;
            }
            let order = self.variables[id.0].order;
            let te = t0 + kinds::event_step(order, &self.variables[id.0]);
            self.variables[id.0].t_e = te;
            self.queue.insert(EventKind::Requantization, Some(id), te)?;
            if matches!(kind, Kind::ZeroCrossing) {
                self.schedule_zero_crossing(id)?;
            }
        }
        Ok(())
    }

    /// Move a variable's Requantization entry to `te`, for callers outside
    /// this module that cannot reach the private `queue` field directly.
    pub(crate) fn queue_shift_requantization(&mut self, id: VariableId, te: f64) -> Result<()> {
        self.queue.shift(EventKind::Requantization, Some(id), te)
    }

    /// Recompute a zero-crossing variable's `tZ` from its current continuous
    /// polynomial and (re)schedule its Handler entry (§4.6). A root is only
    /// accepted within `(tX, min(tE, horizon)]`: a root at or beyond the
    /// variable's own next requantization or past the simulation horizon is
    /// not armed yet (the next requantization or `schedule_zero_crossing`
    /// call will re-isolate it against a fresher polynomial).
    pub(crate) fn schedule_zero_crossing(&mut self, id: VariableId) -> Result<()> {
        let (order, x0, x1, x2, x3, z_tol, t_x, t_e) = {
            let v = &self.variables[id.0];
            (v.order, v.x0, v.x1, v.x2, v.x3, v.z_tol, v.t_x, v.t_e)
        };
        let horizon = self.options.t_end.min(t_e);
        let root = crate::crossing::find_root(order, x0, x1, x2, x3, z_tol);
        let had_entry = self.queue.contains(EventKind::Handler, Some(id));
        match root {
            Some(tau) if t_x + tau <= horizon => {
                let t_z = t_x + tau;
                self.variables[id.0].t_z = t_z;
                if had_entry {
                    self.queue.shift(EventKind::Handler, Some(id), t_z)?;
                } else {
                    self.queue.insert(EventKind::Handler, Some(id), t_z)?;
                }
            }
            _ => {
                self.variables[id.0].t_z = crate::time::INFINITY;
                if had_entry {
                    self.queue.remove(EventKind::Handler, Some(id));
                }
            }
        }
        Ok(())
    }

    /// Commit a single variable's requantization: dispatch on `Kind` to the
    /// matching function in [`crate::kinds`], using `snapshot` (the frozen
    /// pre-batch state) for every derivative call so a batch's outcome never
    /// depends on the order its members are processed in (§4.5 invariant
    /// R2).
    fn commit_requantization(&mut self, id: VariableId, t: f64, snapshot: &[ObserveeState]) -> Result<()> {
        let kind = self.variables[id.0].kind;
        let order = self.variables[id.0].order;
        let old = OldPoly::snapshot(&self.variables[id.0]);

        match kind {
            Kind::Qss | Kind::ZeroCrossing => {
                let d = self.eval_derivative(id, t, snapshot, None)?;
                let te = kinds::commit_qss(&mut self.variables[id.0], t, &old, d);
                self.variables[id.0].t_e = te;
            }
            Kind::Liqss if order <= 1 => {
                let v = &self.variables[id.0];
                let q0_nom = old.eval(t);
                let q_tol = quantum_tolerance(v.a_tol, v.r_tol, q0_nom);
                let hi_d = self.eval_derivative(id, t, snapshot, Some((q0_nom + q_tol, 0.0)))?;
                let lo_d = self.eval_derivative(id, t, snapshot, Some((q0_nom - q_tol, 0.0)))?;
                let te = kinds::commit_liqss1(&mut self.variables[id.0], t, &old, hi_d, lo_d);
                self.variables[id.0].t_e = te;
            }
            Kind::Liqss => {
                let v = &self.variables[id.0];
                let q0_nom = old.eval(t);
                let q1_nom = old.eval1(t);
                let q_tol = quantum_tolerance(v.a_tol, v.r_tol, q0_nom);
                let hi0_d = self.eval_derivative(id, t, snapshot, Some((q0_nom + q_tol, q1_nom)))?;
                let lo0_d = self.eval_derivative(id, t, snapshot, Some((q0_nom - q_tol, q1_nom)))?;
                let hi1_d = self.eval_derivative(id, t, snapshot, Some((q0_nom, q1_nom + q_tol)))?;
                let lo1_d = self.eval_derivative(id, t, snapshot, Some((q0_nom, q1_nom - q_tol)))?;
                let te = kinds::commit_liqss2(&mut self.variables[id.0], t, &old, hi0_d, lo0_d, hi1_d, lo1_d);
                self.variables[id.0].t_e = te;
            }
            Kind::Input => {
                let d = self.eval_input(id, t)?;
                let te = kinds::commit_input(&mut self.variables[id.0], t, d);
                self.variables[id.0].t_e = te;
            }
            Kind::Discrete => {
                return Err(QssError::queue(format!(
                    "discrete variable {:?} should never hold a Requantization entry",
                    self.variables[id.0].name
                )));
            }
        }

        self.queue.shift(EventKind::Requantization, Some(id), self.variables[id.0].t_e)?;
        if matches!(kind, Kind::ZeroCrossing) {
            self.schedule_zero_crossing(id)?;
        }
        tracing::trace!(variable = %self.variables[id.0].name, t, "committed requantization");
        Ok(())
    }

    /// Fire a zero-crossing variable's handler: classify the crossing from
    /// its polynomial just before/after `t`, run the user callback through a
    /// [`MutationChannel`], and return the Discrete variables it touched so
    /// the batch can propagate them (§4.2, §4.5).
    ///
    /// The before/after probe offset is scaled from the polynomial's slope
    /// at `t` so that a genuine (non-tangent) crossing always moves the
    /// sampled value outside `classify`'s `zTol` dead-band; a fixed
    /// machine-epsilon offset would leave `|slope * eps|` far below `zTol`
    /// and misclassify every crossing as `Crossing::Flat`.
    fn fire_handler(&mut self, id: VariableId, t: f64) -> Result<Vec<VariableId>> {
        let (before, after, z_tol) = {
            let v = &self.variables[id.0];
            let slope = v.x1(t);
            let z_tol = v.z_tol;
            let eps = if slope.abs() > 0.0 {
                (4.0 * z_tol / slope.abs()).clamp(1.0e-9, 1.0e-2)
            } else {
                1.0e-6
            };
            (v.x(t - eps), v.x(t + eps), z_tol)
        };
        let crossing = crate::crossing::classify(before, after, z_tol);
        self.variables[id.0].crossing = crossing;

        let Some(mut handler) = self.handlers.remove(&id) else {
            self.schedule_zero_crossing(id)?;
            return Ok(Vec::new());
        };
        let mut channel = MutationChannel::new(&mut self.variables);
        handler(t, crossing, &mut channel);
        let touched = channel.touched;
        self.handlers.insert(id, handler);

        self.schedule_zero_crossing(id)?;
        tracing::trace!(variable = %self.variables[id.0].name, t, ?crossing, "fired handler");
        Ok(touched)
    }

    /// Re-derive a handler-reinitialized variable's slope and next event
    /// time now that its `x0`/`q0` have been reseated by a
    /// [`MutationChannel`] (§3 Lifecycle, §4.5). A no-op for Discrete
    /// variables, which never hold a Requantization entry. For order ≥ 2
    /// methods the freshly evaluated derivative also lifts the quantized
    /// polynomial's higher coefficients to the continuous ones, maintaining
    /// invariant 6 (`dⁿq/dtⁿ(tQ) = dⁿx/dtⁿ(tQ)`) immediately after a reinit,
    /// the same way a canonical requantization does.
    fn reinit_requantize(&mut self, id: VariableId, t: f64, snapshot: &[ObserveeState]) -> Result<()> {
        let kind = self.variables[id.0].kind;
        if matches!(kind, Kind::Discrete) {
            return Ok(());
        }
        let x0 = self.variables[id.0].x0;
        let d = if matches!(kind, Kind::Input) {
            self.eval_input(id, t)?
        } else {
            self.eval_derivative(id, t, snapshot, None)?
        };
        let v = &mut self.variables[id.0];
        kinds::write_continuous(v, t, x0, &d);
        let order = v.order;
        if order >= 2 {
            v.q1 = v.x1;
        }
        if order >= 3 {
            v.q2 = v.x2;
        }
        v.refresh_q_tol();
        let te = t + kinds::event_step(order, v);
        v.t_e = te;
        if self.queue.contains(EventKind::Requantization, Some(id)) {
            self.queue_shift_requantization(id, te)?;
        } else {
            self.queue.insert(EventKind::Requantization, Some(id), te)?;
        }
        if matches!(kind, Kind::ZeroCrossing) {
            self.schedule_zero_crossing(id)?;
        }
        Ok(())
    }

    fn emit_output(&mut self, t: f64) {
        let values: Vec<f64> = self.variables.iter().map(|v| v.x(t)).collect();
        self.trace.push((t, values));
    }

    /// Process every event scheduled at the queue's earliest time as one
    /// simultaneous batch: commit all Requantization entries against a
    /// frozen pre-batch snapshot, fire Handler entries, then propagate every
    /// touched variable's observers exactly one hop (§4.3, §4.4, §4.5).
    /// Returns `false` if the queue was empty.
    pub fn process_batch(&mut self) -> Result<bool> {
        if self.queue.is_empty() {
            return Ok(false);
        }
        let batch = self.queue.pop_simultaneous();
        let t = batch[0].time;
        self.t = t;
        let snapshot = self.snapshot_states();

        let mut touched: Vec<VariableId> = Vec::new();
        let mut handler_touched: Vec<VariableId> = Vec::new();
        for entry in &batch {
            match entry.kind {
                EventKind::Requantization => {
                    let id = entry
                        .variable
                        .expect("Requantization entries always carry a variable");
                    self.commit_requantization(id, t, &snapshot)?;
                    touched.push(id);
                }
                EventKind::Output => {
                    self.emit_output(t);
                    if self.options.dt_out > 0.0 {
                        let next = t + self.options.dt_out;
                        if next <= self.options.t_end {
                            self.queue.insert(EventKind::Output, None, next)?;
                        }
                    }
                }
                EventKind::Handler => {
                    let id = entry.variable.expect("Handler entries always carry a variable");
                    let more = self.fire_handler(id, t)?;
                    handler_touched.extend(more);
                }
            }
        }
        if !handler_touched.is_empty() {
            handler_touched.sort_unstable();
            handler_touched.dedup();
            let post_handler_snapshot = self.snapshot_states();
            for &id in &handler_touched {
                self.reinit_requantize(id, t, &post_handler_snapshot)?;
            }
            touched.extend(handler_touched);
        }
        touched.sort_unstable();
        touched.dedup();
        self.propagate(&touched, t)?;
        tracing::trace!(t, batch_size = batch.len(), "processed simultaneous batch");
        Ok(true)
    }

    /// Run the full simulation from `t = 0` to `options.t_end` (§4.1,
    /// §4.8): staged initialization, then simultaneous-batch processing
    /// until the queue empties or its earliest time exceeds `t_end`.
    pub fn run(&mut self) -> Result<()> {
        self.init0();
        self.init1()?;
        self.init2()?;
        self.init_event()?;
        if self.options.dt_out > 0.0 {
            self.queue.insert(EventKind::Output, None, self.options.dt_out)?;
        }
        loop {
            let Some(top) = self.queue.top() else {
                break;
            };
            if top.time > self.options.t_end {
                break;
            }
            self.process_batch()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn decay_model() -> (Simulation, VariableId) {
        let mut m = Model::new();
        let x = m.new_variable("x", Kind::Qss, 1, 1.0e-4, 1.0e-6, 1.0);
        m.set_derivative_function(x, Box::new(|_t, _obs| DerivativeValue::order1(-1.0)))
            .unwrap();
        let mut opts = SimulationOptions::default();
        opts.t_end = 1.0;
        let sim = m.build(opts).unwrap();
        (sim, x)
    }

    #[test]
    fn test_init_sequence_sets_initial_slope() {
        let (mut sim, x) = decay_model();
        sim.init0();
        sim.init1().unwrap();
        assert_eq!(sim.variable(x).x1, -1.0);
        assert_eq!(sim.variable(x).q1, 0.0); // order 1: no quantized slope term
    }

    #[test]
    fn test_run_drains_queue_and_stays_within_t_end() {
        let (mut sim, x) = decay_model();
        sim.run().unwrap();
        assert!(sim.time() <= 1.0 + 1.0e-9);
        assert!(sim.value(x) < 1.0);
    }

    #[test]
    fn test_discrete_variable_never_self_schedules() {
        let mut m = Model::new();
        let d = m.new_variable("flag", Kind::Discrete, 0, 1.0e-4, 1.0e-6, 0.0);
        let mut opts = SimulationOptions::default();
        opts.t_end = 1.0;
        let mut sim = m.build(opts).unwrap();
        sim.init0();
        sim.init1().unwrap();
        sim.init2().unwrap();
        sim.init_event().unwrap();
        assert!(!sim.queue.contains(EventKind::Requantization, Some(d)));
    }
}
