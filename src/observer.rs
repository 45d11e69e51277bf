//! Observer propagation (C6): when a variable's quantized state changes, its
//! observers' continuous trajectories must be refreshed — but the update
//! stops after exactly one hop, never cascading into the observers'
//! observers within the same batch (§4.4).

use crate::derivative::ObserveeState;
use crate::driver::Simulation;
use crate::error::Result;
use crate::kinds;
use crate::variable::{Kind, VariableId};

impl Simulation {
    /// Refresh `w`'s continuous polynomial after one of its observees
    /// committed a requantization, using `snapshot` (the *post*-batch-commit
    /// state, since propagation runs only once every committed variable in
    /// the batch has already settled). Recomputes `w`'s `tE` and reschedules
    /// its Requantization entry; reschedules `tZ` too if `w` is a
    /// zero-crossing variable. Input and Discrete variables never observe
    /// anything, so they are left untouched (§4.4).
    pub(crate) fn advance_observer(&mut self, w: VariableId, t: f64, snapshot: &[ObserveeState]) -> Result<()> {
        let kind = self.variable(w).kind;
        if matches!(kind, Kind::Input | Kind::Discrete) {
            return Ok(());
        }

        let x0 = self.variable(w).x(t);
        let d = self.eval_derivative(w, t, snapshot, None)?;

        let v = self.variable_mut(w);
        kinds::write_continuous(v, t, x0, &d);
        let order = v.order;
        let te = t + kinds::event_step(order, v);
        v.t_e = te;
        self.queue_shift_requantization(w, te)?;

        if matches!(kind, Kind::ZeroCrossing) {
            self.schedule_zero_crossing(w)?;
        }
        Ok(())
    }

    /// Propagate a committed batch's effects exactly one hop: every distinct
    /// observer of a touched variable (excluding variables already in the
    /// touched set, which committed their own requantization this batch)
    /// gets its continuous polynomial refreshed (§4.4, §4.5).
    pub(crate) fn propagate(&mut self, touched: &[VariableId], t: f64) -> Result<()> {
        let mut observers: Vec<VariableId> = Vec::new();
        for &id in touched {
            observers.extend(self.variable(id).observers.iter().copied());
        }
        observers.sort_unstable();
        observers.dedup();
        observers.retain(|o| !touched.contains(o));

        let snapshot = self.snapshot_states();
        for w in observers {
            self.advance_observer(w, t, &snapshot)?;
        }
        Ok(())
    }
}
