//! Per-kind requantization algorithms (C4).
//!
//! These functions are pure polynomial arithmetic: they take the variable's
//! *old* continuous polynomial (captured before the update) and one or more
//! freshly evaluated [`DerivativeValue`]s, and commit the variable's new
//! quantized/continuous polynomials plus its next event step. They never
//! call back into the derivative evaluator themselves — orchestrating those
//! calls (including, for LIQSS, the perturbed self-overridden calls) is
//! [`crate::driver::Simulation`]'s job, since only the driver can borrow the
//! rest of the variable arena.

use crate::derivative::DerivativeValue;
use crate::time::{cubic_event_step, linear_event_step, quadratic_event_step, INFINITY};
use crate::variable::Variable;

/// A snapshot of a variable's continuous polynomial taken before a
/// requantization overwrites it, used to Taylor-expand the new quantized
/// polynomial (§4.2 step 1).
#[derive(Debug, Clone, Copy)]
pub struct OldPoly {
    pub t_x: f64,
    pub x0: f64,
    pub x1: f64,
    pub x2: f64,
    pub x3: f64,
}

impl OldPoly {
    /// Snapshot a variable's current continuous polynomial.
    pub fn snapshot(v: &Variable) -> Self {
        Self {
            t_x: v.t_x,
            x0: v.x0,
            x1: v.x1,
            x2: v.x2,
            x3: v.x3,
        }
    }

    /// `x(t)` on the old polynomial.
    pub fn eval(&self, t: f64) -> f64 {
        let dt = t - self.t_x;
        self.x0 + dt * (self.x1 + dt * (self.x2 + dt * self.x3))
    }

    /// `x1(t)` on the old polynomial.
    pub fn eval1(&self, t: f64) -> f64 {
        let dt = t - self.t_x;
        self.x1 + dt * (2.0 * self.x2 + dt * 3.0 * self.x3)
    }

    /// `x2(t)` on the old polynomial.
    pub fn eval2(&self, t: f64) -> f64 {
        let dt = t - self.t_x;
        2.0 * self.x2 + dt * 6.0 * self.x3
    }
}

/// Taylor-expand `old` about `t` into the quantized polynomial's
/// coefficients, truncated at `order - 1` (§4.2 step 1).
fn taylor_quantized(old: &OldPoly, t: f64, order: u8) -> (f64, f64, f64) {
    let q0 = old.eval(t);
    let q1 = if order >= 2 { old.eval1(t) } else { 0.0 };
    let q2 = if order >= 3 { old.eval2(t) / 2.0 } else { 0.0 };
    (q0, q1, q2)
}

/// Write the new continuous polynomial's coefficients from a freshly
/// evaluated derivative (§4.2 step 3: "lower-order x coefficients are set
/// so x(tQ)=q0, x1(tQ)=d/dt, ...").
pub(crate) fn write_continuous(v: &mut Variable, t: f64, x0: f64, d: &DerivativeValue) {
    v.t_x = t;
    v.x0 = x0;
    v.x1 = if v.order >= 1 { d.value } else { 0.0 };
    v.x2 = if v.order >= 2 { d.d1 / 2.0 } else { 0.0 };
    v.x3 = if v.order >= 3 { d.d2 / 6.0 } else { 0.0 };
}

/// The QSS/ZC event-time rule (§4.2 step 4): the smallest positive `tau`
/// for which `|x(tQ+tau) - q(tQ+tau)| = qTol`, using whichever polynomial
/// coefficient is the variable's leading (highest, unmatched by `q`) term.
pub fn event_step(order: u8, v: &Variable) -> f64 {
    match order {
        1 => linear_event_step(v.x1, v.q_tol),
        2 => quadratic_event_step(v.x2, v.q_tol),
        3 => cubic_event_step(v.x3, v.q_tol),
        _ => INFINITY,
    }
}

/// Commit a canonical QSS (or zero-crossing) requantization: Taylor-expand
/// the quantized polynomial from `old`, write the new continuous
/// polynomial from `d`, and compute the new `tE`. Returns the new `tE`.
pub fn commit_qss(v: &mut Variable, t: f64, old: &OldPoly, d: DerivativeValue) -> f64 {
    v.t_q = t;
    let (q0, q1, q2) = taylor_quantized(old, t, v.order);
    v.q0 = q0;
    v.q1 = q1;
    v.q2 = q2;
    v.refresh_q_tol();
    write_continuous(v, t, q0, &d);
    t + event_step(v.order, v)
}

/// Commit a first-order LIQSS requantization (§4.2 "LIQSS1, LIQSS2").
///
/// `hi_d`/`lo_d` are the derivative evaluated with this variable's own
/// quantized value substituted to `q0_nominal + qTol` and
/// `q0_nominal - qTol` respectively (`q0_nominal` is the Taylor-anchored
/// value the canonical rule would have used). If the two candidate
/// derivatives bracket zero, the fixed point between them is selected (a
/// flat trajectory, `x1 = 0`); otherwise the candidate whose sign matches
/// its own derivative is kept (the monotone case).
pub fn commit_liqss1(v: &mut Variable, t: f64, old: &OldPoly, hi_d: DerivativeValue, lo_d: DerivativeValue) -> f64 {
    v.t_q = t;
    let q0_nominal = old.eval(t);
    v.q_tol = crate::time::quantum_tolerance(v.a_tol, v.r_tol, q0_nominal);
    let q_tol = v.q_tol;
    let hi = q0_nominal + q_tol;
    let lo = q0_nominal - q_tol;
    let (q0, leading) = resolve_bracket(lo, hi, lo_d.value, hi_d.value);
    v.q0 = q0;
    v.q1 = 0.0;
    v.q2 = 0.0;
    v.refresh_q_tol();
    write_continuous(
        v,
        t,
        q0,
        &DerivativeValue::order1(leading),
    );
    t + event_step(1, v)
}

/// Commit a second-order LIQSS requantization.
///
/// Resolves `q0` exactly as [`commit_liqss1`] does (from the `.value`
/// field of candidates perturbed around the Taylor-anchored `q0`), then,
/// with `q0` fixed, resolves `q1` the same way from the `.d1` field of
/// candidates perturbed around the Taylor-anchored `q1` (§4.2: "LIQSS2
/// applies the analogous rule to the pair (q0, q1)").
#[allow(clippy::too_many_arguments)]
pub fn commit_liqss2(
    v: &mut Variable,
    t: f64,
    old: &OldPoly,
    hi0_d: DerivativeValue,
    lo0_d: DerivativeValue,
    hi1_d: DerivativeValue,
    lo1_d: DerivativeValue,
) -> f64 {
    v.t_q = t;
    let q0_nominal = old.eval(t);
    let q_tol = crate::time::quantum_tolerance(v.a_tol, v.r_tol, q0_nominal);
    let hi0 = q0_nominal + q_tol;
    let lo0 = q0_nominal - q_tol;
    let (q0, _) = resolve_bracket(lo0, hi0, lo0_d.value, hi0_d.value);

    let q1_nominal = old.eval1(t);
    let hi1 = q1_nominal + q_tol;
    let lo1 = q1_nominal - q_tol;
    let (q1, leading) = resolve_bracket(lo1, hi1, lo1_d.d1, hi1_d.d1);

    v.q0 = q0;
    v.q1 = q1;
    v.q2 = 0.0;
    v.refresh_q_tol();
    write_continuous(v, t, q0, &DerivativeValue::order2(q1, leading));
    t + event_step(2, v)
}

/// Shared bracket-or-monotone resolution rule used by LIQSS1/LIQSS2.
fn resolve_bracket(lo: f64, hi: f64, lo_val: f64, hi_val: f64) -> (f64, f64) {
    let brackets_zero = (lo_val <= 0.0 && hi_val >= 0.0) || (lo_val >= 0.0 && hi_val <= 0.0);
    if brackets_zero {
        let span = hi_val - lo_val;
        let frac = if span.abs() > 0.0 {
            (-lo_val / span).clamp(0.0, 1.0)
        } else {
            0.5
        };
        (lo + frac * (hi - lo), 0.0)
    } else if hi_val > 0.0 {
        (hi, hi_val)
    } else {
        (lo, lo_val)
    }
}

/// Commit an Input variable's requantization: sample `f(t)` and its
/// derivatives, then bound the event step by `dt_max` since `f` need not
/// be a polynomial (§4.2 "Input variables").
pub fn commit_input(v: &mut Variable, t: f64, d: DerivativeValue) -> f64 {
    v.t_q = t;
    let q0 = d.value;
    v.q0 = q0;
    v.q1 = if v.order >= 2 { d.d1 } else { 0.0 };
    v.q2 = if v.order >= 3 { d.d2 / 2.0 } else { 0.0 };
    v.refresh_q_tol();
    write_continuous(v, t, q0, &d);
    let tau = event_step(v.order, v).min(v.dt_max);
    t + tau
}

/// First initialization pass (§4.1 `init1`): set the continuous slope from
/// the freshly evaluated derivative's `.value` field, and, for methods whose
/// quantized polynomial carries a first-order term, set the quantized slope
/// equal to it. At `t0` the quantized and continuous trajectories have not
/// yet had a chance to diverge, so this is exact rather than an
/// approximation. LIQSS quantized state is left at the bracket midpoint
/// (`q1 = 0`) set by `init0`; its implicit resolution applies starting with
/// the variable's first requantization, not at `init0`/`init1` (an explicit
/// simplification over the ongoing LIQSS rule, see the design ledger).
pub fn init_pass1(v: &mut Variable, d: DerivativeValue) {
    v.x1 = if v.order >= 1 { d.value } else { 0.0 };
    if v.order >= 2 && !matches!(v.kind, crate::variable::Kind::Liqss) {
        v.q1 = d.value;
    }
    v.refresh_q_tol();
}

/// Second initialization pass (§4.1 `init2`): now that every variable's
/// first-order quantized state is in place (from `init_pass1`), re-evaluate
/// each variable's derivative — this time the `.d1`/`.d2` fields carry
/// meaningful chain-rule information — and write the second- and
/// third-order continuous coefficients, plus the quantized second-order
/// term for methods that carry one.
pub fn init_pass2(v: &mut Variable, d: DerivativeValue) {
    if v.order >= 2 {
        v.x2 = d.d1 / 2.0;
        if v.order >= 3 && !matches!(v.kind, crate::variable::Kind::Liqss) {
            v.q2 = v.x2;
        }
    }
    if v.order >= 3 {
        v.x3 = d.d2 / 6.0;
    }
}
