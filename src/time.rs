//! Time and numeric utilities shared by every variable kind (C1).

/// Positive infinity used for "never self-advances" event times.
pub const INFINITY: f64 = f64::INFINITY;

/// Machine epsilon, used by the P1/P2 continuity checks in tests and by the
/// root isolation routines in [`crate::crossing`].
pub const EPSILON: f64 = f64::EPSILON;

/// Cube root, defined for negative arguments too (`f64::powf(1.0/3.0)` is
/// `NaN` for negative bases). Used by the QSS3 `tE` formula.
pub fn cbrt(x: f64) -> f64 {
    x.cbrt()
}

/// `max(aTol, rTol * |q0|)`, the derived quantum (§3, `qTol`).
pub fn quantum_tolerance(a_tol: f64, r_tol: f64, q0: f64) -> f64 {
    a_tol.max(r_tol * q0.abs())
}

/// Evaluate a quadratic `a + b*tau + c*tau^2` at `tau`.
pub fn eval_quadratic(a: f64, b: f64, c: f64, tau: f64) -> f64 {
    a + tau * (b + tau * c)
}

/// Evaluate a cubic `a + b*tau + c*tau^2 + d*tau^3` at `tau`.
pub fn eval_cubic(a: f64, b: f64, c: f64, d: f64, tau: f64) -> f64 {
    a + tau * (b + tau * (c + tau * d))
}

/// `n!` for small `n` (order is at most 3 in this system).
pub fn factorial(n: u32) -> f64 {
    match n {
        0 => 1.0,
        1 => 1.0,
        2 => 2.0,
        3 => 6.0,
        _ => (1..=n).map(f64::from).product(),
    }
}

/// Smallest positive `tau` solving `|b| * tau = qtol`, i.e. the QSS1 event
/// time formula. Returns [`INFINITY`] if `b` is (numerically) zero.
pub fn linear_event_step(b: f64, qtol: f64) -> f64 {
    if b == 0.0 {
        INFINITY
    } else {
        qtol / b.abs()
    }
}

/// Smallest positive `tau` solving `|c| * tau^2 = qtol`, i.e. the QSS2 event
/// time formula. Returns [`INFINITY`] if `c` is (numerically) zero.
pub fn quadratic_event_step(c: f64, qtol: f64) -> f64 {
    if c == 0.0 {
        INFINITY
    } else {
        (qtol / c.abs()).sqrt()
    }
}

/// Smallest positive `tau` solving `|d| * tau^3 = qtol`, i.e. the QSS3 event
/// time formula. Returns [`INFINITY`] if `d` is (numerically) zero.
pub fn cubic_event_step(d: f64, qtol: f64) -> f64 {
    if d == 0.0 {
        INFINITY
    } else {
        cbrt(qtol / d.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantum_tolerance() {
        assert_eq!(quantum_tolerance(1.0e-6, 1.0e-4, 2.5), 2.5e-4);
        assert_eq!(quantum_tolerance(1.0e-3, 1.0e-4, 0.0), 1.0e-3);
    }

    #[test]
    fn test_linear_event_step() {
        assert_eq!(linear_event_step(0.0, 1.0e-4), INFINITY);
        assert!((linear_event_step(-17.0, 1.0e-4) - (1.0e-4 / 17.0)).abs() < 1.0e-15);
    }

    #[test]
    fn test_quadratic_event_step() {
        assert_eq!(quadratic_event_step(0.0, 1.0e-4), INFINITY);
        let tau = quadratic_event_step(4.0, 1.0e-4);
        assert!((tau - (1.0e-4f64 / 4.0).sqrt()).abs() < 1.0e-15);
    }

    #[test]
    fn test_cubic_event_step() {
        assert_eq!(cubic_event_step(0.0, 1.0e-4), INFINITY);
        let tau = cubic_event_step(8.0, 1.0e-3);
        assert!((tau - (1.0e-3f64 / 8.0).cbrt()).abs() < 1.0e-15);
    }

    #[test]
    fn test_factorial() {
        assert_eq!(factorial(0), 1.0);
        assert_eq!(factorial(1), 1.0);
        assert_eq!(factorial(2), 2.0);
        assert_eq!(factorial(3), 6.0);
    }

    #[test]
    fn test_eval_cubic() {
        assert_eq!(eval_cubic(1.0, 2.0, 3.0, 4.0, 0.0), 1.0);
        assert_eq!(eval_cubic(1.0, 2.0, 3.0, 4.0, 1.0), 10.0);
    }
}
