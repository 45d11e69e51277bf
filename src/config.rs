//! Configuration surface consumed by the integrator core (§6).
//!
//! The core takes configuration as plain data; loading it from a file or a
//! command line is a host-program concern (out of scope for this crate).

use serde::{Deserialize, Serialize};

/// Default relative tolerance, used when a model does not specify one.
pub const DEFAULT_R_TOL: f64 = 1.0e-4;

/// Default absolute tolerance, used when a model does not specify one.
pub const DEFAULT_A_TOL: f64 = 1.0e-6;

/// Default zero-crossing value tolerance.
pub const DEFAULT_Z_TOL: f64 = 1.0e-6;

/// Default bound on an Input variable's event step.
pub const DEFAULT_DT_MAX: f64 = 1.0;

/// Minimum tolerance a non-positive `rTol`/`aTol`/`zTol` is clamped to
/// (§4.7: "clamp to a documented minimum and continue with a warning").
pub const MIN_TOLERANCE: f64 = 1.0e-12;

/// Default integration method for variables built with `kind = QSS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// First-order QSS.
    QSS1,
    /// Second-order QSS.
    QSS2,
    /// Third-order QSS.
    QSS3,
    /// First-order linear-implicit QSS.
    LIQSS1,
    /// Second-order linear-implicit QSS.
    LIQSS2,
}

impl Default for Method {
    fn default() -> Self {
        Self::QSS2
    }
}

impl Method {
    /// Method order: 1 for QSS1/LIQSS1, 2 for QSS2/LIQSS2, 3 for QSS3.
    pub fn order(self) -> u8 {
        match self {
            Method::QSS1 | Method::LIQSS1 => 1,
            Method::QSS2 | Method::LIQSS2 => 2,
            Method::QSS3 => 3,
        }
    }

    /// Whether this method uses the linear-implicit (LIQSS) requantization
    /// rule rather than the canonical QSS rule.
    pub fn is_implicit(self) -> bool {
        matches!(self, Method::LIQSS1 | Method::LIQSS2)
    }
}

/// Simulation-wide options (§6's configuration table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Default method for variables built with `kind = QSS`.
    pub method: Method,
    /// Default relative tolerance.
    pub r_tol: f64,
    /// Default absolute tolerance.
    pub a_tol: f64,
    /// Default zero-crossing value tolerance.
    pub z_tol: f64,
    /// Simulation horizon.
    pub t_end: f64,
    /// Output sample period; 0 disables periodic output.
    pub dt_out: f64,
    /// Upper bound on an Input variable's event step.
    pub dt_max: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            method: Method::default(),
            r_tol: DEFAULT_R_TOL,
            a_tol: DEFAULT_A_TOL,
            z_tol: DEFAULT_Z_TOL,
            t_end: 1.0,
            dt_out: 0.0,
            dt_max: DEFAULT_DT_MAX,
        }
    }
}

/// Clamp a tolerance to [`MIN_TOLERANCE`], returning whether clamping
/// occurred (the caller is expected to warn exactly once per offending
/// variable/field when this is `true`).
pub fn clamp_tolerance(value: f64) -> (f64, bool) {
    if value > 0.0 && value.is_finite() {
        (value, false)
    } else {
        (MIN_TOLERANCE, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_order() {
        assert_eq!(Method::QSS1.order(), 1);
        assert_eq!(Method::QSS2.order(), 2);
        assert_eq!(Method::QSS3.order(), 3);
        assert_eq!(Method::LIQSS1.order(), 1);
        assert_eq!(Method::LIQSS2.order(), 2);
    }

    #[test]
    fn test_is_implicit() {
        assert!(Method::LIQSS1.is_implicit());
        assert!(Method::LIQSS2.is_implicit());
        assert!(!Method::QSS2.is_implicit());
    }

    #[test]
    fn test_clamp_tolerance() {
        assert_eq!(clamp_tolerance(1.0e-4), (1.0e-4, false));
        let (clamped, warned) = clamp_tolerance(-1.0);
        assert_eq!(clamped, MIN_TOLERANCE);
        assert!(warned);
        let (clamped, warned) = clamp_tolerance(0.0);
        assert_eq!(clamped, MIN_TOLERANCE);
        assert!(warned);
        let (clamped, warned) = clamp_tolerance(f64::NAN);
        assert_eq!(clamped, MIN_TOLERANCE);
        assert!(warned);
    }

    #[test]
    fn test_default_options() {
        let opts = SimulationOptions::default();
        assert_eq!(opts.method, Method::QSS2);
        assert_eq!(opts.r_tol, DEFAULT_R_TOL);
    }
}
