//! Error types for the QSS integrator core.

use thiserror::Error;

/// Result type for QSS core operations.
pub type Result<T> = std::result::Result<T, QssError>;

/// Error types raised by the integrator core.
///
/// Builder and queue errors are always fatal. Numerical errors are fatal and
/// carry the offending time/variable/value so the caller can report a useful
/// diagnostic. Tolerance problems are non-fatal: the driver clamps and
/// continues, surfacing the condition as a `tracing::warn!` rather than as
/// an `Err` (see [`crate::config::MIN_TOLERANCE`]).
#[derive(Error, Debug)]
pub enum QssError {
    /// A model was finalized with a dangling reference: a derivative or
    /// handler referenced a variable that was never created, or wiring was
    /// otherwise inconsistent.
    #[error("builder error: {0}")]
    Builder(String),

    /// The derivative evaluator or a root solver produced a non-finite
    /// value.
    #[error("numerical error at t={time}: variable {variable:?} produced non-finite value {value}")]
    Numerical {
        /// Simulation time at which the failure occurred.
        time: f64,
        /// Name of the offending variable.
        variable: String,
        /// The non-finite value that was produced.
        value: f64,
    },

    /// The event queue detected an internal invariant violation: a shift
    /// with no prior entry, or a duplicate insert for a variable that
    /// already holds a queue entry.
    #[error("queue error: {0}")]
    Queue(String),

    /// A non-positive tolerance was clamped to [`crate::config::MIN_TOLERANCE`].
    /// Never returned as a fatal `Err`; constructed only so the warning path
    /// (§4.7, §7) carries the same structured `variable`/`field` payload as
    /// the other error kinds instead of an ad hoc string.
    #[error("tolerance error: {variable}.{field} was non-positive, clamped to minimum")]
    Tolerance {
        /// Name of the offending variable.
        variable: String,
        /// Which tolerance field was clamped (`"rTol"`, `"aTol"`, or `"zTol"`).
        field: &'static str,
    },
}

impl QssError {
    /// Construct a builder error.
    pub fn builder(msg: impl Into<String>) -> Self {
        Self::Builder(msg.into())
    }

    /// Construct a numerical error.
    pub fn numerical(time: f64, variable: impl Into<String>, value: f64) -> Self {
        Self::Numerical {
            time,
            variable: variable.into(),
            value,
        }
    }

    /// Construct a queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Construct a tolerance-clamp diagnostic (warning payload only).
    pub fn tolerance(variable: impl Into<String>, field: &'static str) -> Self {
        Self::Tolerance {
            variable: variable.into(),
            field,
        }
    }
}
