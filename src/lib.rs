//! # qss-core
//!
//! An event-driven integrator core for the Quantized State System (QSS)
//! family of ODE methods: QSS1/2/3, LIQSS1/2, Discrete and Input variables,
//! and zero-crossing detection with handler dispatch.
//!
//! Unlike a time-stepped solver, each variable here schedules its own next
//! requantization event independently; the crate supplies the variable
//! representation, the per-kind requantization algorithms, the global event
//! queue, observer/observee propagation, and the zero-crossing subsystem.
//! Everything outside that — command-line parsing, model-file loading,
//! output-file writing, and demo derivative functions — is left to the host
//! program.
//!
//! ## Building and running a model
//!
//! ```
//! use qss_core::{DerivativeValue, Kind, Model, SimulationOptions};
//!
//! let mut model = Model::new();
//! let x = model.new_variable("x", Kind::Qss, 2, 1.0e-4, 1.0e-6, 1.0);
//! model
//!     .set_derivative_function(x, Box::new(|_t, _obs| DerivativeValue::order1(-1.0)))
//!     .unwrap();
//!
//! let mut options = SimulationOptions::default();
//! options.t_end = 1.0;
//! let mut sim = model.build(options).unwrap();
//! sim.run().unwrap();
//! assert!(sim.value(x) < 1.0);
//! ```

pub mod config;
pub mod crossing;
pub mod derivative;
pub mod driver;
pub mod error;
pub mod kinds;
pub mod model;
pub mod observer;
pub mod queue;
pub mod time;
pub mod variable;

pub use config::{Method, SimulationOptions, DEFAULT_A_TOL, DEFAULT_DT_MAX, DEFAULT_R_TOL, DEFAULT_Z_TOL};
pub use crossing::Crossing;
pub use derivative::{DerivativeFn, DerivativeValue, InputFn, ObserveeState};
pub use driver::{HandlerFn, MutationChannel, Simulation};
pub use error::{QssError, Result};
pub use model::Model;
pub use queue::{EventKind, EventQueue, QueueEntry};
pub use variable::{Kind, Variable, VariableId};

/// Crate version, for diagnostics and `--version`-style host reporting.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
