//! Direct tests of the quantified invariants and round-trip properties from
//! the specification's Testable Properties section (P1-P4, R1, R2), as
//! opposed to `scenarios.rs`'s end-to-end physical scenarios.

use approx::assert_abs_diff_eq;
use qss_core::{DerivativeValue, Kind, Model, SimulationOptions};

fn decay_sim(t_end: f64) -> (qss_core::Simulation, qss_core::VariableId) {
    let mut model = Model::new();
    let x = model.new_variable("x", Kind::Qss, 2, 1.0e-4, 1.0e-6, 1.0);
    model.declare_observee(x, x).unwrap();
    model
        .set_derivative_function(x, Box::new(|_t, obs| {
            // x' = -x, so x'' = -x' = x.
            let q0 = obs[0].q0;
            DerivativeValue::order2(-q0, q0)
        }))
        .unwrap();
    let mut options = SimulationOptions::default();
    options.t_end = t_end;
    let sim = model.build(options).unwrap();
    (sim, x)
}

/// P1: `x(tQ)` and `q(tQ)` agree to within machine precision immediately
/// after every requantization.
#[test]
fn p1_continuous_and_quantized_tracks_touch_at_tq() {
    let (mut sim, x) = decay_sim(5.0);
    sim.init0();
    sim.init1().unwrap();
    sim.init2().unwrap();
    sim.init_event().unwrap();
    while sim.next_event_time().is_some_and(|t| t <= 5.0) {
        sim.process_batch().unwrap();
        let v = sim.variable(x);
        let bound = 16.0 * f64::EPSILON * (v.q0.abs() + v.a_tol);
        assert_abs_diff_eq!(v.x(v.t_q), v.q(v.t_q), epsilon = bound.max(1.0e-15));
    }
}

/// P2: at the moment a variable's scheduled `tE` arrives (just before that
/// event is processed), the continuous and quantized tracks differ by
/// exactly the quantum, not more.
#[test]
fn p2_event_time_is_exactly_when_the_quantum_is_reached() {
    let (mut sim, x) = decay_sim(5.0);
    sim.init0();
    sim.init1().unwrap();
    sim.init2().unwrap();
    sim.init_event().unwrap();
    while sim.next_event_time().is_some_and(|t| t <= 5.0) {
        let te = sim.next_event_time().unwrap();
        let v = sim.variable(x);
        let gap = (v.x(te) - v.q(te)).abs();
        let bound = v.q_tol * (1.0 + 16.0 * f64::EPSILON);
        assert!(gap <= bound + 1.0e-12, "gap={gap} bound={bound}");
        sim.process_batch().unwrap();
    }
}

/// R1: running the same model with the same options twice, from scratch,
/// produces bitwise-identical output traces.
#[test]
fn r1_identical_options_produce_identical_output_streams() {
    let build = || {
        let mut model = Model::new();
        let x = model.new_variable("x", Kind::Qss, 2, 1.0e-4, 1.0e-6, 1.0);
        model.declare_observee(x, x).unwrap();
        model
            .set_derivative_function(x, Box::new(|_t, obs| {
                let q0 = obs[0].q0;
                DerivativeValue::order2(-q0, q0)
            }))
            .unwrap();
        let mut options = SimulationOptions::default();
        options.t_end = 8.0;
        options.dt_out = 0.5;
        let mut sim = model.build(options).unwrap();
        sim.run().unwrap();
        sim.trace().to_vec()
    };
    let first = build();
    let second = build();
    assert_eq!(first.len(), second.len());
    for ((t1, v1), (t2, v2)) in first.iter().zip(second.iter()) {
        assert_eq!(t1.to_bits(), t2.to_bits());
        for (a, b) in v1.iter().zip(v2.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}

/// R2: two variables scheduled to requantize at the same instant settle into
/// the same final state regardless of which one happened to be declared
/// (and therefore assigned a lower `VariableId`/earlier FIFO slot) first.
#[test]
fn r2_simultaneous_batch_is_order_independent() {
    fn build(first_is_a: bool) -> (f64, f64) {
        let mut model = Model::new();
        let (a, b) = if first_is_a {
            let a = model.new_variable("a", Kind::Qss, 1, 1.0e-3, 1.0e-6, 1.0);
            let b = model.new_variable("b", Kind::Qss, 1, 1.0e-3, 1.0e-6, 1.0);
            (a, b)
        } else {
            let b = model.new_variable("b", Kind::Qss, 1, 1.0e-3, 1.0e-6, 1.0);
            let a = model.new_variable("a", Kind::Qss, 1, 1.0e-3, 1.0e-6, 1.0);
            (a, b)
        };
        model.declare_observee(a, a).unwrap();
        model.declare_observee(b, b).unwrap();
        model
            .set_derivative_function(a, Box::new(|_t, obs| DerivativeValue::order1(-2.0 * obs[0].q0)))
            .unwrap();
        model
            .set_derivative_function(b, Box::new(|_t, obs| DerivativeValue::order1(-2.0 * obs[0].q0)))
            .unwrap();
        let mut options = SimulationOptions::default();
        options.t_end = 3.0;
        let mut sim = model.build(options).unwrap();
        sim.run().unwrap();
        (sim.value(a), sim.value(b))
    }

    let (a1, b1) = build(true);
    let (a2, b2) = build(false);
    assert_eq!(a1.to_bits(), a2.to_bits());
    assert_eq!(b1.to_bits(), b2.to_bits());
}
