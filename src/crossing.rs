//! Zero-crossing root isolation and crossing classification (C7).

use std::f64::consts::PI;

/// Classification of a detected zero crossing (§4.2). Ordered exactly as
/// declared so that `crossing <= Crossing::Dn` is a convenient test for
/// "any downward crossing", matching the source solver's convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Crossing {
    /// Positive before, negative after: an unambiguous downward crossing.
    DnPN,
    /// Positive before, (numerically) zero after.
    DnPZ,
    /// Generic downward crossing (fallback when before/after are both
    /// negative but a root was still isolated between them).
    Dn,
    /// (Numerically) zero before, negative after.
    DnZN,
    /// Tangent: the polynomial touches zero without changing sign.
    Flat,
    /// (Numerically) zero before, positive after.
    UpZP,
    /// Generic upward crossing (fallback when before/after are both
    /// positive but a root was still isolated between them).
    Up,
    /// Negative before, (numerically) zero after.
    UpNZ,
    /// Negative before, positive after: an unambiguous upward crossing.
    UpNP,
}

/// Classify a crossing from the polynomial's value immediately before and
/// immediately after the detected root, given the variable's `zTol` (§4.2,
/// §4.6: "If `|x(tX)| ≤ zTol`, treat as an immediate tangent crossing").
pub fn classify(before: f64, after: f64, z_tol: f64) -> Crossing {
    let sign = |v: f64| -> i8 {
        if v > z_tol {
            1
        } else if v < -z_tol {
            -1
        } else {
            0
        }
    };
    match (sign(before), sign(after)) {
        (1, -1) => Crossing::DnPN,
        (1, 0) => Crossing::DnPZ,
        (0, -1) => Crossing::DnZN,
        (-1, 1) => Crossing::UpNP,
        (-1, 0) => Crossing::UpNZ,
        (0, 1) => Crossing::UpZP,
        (1, 1) => Crossing::Up,
        (-1, -1) => Crossing::Dn,
        (0, 0) => Crossing::Flat,
        _ => Crossing::Flat,
    }
}

/// Smallest strictly-positive value among the candidates, or `None`.
fn smallest_positive(candidates: impl IntoIterator<Item = f64>) -> Option<f64> {
    candidates
        .into_iter()
        .filter(|t| t.is_finite() && *t > 0.0)
        .fold(None, |acc, t| match acc {
            None => Some(t),
            Some(best) if t < best => Some(t),
            Some(best) => Some(best),
        })
}

/// Smallest positive root of `x0 + x1*tau` (§4.6).
pub fn root_order1(x0: f64, x1: f64) -> Option<f64> {
    if x1 == 0.0 {
        return None;
    }
    smallest_positive([-x0 / x1])
}

/// Smallest positive root of `x0 + x1*tau + x2*tau^2` (§4.6).
pub fn root_order2(x0: f64, x1: f64, x2: f64) -> Option<f64> {
    if x2 == 0.0 {
        return root_order1(x0, x1);
    }
    let disc = x1 * x1 - 4.0 * x2 * x0;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let r1 = (-x1 + sqrt_disc) / (2.0 * x2);
    let r2 = (-x1 - sqrt_disc) / (2.0 * x2);
    smallest_positive([r1, r2])
}

/// Isolate the next zero crossing of the polynomial anchored at a variable's
/// current `tX`, honoring §4.6's tangent guard: "If `|x(tX)| ≤ zTol`, treat
/// as an immediate tangent crossing (do not reschedule until the
/// polynomial's sign has moved away from zero by more than zTol)". Dispatch
/// to the matching order's root solver only once that guard has cleared;
/// the caller is expected to call this again after every requantization, so
/// the guard self-clears the next time `x0` has moved outside the band.
pub fn find_root(order: u8, x0: f64, x1: f64, x2: f64, x3: f64, z_tol: f64) -> Option<f64> {
    if x0.abs() <= z_tol {
        return None;
    }
    match order {
        1 => root_order1(x0, x1),
        2 => root_order2(x0, x1, x2),
        _ => root_order3(x0, x1, x2, x3),
    }
}

/// Smallest positive root of the depressed cubic solved from
/// `x0 + x1*tau + x2*tau^2 + x3*tau^3` (§4.6).
pub fn root_order3(x0: f64, x1: f64, x2: f64, x3: f64) -> Option<f64> {
    if x3 == 0.0 {
        return root_order2(x0, x1, x2);
    }
    // Normalize to tau^3 + a2*tau^2 + a1*tau + a0 = 0.
    let a2 = x2 / x3;
    let a1 = x1 / x3;
    let a0 = x0 / x3;

    // Depress: tau = y - a2/3.
    let shift = a2 / 3.0;
    let p = a1 - a2 * a2 / 3.0;
    let q = 2.0 * a2 * a2 * a2 / 27.0 - a2 * a1 / 3.0 + a0;

    let roots_y: Vec<f64> = {
        let disc = (q * q) / 4.0 + (p * p * p) / 27.0;
        if disc > 1.0e-300 {
            // One real root (Cardano).
            let sqrt_disc = disc.sqrt();
            let u = (-q / 2.0 + sqrt_disc).cbrt();
            let v = (-q / 2.0 - sqrt_disc).cbrt();
            vec![u + v]
        } else if disc.abs() <= 1.0e-300 {
            // Triple/double root.
            let u = (-q / 2.0).cbrt();
            vec![2.0 * u, -u]
        } else {
            // Three real roots (trigonometric form).
            let r = (-(p * p * p) / 27.0).sqrt();
            let phi = (-q / (2.0 * r)).clamp(-1.0, 1.0).acos();
            let m = 2.0 * (-p / 3.0).sqrt();
            vec![
                m * (phi / 3.0).cos(),
                m * ((phi + 2.0 * PI) / 3.0).cos(),
                m * ((phi + 4.0 * PI) / 3.0).cos(),
            ]
        }
    };

    smallest_positive(roots_y.into_iter().map(|y| y - shift))
}
