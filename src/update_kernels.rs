// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Scalar kernels shared by the norms and the Hopf-Lax update.

/// Relative tolerance of the one-dimensional root finder.
pub const ROOT_TOLERANCE: f64 = 1e-14;
/// Iteration cap of the one-dimensional root finder.
pub const MAX_ROOT_ITERATIONS: usize = 100;

/// Root of `f` in the bracket `[a, b]` by the Illinois variant of regula falsi.
///
/// `fa = f(a)` and `fb = f(b)` must have opposite signs. Convergence is
/// superlinear; the iteration stops on an exact zero, on a step below the
/// tolerance, or after [`MAX_ROOT_ITERATIONS`].
pub fn false_position<F: FnMut(f64) -> f64>(
    mut f: F,
    mut a: f64,
    mut b: f64,
    mut fa: f64,
    mut fb: f64,
) -> f64 {
    // Which end was replaced last: 1 for a, -1 for b.
    let mut side = 0i8;
    let mut prev = f64::NAN;
    for _ in 0..MAX_ROOT_ITERATIONS {
        let c = (a * fb - b * fa) / (fb - fa);
        if !c.is_finite() {
            return 0.5 * (a + b);
        }
        let fc = f(c);
        let tol = ROOT_TOLERANCE * (1.0 + c.abs());
        if fc == 0.0 || (c - prev).abs() <= tol || (b - a).abs() <= tol {
            return c;
        }
        prev = c;
        if (fc > 0.0) == (fb > 0.0) {
            b = c;
            fb = fc;
            if side == -1 {
                fa *= 0.5;
            }
            side = -1;
        } else {
            a = c;
            fa = fc;
            if side == 1 {
                fb *= 0.5;
            }
            side = 1;
        }
    }
    prev
}

/// Location of the minimum of a convex function over `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeMinimum {
    /// At `t = 0`.
    Start,
    /// At `t = 1`.
    End,
    /// At the given interior parameter.
    Interior(f64),
}

/// Minimize a convex function over `[0, 1]` given its derivative `slope` and
/// the derivative values `d0`, `d1` at the endpoints.
pub fn minimize_edge<F: FnMut(f64) -> f64>(slope: F, d0: f64, d1: f64) -> EdgeMinimum {
    if d0 >= 0.0 {
        EdgeMinimum::Start
    } else if d1 <= 0.0 {
        EdgeMinimum::End
    } else {
        EdgeMinimum::Interior(false_position(slope, 0.0, 1.0, d0, d1))
    }
}

/// Godunov upwind update of the isotropic eikonal equation on a Cartesian
/// grid: `((u-a)/h)^2 + ((u-b)/h)^2 = f^2`, with `a`, `b` the upwind
/// neighbor values along each axis and `f` the slowness.
///
/// Falls back to 1D update if the 2D discriminant is negative or result is invalid.
pub fn solve_2d(a: f64, b: f64, f: f64, h: f64) -> f64 {
    if a.is_infinite() && b.is_infinite() {
        return f64::INFINITY;
    }
    let fh = f * h;
    if a.is_infinite() {
        return b + fh;
    }
    if b.is_infinite() {
        return a + fh;
    }

    let diff = a - b;
    let disc = 2.0 * fh * fh - diff * diff;
    if disc >= 0.0 {
        let u = (a + b + disc.sqrt()) / 2.0;
        if u > a.max(b) {
            return u;
        }
    }

    a.min(b) + fh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn false_position_finds_simple_roots() {
        let r = false_position(|x| x * x - 2.0, 0.0, 2.0, -2.0, 2.0);
        assert!((r - 2f64.sqrt()).abs() < 1e-12);

        // Decreasing bracket.
        let r = false_position(|x| x.cos(), 0.0, 3.0, 1.0, 3f64.cos());
        assert!((r - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn false_position_handles_convex_functions() {
        // Plain regula falsi keeps one end fixed here.
        let f = |x: f64| x.exp() - 2.0;
        let r = false_position(f, 0.0, 3.0, f(0.0), f(3.0));
        assert!((r - 2f64.ln()).abs() < 1e-12, "r={}", r);
    }

    #[test]
    fn minimize_edge_cases() {
        // φ(t) = (t - 0.3)^2
        let m = minimize_edge(|t| 2.0 * (t - 0.3), -0.6, 1.4);
        match m {
            EdgeMinimum::Interior(t) => assert!((t - 0.3).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(minimize_edge(|t| t, 0.0, 1.0), EdgeMinimum::Start);
        assert_eq!(minimize_edge(|t| t - 2.0, -2.0, -1.0), EdgeMinimum::End);
    }

    #[test]
    fn solve_2d_known_case() {
        // u = (0+0+sqrt(2))/2 = sqrt(2)/2
        let u = solve_2d(0.0, 0.0, 1.0, 1.0);
        assert!((u - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-10);
    }

    #[test]
    fn solve_2d_1d_fallback_negative_discriminant() {
        let u = solve_2d(0.0, 100.0, 1.0, 1.0);
        assert!((u - 1.0).abs() < 1e-10);
    }

    #[test]
    fn solve_2d_infinite_neighbors() {
        assert!(solve_2d(f64::INFINITY, f64::INFINITY, 1.0, 1.0).is_infinite());
        let u = solve_2d(f64::INFINITY, 5.0, 1.0, 1.0);
        assert!((u - 6.0).abs() < 1e-10);
    }

    #[test]
    fn no_nan_produced() {
        let cases = [
            (0.0, 0.0, 1.0, 1.0),
            (1.0, 1.0, 1.0, 1.0),
            (f64::INFINITY, 0.0, 1.0, 1.0),
            (0.0, 0.0, 0.001, 0.001),
            (0.0, 0.0, 1000.0, 1.0),
        ];
        for (a, b, f, h) in cases {
            let u = solve_2d(a, b, f, h);
            assert!(!u.is_nan(), "NaN for solve_2d({}, {}, {}, {})", a, b, f, h);
        }
    }
}
