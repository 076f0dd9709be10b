// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Seismic anisotropic norms.
//!
//! The local travel cost is the norm dual to the quasi-P slowness of an
//! elastic medium: given the (density normalized) Hooke tensor `c`, the
//! slowness surface is `{p : λ_max(M(p)) = 1}` with the Christoffel matrix
//! `M_ik(p) = Σ c_ijkl p_j p_l`. The dual norm is `N*(p) = sqrt(λ_max(M(p)))`
//! and the travel cost of a displacement `v` is `N(v) = max {<p, v> : N*(p) <= 1}`.

use std::f64::consts::FRAC_PI_2;

use ndarray::Array2;

use crate::core::{dot, Index, Vector};
use crate::dual::Dual;
use crate::update_kernels::false_position;

/// Voigt index of the symmetric pair `(i, j)`: xx -> 0, zz -> 1, xz -> 2.
const VOIGT: [[usize; 2]; 2] = [[0, 2], [2, 1]];

/// Hooke tensor of a 2D elastic medium, in Voigt notation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HookeTensor {
    c: [[f64; 3]; 3],
}

impl HookeTensor {
    /// Tensor from its symmetric Voigt matrix.
    pub fn new(c: [[f64; 3]; 3]) -> Self {
        HookeTensor { c }
    }

    /// Isotropic medium from the Lamé coefficients.
    pub fn from_lame(lambda: f64, mu: f64) -> Self {
        let l2m = lambda + 2.0 * mu;
        HookeTensor::new([[l2m, lambda, 0.0], [lambda, l2m, 0.0], [0.0, 0.0, mu]])
    }

    /// Isotropic medium whose qP waves travel at `speed`.
    pub fn isotropic(speed: f64) -> Self {
        HookeTensor::from_lame(0.0, 0.5 * speed * speed)
    }

    /// Vertically transverse isotropic medium, axis 1 being the symmetry axis.
    pub fn vti(c11: f64, c33: f64, c13: f64, c44: f64) -> Self {
        HookeTensor::new([[c11, c13, 0.0], [c13, c33, 0.0], [0.0, 0.0, c44]])
    }

    /// Voigt matrix.
    pub fn coefficients(&self) -> [[f64; 3]; 3] {
        self.c
    }

    #[inline]
    fn full(&self, i: usize, j: usize, k: usize, l: usize) -> f64 {
        self.c[VOIGT[i][j]][VOIGT[k][l]]
    }

    /// Tensor multiplied by `k`.
    pub fn scaled(&self, k: f64) -> Self {
        let mut c = self.c;
        for row in c.iter_mut() {
            for x in row.iter_mut() {
                *x *= k;
            }
        }
        HookeTensor { c }
    }

    /// Medium rotated counter-clockwise by `angle` radians.
    pub fn rotated(&self, angle: f64) -> Self {
        let (s, co) = angle.sin_cos();
        let r = [[co, -s], [s, co]];
        let mut out = [[0.0; 3]; 3];
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    for l in 0..2 {
                        let mut acc = 0.0;
                        for a in 0..2 {
                            for b in 0..2 {
                                for c in 0..2 {
                                    for d in 0..2 {
                                        acc += r[i][a] * r[j][b] * r[k][c] * r[l][d]
                                            * self.full(a, b, c, d);
                                    }
                                }
                            }
                        }
                        out[VOIGT[i][j]][VOIGT[k][l]] = acc;
                    }
                }
            }
        }
        HookeTensor { c: out }
    }

    /// Christoffel matrix `M_ik(p) = Σ_jl c_ijkl p_j p_l`.
    pub fn christoffel<const M: usize>(&self, p: [Dual<M>; 2]) -> [[Dual<M>; 2]; 2] {
        let mut m = [[Dual::constant(0.0); 2]; 2];
        for (i, row) in m.iter_mut().enumerate() {
            for (k, entry) in row.iter_mut().enumerate() {
                for j in 0..2 {
                    for l in 0..2 {
                        let c = self.full(i, j, k, l);
                        if c != 0.0 {
                            *entry += p[j] * p[l] * c;
                        }
                    }
                }
            }
        }
        m
    }
}

/// Travel cost dual to the quasi-P slowness of a Hooke tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeismicNorm {
    hooke: HookeTensor,
}

impl SeismicNorm {
    /// Norm of the given medium.
    pub fn new(hooke: HookeTensor) -> Self {
        SeismicNorm { hooke }
    }

    /// Underlying Hooke tensor.
    pub fn hooke(&self) -> &HookeTensor {
        &self.hooke
    }

    /// `sqrt(λ_max(M(p)))`.
    pub fn dual_norm_ad<const M: usize>(&self, p: [Dual<M>; 2]) -> Dual<M> {
        let m = self.hooke.christoffel(p);
        let tr = m[0][0] + m[1][1];
        let diff = m[0][0] - m[1][1];
        let disc = (diff * diff + m[0][1] * m[0][1] * 4.0).sqrt();
        ((tr + disc) * 0.5).sqrt()
    }

    /// Dual norm of a covector.
    pub fn dual_norm(&self, p: Vector) -> f64 {
        self.dual_norm_ad::<0>([Dual::constant(p[0]), Dual::constant(p[1])])
            .value()
    }

    /// Point of the unit dual sphere maximizing `<p, v>`, which is also the
    /// gradient of the norm at `v`.
    fn maximizer(&self, v: Vector) -> Vector {
        // Along the dual sphere, θ -> <u(θ), v> / N*(u(θ)) is unimodal on the
        // half circle facing v, increasing then decreasing.
        let slope = |theta: f64| -> f64 {
            let t = Dual::<1>::variable(theta, 0);
            let u = [t.cos(), t.sin()];
            let g = (u[0] * v[0] + u[1] * v[1]) / self.dual_norm_ad(u);
            g.v[0]
        };
        let theta_v = v[1].atan2(v[0]);
        let (a, b) = (theta_v - FRAC_PI_2, theta_v + FRAC_PI_2);
        let (fa, fb) = (slope(a), slope(b));
        let theta = false_position(slope, a, b, fa, fb);
        let u = [theta.cos(), theta.sin()];
        let n = self.dual_norm(u);
        [u[0] / n, u[1] / n]
    }

    /// Norm with its derivatives. The zero vector has norm zero and a zero
    /// gradient.
    pub fn norm_ad<const M: usize>(&self, v: [Dual<M>; 2]) -> Dual<M> {
        let vs = [v[0].value(), v[1].value()];
        if vs[0] == 0.0 && vs[1] == 0.0 {
            return Dual::constant(0.0);
        }
        // Envelope theorem: at the maximizer, d<p*, v> = <p*, dv>.
        let p = self.maximizer(vs);
        v[0] * p[0] + v[1] * p[1]
    }
}

/// Linear change of coordinates following a topography: the second
/// (vertical) component is sheared by `<slope, v>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopographicTransform {
    slope: Vector,
}

impl TopographicTransform {
    /// Shear with the given slope. `slope[1]` must differ from -1.
    pub fn new(slope: Vector) -> Self {
        TopographicTransform { slope }
    }

    /// Slope vector.
    pub fn slope(&self) -> Vector {
        self.slope
    }

    /// `J v`.
    pub fn apply<const M: usize>(&self, v: [Dual<M>; 2]) -> [Dual<M>; 2] {
        [v[0], v[1] + v[0] * self.slope[0] + v[1] * self.slope[1]]
    }

    /// `J^{-T} p`.
    pub fn pull_covector(&self, p: Vector) -> Vector {
        let q1 = p[1] / (1.0 + self.slope[1]);
        [p[0] - self.slope[0] * q1, q1]
    }
}

/// Anisotropic norm of a physical model, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Norm {
    /// Seismic norm of a Hooke tensor.
    Seismic(SeismicNorm),
    /// Seismic norm composed with a topographic transform.
    Topographic(SeismicNorm, TopographicTransform),
}

/// Approximation of the distance from a point, used to initialize and to
/// factor the solution. Equal to the local norm.
pub type DistanceGuess = Norm;

impl Norm {
    /// Euclidean norm divided by `speed`.
    pub fn isotropic(speed: f64) -> Self {
        Norm::Seismic(SeismicNorm::new(HookeTensor::isotropic(speed)))
    }

    /// Norm with its derivatives.
    pub fn norm_ad<const M: usize>(&self, v: [Dual<M>; 2]) -> Dual<M> {
        match self {
            Norm::Seismic(n) => n.norm_ad(v),
            Norm::Topographic(n, t) => n.norm_ad(t.apply(v)),
        }
    }

    /// Travel cost of the displacement `v`.
    pub fn norm(&self, v: Vector) -> f64 {
        self.norm_ad::<0>([Dual::constant(v[0]), Dual::constant(v[1])])
            .value()
    }

    /// Norm and gradient at `v`.
    pub fn norm_and_gradient(&self, v: Vector) -> (f64, Vector) {
        let n = self.norm_ad::<2>([Dual::variable(v[0], 0), Dual::variable(v[1], 1)]);
        (n.value(), n.gradient())
    }

    /// Gradient at `v`.
    pub fn gradient(&self, v: Vector) -> Vector {
        self.norm_and_gradient(v).1
    }

    /// Dual norm of the covector `p`.
    pub fn dual_norm(&self, p: Vector) -> f64 {
        match self {
            Norm::Seismic(n) => n.dual_norm(p),
            Norm::Topographic(n, t) => n.dual_norm(t.pull_covector(p)),
        }
    }

    /// Cosine of the angle between `u` and `v` measured by the norm,
    /// symmetrized. Equals the Euclidean cosine for isotropic norms.
    pub fn cos_angle(&self, u: Vector, v: Vector) -> f64 {
        let (nu, gu) = self.norm_and_gradient(u);
        let (nv, gv) = self.norm_and_gradient(v);
        (dot(gu, v) / nv).min(dot(gv, u) / nu)
    }

    /// Whether the norm is finite and positive along the axes.
    pub fn is_valid(&self) -> bool {
        [[1.0, 0.0], [0.0, 1.0]].iter().all(|&e| {
            let n = self.norm(e);
            n.is_finite() && n > 0.0
        })
    }
}

/// Raw physical data of a model at one grid point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricElement {
    /// Hooke tensor.
    Seismic(HookeTensor),
    /// Hooke tensor and topography slope.
    Topographic(HookeTensor, Vector),
}

impl MetricElement {
    /// Norm in grid units: the tensor is rescaled by `1/h²`, so that the
    /// norm of an offset is a travel time.
    pub fn make_norm(&self, h: f64) -> Norm {
        let k = 1.0 / (h * h);
        match self {
            MetricElement::Seismic(c) => Norm::Seismic(SeismicNorm::new(c.scaled(k))),
            MetricElement::Topographic(c, slope) => Norm::Topographic(
                SeismicNorm::new(c.scaled(k)),
                TopographicTransform::new(*slope),
            ),
        }
    }
}

/// Array-like lookup of metric elements by grid index.
pub trait MetricSource {
    /// Element at `index`.
    fn element(&self, index: Index) -> MetricElement;

    /// Shape of the underlying array, if any.
    fn shape(&self) -> Option<[usize; 2]> {
        None
    }
}

/// The same element everywhere.
#[derive(Debug, Clone, Copy)]
pub struct UniformMetric(pub MetricElement);

impl MetricSource for UniformMetric {
    fn element(&self, _index: Index) -> MetricElement {
        self.0
    }
}

impl MetricSource for Array2<MetricElement> {
    fn element(&self, index: Index) -> MetricElement {
        self[index]
    }

    fn shape(&self) -> Option<[usize; 2]> {
        let (n0, n1) = self.dim();
        Some([n0, n1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tilted() -> Norm {
        Norm::Seismic(SeismicNorm::new(
            HookeTensor::vti(15.0, 10.0, 4.0, 3.0).rotated(0.4),
        ))
    }

    #[test]
    fn isotropic_norm_is_scaled_euclidean() {
        let n = Norm::isotropic(2.0);
        assert!((n.norm([3.0, 4.0]) - 2.5).abs() < 1e-12);
        let g = n.gradient([3.0, 4.0]);
        assert!((g[0] - 0.3).abs() < 1e-12);
        assert!((g[1] - 0.4).abs() < 1e-12);
        assert!((n.dual_norm([3.0, 4.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn zero_vector_policy() {
        let n = tilted();
        assert_eq!(n.norm([0.0, 0.0]), 0.0);
        assert_eq!(n.gradient([0.0, 0.0]), [0.0, 0.0]);
    }

    #[test]
    fn vti_axis_speeds() {
        let n = Norm::Seismic(SeismicNorm::new(HookeTensor::vti(16.0, 9.0, 2.0, 3.0)));
        assert!((n.norm([1.0, 0.0]) - 0.25).abs() < 1e-12);
        assert!((n.norm([0.0, 1.0]) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn rotation_by_right_angle_swaps_axes() {
        let base = HookeTensor::vti(16.0, 9.0, 2.0, 3.0);
        let n = Norm::Seismic(SeismicNorm::new(base.rotated(FRAC_PI_2)));
        assert!((n.norm([0.0, 1.0]) - 0.25).abs() < 1e-10);
        assert!((n.norm([1.0, 0.0]) - 1.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn rotation_matches_rotated_argument() {
        let angle: f64 = 0.4;
        let n0 = Norm::Seismic(SeismicNorm::new(HookeTensor::vti(15.0, 10.0, 4.0, 3.0)));
        let n = tilted();
        let (s, c) = angle.sin_cos();
        for v in [[1.0, 0.0], [0.3, -2.0], [-1.0, 1.0]] {
            // N_rot(v) = N(R^T v)
            let back = [c * v[0] + s * v[1], -s * v[0] + c * v[1]];
            assert!((n.norm(v) - n0.norm(back)).abs() < 1e-10, "v={:?}", v);
        }
    }

    #[test]
    fn gradient_lies_on_unit_dual_sphere() {
        let n = tilted();
        for v in [[1.0, 0.0], [1.0, 1.0], [-2.0, 0.5], [0.1, -3.0]] {
            let (value, g) = n.norm_and_gradient(v);
            assert!((n.dual_norm(g) - 1.0).abs() < 1e-10);
            assert!((dot(g, v) - value).abs() < 1e-10);
        }
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let n = tilted();
        let v = [0.7, -1.3];
        let g = n.gradient(v);
        let eps = 1e-6;
        for d in 0..2 {
            let mut vp = v;
            let mut vm = v;
            vp[d] += eps;
            vm[d] -= eps;
            let fd = (n.norm(vp) - n.norm(vm)) / (2.0 * eps);
            assert!((g[d] - fd).abs() < 1e-6, "axis {}: ad={} fd={}", d, g[d], fd);
        }
    }

    #[test]
    fn homogeneous_and_subadditive() {
        let n = tilted();
        let u = [1.0, 2.0];
        let v = [-3.0, 0.5];
        assert!((n.norm([2.0, 4.0]) - 2.0 * n.norm(u)).abs() < 1e-10);
        let w = [u[0] + v[0], u[1] + v[1]];
        assert!(n.norm(w) <= n.norm(u) + n.norm(v) + 1e-12);
    }

    #[test]
    fn topographic_composition() {
        let base = HookeTensor::vti(15.0, 10.0, 4.0, 3.0);
        let flat = MetricElement::Topographic(base, [0.0, 0.0]).make_norm(1.0);
        let plain = MetricElement::Seismic(base).make_norm(1.0);
        assert!((flat.norm([1.0, 2.0]) - plain.norm([1.0, 2.0])).abs() < 1e-12);

        let slope = [0.5, 0.2];
        let sheared = MetricElement::Topographic(base, slope).make_norm(1.0);
        let v = [1.0, 2.0];
        let jv = [v[0], v[1] + slope[0] * v[0] + slope[1] * v[1]];
        assert!((sheared.norm(v) - plain.norm(jv)).abs() < 1e-12);

        let g = sheared.gradient([0.3, -0.8]);
        assert!((sheared.dual_norm(g) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn make_norm_rescales_by_spacing() {
        let n = MetricElement::Seismic(HookeTensor::isotropic(3.0)).make_norm(0.5);
        // One step of length sqrt(2) at spacing 0.5 and speed 3.
        assert!((n.norm([1.0, 1.0]) - 0.5 * 2f64.sqrt() / 3.0).abs() < 1e-12);
    }

    #[test]
    fn cos_angle_isotropic() {
        let n = Norm::isotropic(1.0);
        assert!(n.cos_angle([1.0, 0.0], [0.0, 1.0]).abs() < 1e-12);
        assert!((n.cos_angle([1.0, 0.0], [1.0, 1.0]) - 0.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn metric_sources() {
        let e = MetricElement::Seismic(HookeTensor::isotropic(1.0));
        assert_eq!(UniformMetric(e).element([3, 4]), e);
        assert_eq!(UniformMetric(e).shape(), None);

        let mut arr = Array2::from_elem((3, 4), e);
        let e2 = MetricElement::Seismic(HookeTensor::isotropic(2.0));
        arr[[1, 2]] = e2;
        assert_eq!(arr.element([1, 2]), e2);
        assert_eq!(MetricSource::shape(&arr), Some([3, 4]));
    }

    #[test]
    fn validity() {
        assert!(tilted().is_valid());
        let broken = Norm::Seismic(SeismicNorm::new(HookeTensor::new([[0.0; 3]; 3])));
        assert!(!broken.is_valid());
    }
}
