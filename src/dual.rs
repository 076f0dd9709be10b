// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Forward-mode automatic differentiation with dual numbers.
//!
//! A [`Dual<N>`] carries a scalar together with its gradient with respect to
//! `N` seeded variables. Arithmetic and the elementary functions below apply
//! the chain rule to the gradient part. Comparisons only look at the scalar.

use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Scalar value paired with its gradient.
#[derive(Debug, Clone, Copy)]
pub struct Dual<const N: usize> {
    /// Scalar part.
    pub s: f64,
    /// Gradient part.
    pub v: [f64; N],
}

impl<const N: usize> Dual<N> {
    /// A constant: zero gradient.
    #[inline]
    pub fn constant(s: f64) -> Self {
        Dual { s, v: [0.0; N] }
    }

    /// The `i`-th independent variable, with value `s`.
    #[inline]
    pub fn variable(s: f64, i: usize) -> Self {
        debug_assert!(i < N, "variable index {} out of range for Dual<{}>", i, N);
        let mut v = [0.0; N];
        v[i] = 1.0;
        Dual { s, v }
    }

    /// Scalar part.
    #[inline]
    pub fn value(&self) -> f64 {
        self.s
    }

    /// Gradient part.
    #[inline]
    pub fn gradient(&self) -> [f64; N] {
        self.v
    }

    #[inline]
    fn scale_grad(&self, k: f64) -> [f64; N] {
        let mut v = self.v;
        for g in v.iter_mut() {
            *g *= k;
        }
        v
    }

    /// Square root. Non-positive square roots yield zero with zero gradient
    /// instead of an infinite slope.
    pub fn sqrt(self) -> Self {
        let ss = self.s.sqrt();
        if ss > 0.0 {
            Dual {
                s: ss,
                v: self.scale_grad(0.5 / ss),
            }
        } else {
            Dual::constant(0.0)
        }
    }

    /// Absolute value.
    pub fn fabs(self) -> Self {
        if self.s >= 0.0 {
            self
        } else {
            -self
        }
    }

    /// Power with a constant exponent.
    pub fn powf(self, p: f64) -> Self {
        let xp = self.s.powf(p - 1.0);
        Dual {
            s: xp * self.s,
            v: self.scale_grad(p * xp),
        }
    }

    /// Sine.
    pub fn sin(self) -> Self {
        Dual {
            s: self.s.sin(),
            v: self.scale_grad(self.s.cos()),
        }
    }

    /// Cosine.
    pub fn cos(self) -> Self {
        Dual {
            s: self.s.cos(),
            v: self.scale_grad(-self.s.sin()),
        }
    }

    /// `self` if its scalar is below `s`, else the constant `s`.
    pub fn min(self, s: f64) -> Self {
        if self.s < s {
            self
        } else {
            Dual::constant(s)
        }
    }
}

impl<const N: usize> From<f64> for Dual<N> {
    fn from(s: f64) -> Self {
        Dual::constant(s)
    }
}

impl<const N: usize> Default for Dual<N> {
    fn default() -> Self {
        Dual::constant(0.0)
    }
}

// Compound assignment

impl<const N: usize> AddAssign for Dual<N> {
    fn add_assign(&mut self, y: Self) {
        self.s += y.s;
        for (a, b) in self.v.iter_mut().zip(y.v) {
            *a += b;
        }
    }
}

impl<const N: usize> SubAssign for Dual<N> {
    fn sub_assign(&mut self, y: Self) {
        self.s -= y.s;
        for (a, b) in self.v.iter_mut().zip(y.v) {
            *a -= b;
        }
    }
}

impl<const N: usize> MulAssign for Dual<N> {
    fn mul_assign(&mut self, y: Self) {
        for (a, b) in self.v.iter_mut().zip(y.v) {
            *a = *a * y.s + b * self.s;
        }
        self.s *= y.s;
    }
}

impl<const N: usize> DivAssign for Dual<N> {
    fn div_assign(&mut self, y: Self) {
        let inv = 1.0 / y.s;
        for (a, b) in self.v.iter_mut().zip(y.v) {
            *a = *a * inv - b * self.s * inv * inv;
        }
        self.s *= inv;
    }
}

impl<const N: usize> AddAssign<f64> for Dual<N> {
    fn add_assign(&mut self, t: f64) {
        self.s += t;
    }
}

impl<const N: usize> SubAssign<f64> for Dual<N> {
    fn sub_assign(&mut self, t: f64) {
        self.s -= t;
    }
}

impl<const N: usize> MulAssign<f64> for Dual<N> {
    fn mul_assign(&mut self, t: f64) {
        self.s *= t;
        for a in self.v.iter_mut() {
            *a *= t;
        }
    }
}

impl<const N: usize> DivAssign<f64> for Dual<N> {
    fn div_assign(&mut self, t: f64) {
        self.s /= t;
        for a in self.v.iter_mut() {
            *a /= t;
        }
    }
}

// Binary operators, derived from the compound forms

macro_rules! dual_binop {
    ($tr:ident, $method:ident, $assign:ident) => {
        impl<const N: usize> $tr for Dual<N> {
            type Output = Dual<N>;
            #[inline]
            fn $method(mut self, y: Dual<N>) -> Dual<N> {
                self.$assign(y);
                self
            }
        }

        impl<const N: usize> $tr<f64> for Dual<N> {
            type Output = Dual<N>;
            #[inline]
            fn $method(mut self, t: f64) -> Dual<N> {
                self.$assign(t);
                self
            }
        }
    };
}

dual_binop!(Add, add, add_assign);
dual_binop!(Sub, sub, sub_assign);
dual_binop!(Mul, mul, mul_assign);
dual_binop!(Div, div, div_assign);

impl<const N: usize> Add<Dual<N>> for f64 {
    type Output = Dual<N>;
    fn add(self, y: Dual<N>) -> Dual<N> {
        y + self
    }
}

impl<const N: usize> Sub<Dual<N>> for f64 {
    type Output = Dual<N>;
    fn sub(self, y: Dual<N>) -> Dual<N> {
        -(y - self)
    }
}

impl<const N: usize> Mul<Dual<N>> for f64 {
    type Output = Dual<N>;
    fn mul(self, y: Dual<N>) -> Dual<N> {
        y * self
    }
}

impl<const N: usize> Div<Dual<N>> for f64 {
    type Output = Dual<N>;
    fn div(self, y: Dual<N>) -> Dual<N> {
        Dual::constant(self) / y
    }
}

impl<const N: usize> Neg for Dual<N> {
    type Output = Dual<N>;
    fn neg(self) -> Dual<N> {
        self * -1.0
    }
}

// Only the scalar parts are compared.

impl<const N: usize> PartialEq for Dual<N> {
    fn eq(&self, other: &Self) -> bool {
        self.s == other.s
    }
}

impl<const N: usize> PartialOrd for Dual<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.s.partial_cmp(&other.s)
    }
}

impl<const N: usize> PartialEq<f64> for Dual<N> {
    fn eq(&self, other: &f64) -> bool {
        self.s == *other
    }
}

impl<const N: usize> PartialOrd<f64> for Dual<N> {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.s.partial_cmp(other)
    }
}
