// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{EikonalError, Result};

/// Discrete grid position.
pub type Index = [usize; 2];
/// Small integer displacement between grid points.
pub type Offset = [i32; 2];
/// Continuous position. Unless stated otherwise, in grid units.
pub type Point = [f64; 2];
/// Continuous displacement.
pub type Vector = [f64; 2];

/// Converts an offset to a floating point vector.
#[inline]
pub fn offset_vector(e: Offset) -> Vector {
    [e[0] as f64, e[1] as f64]
}

#[inline]
pub(crate) fn dot(a: Vector, b: Vector) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

#[inline]
pub(crate) fn euclidean(a: Vector) -> f64 {
    dot(a, a).sqrt()
}

/// One step of a discrete flow: an offset and the weight attached to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowElement {
    /// Displacement from the updated point to the neighbor.
    pub offset: Offset,
    /// Neighbor arrival time before a recompute, flow weight after it.
    pub weight: f64,
}

/// How a value was obtained from its neighbors.
pub type DiscreteFlow = Vec<FlowElement>;

/// Periodic images crossed when going from a grid point to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainTransform {
    periods: [i64; 2],
}

impl DomainTransform {
    /// Number of periods added along each axis.
    pub fn periods(&self) -> [i64; 2] {
        self.periods
    }

    /// Image of `p` under this transform on a grid of the given shape.
    pub fn apply(&self, p: Point, shape: [usize; 2]) -> Point {
        [
            p[0] + (self.periods[0] * shape[0] as i64) as f64,
            p[1] + (self.periods[1] * shape[1] as i64) as f64,
        ]
    }
}

/// A 2D Cartesian grid, optionally periodic along each axis.
///
/// Positions handed to the solver are physical; internally everything is
/// expressed in grid units, `(x - origin) / h`.
#[derive(Debug, Clone)]
pub struct PeriodicGrid {
    shape: [usize; 2],
    strides: [usize; 2],
    h: f64,
    origin: Point,
    periodic: [bool; 2],
}

impl PeriodicGrid {
    /// Create a grid with the given shape and spacing.
    ///
    /// # Errors
    /// Returns an error if a dimension is smaller than 2 or `h` is not
    /// positive and finite.
    pub fn new(shape: [usize; 2], h: f64) -> Result<Self> {
        if !h.is_finite() || h <= 0.0 {
            return Err(EikonalError::InvalidGridSpacing(h));
        }
        for (axis, &size) in shape.iter().enumerate() {
            if size < 2 {
                return Err(EikonalError::InvalidGridShape { axis, size });
            }
        }
        Ok(PeriodicGrid {
            shape,
            strides: [shape[1], 1],
            h,
            origin: [0.0, 0.0],
            periodic: [false, false],
        })
    }

    /// Physical position of the grid point `[0, 0]` (builder method).
    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    /// Periodic boundary conditions per axis (builder method).
    pub fn with_periodic(mut self, periodic: [bool; 2]) -> Self {
        self.periodic = periodic;
        self
    }

    /// Number of nodes along each axis.
    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    /// Uniform grid spacing.
    pub fn grid_spacing(&self) -> f64 {
        self.h
    }

    /// Physical position of the first node.
    pub fn origin(&self) -> Point {
        self.origin
    }

    /// Periodicity flags.
    pub fn periodic(&self) -> [bool; 2] {
        self.periodic
    }

    /// Total number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.shape[0] * self.shape[1]
    }

    /// Row-major flat index.
    #[inline]
    pub fn nd_to_flat(&self, idx: Index) -> usize {
        idx[0] * self.strides[0] + idx[1] * self.strides[1]
    }

    /// Inverse of [`nd_to_flat`](Self::nd_to_flat).
    #[inline]
    pub fn flat_to_nd(&self, flat: usize) -> Index {
        [flat / self.strides[0], flat % self.strides[0]]
    }

    /// `index + offset`, wrapped on periodic axes. `None` when it leaves the
    /// domain through a non-periodic boundary.
    pub fn neighbor(&self, index: Index, offset: Offset) -> Option<Index> {
        let mut out = [0usize; 2];
        for d in 0..2 {
            let n = self.shape[d] as i64;
            let v = index[d] as i64 + offset[d] as i64;
            out[d] = if self.periodic[d] {
                v.rem_euclid(n) as usize
            } else if (0..n).contains(&v) {
                v as usize
            } else {
                return None;
            };
        }
        Some(out)
    }

    /// Grid-unit position of a physical point.
    pub fn adimensionalize(&self, x: Point) -> Point {
        [
            (x[0] - self.origin[0]) / self.h,
            (x[1] - self.origin[1]) / self.h,
        ]
    }

    /// Whether a grid-unit position lies inside the domain.
    pub fn contains_point(&self, p: Point) -> bool {
        (0..2).all(|d| {
            let upper = if self.periodic[d] {
                self.shape[d] as f64
            } else {
                (self.shape[d] - 1) as f64
            };
            p[d].is_finite() && p[d] >= 0.0 && (p[d] < upper || (!self.periodic[d] && p[d] == upper))
        })
    }

    /// Grid point closest to a grid-unit position, `None` outside the domain.
    pub fn nearest_index(&self, p: Point) -> Option<Index> {
        if !self.contains_point(p) {
            return None;
        }
        let mut idx = [0usize; 2];
        for d in 0..2 {
            let r = p[d].round() as usize;
            idx[d] = if self.periodic[d] {
                r % self.shape[d]
            } else {
                r.min(self.shape[d] - 1)
            };
        }
        Some(idx)
    }

    /// Transform bringing `target` to its periodic image closest to `from`.
    pub fn transform_towards(&self, from: Index, target: Point) -> DomainTransform {
        let mut periods = [0i64; 2];
        for d in 0..2 {
            if self.periodic[d] {
                let n = self.shape[d] as f64;
                periods[d] = -((target[d] - from[d] as f64) / n).round() as i64;
            }
        }
        DomainTransform { periods }
    }

    /// Vector from `from` to the closest periodic image of `target`, with the
    /// transform used to reach that image.
    pub fn vector_towards(&self, from: Index, target: Point) -> (Vector, DomainTransform) {
        let transform = self.transform_towards(from, target);
        let image = transform.apply(target, self.shape);
        (
            [image[0] - from[0] as f64, image[1] - from[1] as f64],
            transform,
        )
    }

    /// Checks that an array has the grid's shape.
    pub(crate) fn check_shape(&self, dim: (usize, usize)) -> Result<()> {
        if [dim.0, dim.1] != self.shape {
            return Err(EikonalError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: vec![dim.0, dim.1],
            });
        }
        Ok(())
    }

    /// All grid indices in row-major order.
    pub fn indices(&self) -> impl Iterator<Item = Index> + '_ {
        (0..self.num_nodes()).map(move |flat| self.flat_to_nd(flat))
    }
}
