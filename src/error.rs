// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use thiserror::Error;

/// Errors reported while configuring a domain, a stencil, factoring or a solve.
///
/// Every variant is a setup-time condition: the per-point sweep never fails.
#[derive(Debug, Error)]
pub enum EikonalError {
    /// Grid shape is invalid (dimension too small).
    #[error("invalid grid shape: axis {axis} has size {size} (must be >= 2)")]
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Grid spacing is not positive and finite.
    #[error("invalid grid spacing: {0} (must be positive and finite)")]
    InvalidGridSpacing(f64),
    /// Array shape does not match the grid shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// Seed location is invalid (outside domain, inside a wall).
    #[error("invalid seed at {coord:?}: {reason}")]
    InvalidSeed {
        /// The seed coordinates.
        coord: Vec<f64>,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Factoring center lies outside the domain.
    #[error("invalid factoring center at {point:?}: {reason}")]
    InvalidCenter {
        /// Center position, in grid units.
        point: Vec<f64>,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Factoring radius is negative or not finite.
    #[error("invalid factoring radius: {0} (must be non-negative and finite)")]
    InvalidFactoringRadius(f64),
    /// Stencil refinement threshold outside (-1, 1).
    #[error("invalid stencil cosine threshold: {0} (must lie in (-1, 1))")]
    InvalidCosAngle(f64),
    /// Stencil refinement cap too small to hold the base stencil.
    #[error("invalid stencil size cap: {0} (must be >= 4)")]
    InvalidStencilCap(usize),
    /// Generic error with a message.
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results with EikonalError.
pub type Result<T> = std::result::Result<T, EikonalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_grid_shape() {
        let e = EikonalError::InvalidGridShape { axis: 0, size: 1 };
        assert_eq!(
            e.to_string(),
            "invalid grid shape: axis 0 has size 1 (must be >= 2)"
        );
    }

    #[test]
    fn display_invalid_grid_spacing() {
        let e = EikonalError::InvalidGridSpacing(-1.0);
        assert_eq!(
            e.to_string(),
            "invalid grid spacing: -1 (must be positive and finite)"
        );
    }

    #[test]
    fn display_shape_mismatch() {
        let e = EikonalError::ShapeMismatch {
            expected: vec![4, 4],
            got: vec![4, 5],
        };
        assert_eq!(e.to_string(), "shape mismatch: expected [4, 4], got [4, 5]");
    }

    #[test]
    fn display_invalid_center() {
        let e = EikonalError::InvalidCenter {
            point: vec![-3.0, 2.0],
            reason: "outside domain".to_string(),
        };
        assert!(e.to_string().contains("-3.0"));
        assert!(e.to_string().contains("outside domain"));
    }

    #[test]
    fn display_invalid_radius() {
        let e = EikonalError::InvalidFactoringRadius(f64::NAN);
        assert_eq!(
            e.to_string(),
            "invalid factoring radius: NaN (must be non-negative and finite)"
        );
    }

    #[test]
    fn display_invalid_cos_angle() {
        let e = EikonalError::InvalidCosAngle(1.5);
        assert!(e.to_string().contains("1.5"));
    }
}
