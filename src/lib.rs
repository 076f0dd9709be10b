// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! An anisotropic eikonal solver for seismic traveltimes.
//!
//! This library computes first-arrival traveltimes of quasi-P waves in 2D
//! elastic media, possibly tilted and following a topography, by Fast
//! Marching over adaptive (Lagrangian) stencils with a semi-Lagrangian
//! Hopf-Lax update. Source singularities are handled by static or dynamic
//! factoring. Norm derivatives are obtained by forward automatic
//! differentiation with dual numbers.

#![warn(missing_docs)]

/// Grid, index and flow types.
pub mod core;
/// Dual numbers for forward automatic differentiation.
pub mod dual;
/// Error types for the library.
pub mod error;
/// Source factoring.
pub mod factoring;
/// Seismic norms and metric sources.
pub mod norm;
/// Fast marching driver.
pub mod scheduler;
/// Lagrangian stencils and the Hopf-Lax update.
pub mod stencil;
/// Scalar minimization kernels and the isotropic reference update.
pub mod update_kernels;

pub use crate::core::{DiscreteFlow, FlowElement, PeriodicGrid};
pub use crate::error::{EikonalError, Result};
pub use crate::factoring::{Factoring, FactoringConfig, FactoringMethod, FactoringPointChoice};
pub use crate::norm::{HookeTensor, MetricElement, Norm, UniformMetric};
pub use crate::scheduler::{FastMarching, ProgressInfo, Solution};
pub use crate::stencil::{LagrangianStencil, StencilConfig, VertexCache};
