// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use ndarray::Array2;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::core::{DiscreteFlow, FlowElement, Index, Offset, Point};
use crate::error::{EikonalError, Result};
use crate::factoring::{Factoring, FactoringConfig};
use crate::norm::MetricSource;
use crate::stencil::{GradientCache, LagrangianStencil, NoCache};

/// Progress information passed to the optional callback.
pub struct ProgressInfo {
    /// Number of points accepted so far.
    pub accepted: usize,
    /// Current size of the trial heap.
    pub trial: usize,
    /// Elapsed time since the solve started.
    pub elapsed: Duration,
}

/// Counters gathered during a solve.
#[derive(Debug, Clone, Default)]
pub struct SolveStats {
    /// Points accepted.
    pub accepted: usize,
    /// Hopf-Lax updates computed.
    pub updates: usize,
    /// Updates whose neighbor values were factored.
    pub factored_updates: usize,
    /// Mean number of offsets per stencil.
    pub mean_stencil_size: f64,
    /// Largest stencil.
    pub max_stencil_size: usize,
    /// Wall clock time of the solve.
    pub elapsed: Duration,
}

/// Arrival times and geodesic flows.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Arrival time at every grid point, infinite where unreachable.
    pub values: Array2<f64>,
    /// Flow of every accepted point: stencil offsets and geodesic weights.
    /// Empty at seeds, walls and unreachable points.
    pub flows: Array2<DiscreteFlow>,
    /// Solve counters.
    pub stats: SolveStats,
}

impl Solution {
    /// Arrival time at `index`.
    pub fn value(&self, index: Index) -> f64 {
        self.values[index]
    }

    /// Geodesic flow at `index`.
    pub fn flow(&self, index: Index) -> &[FlowElement] {
        &self.flows[index]
    }
}

/// Fast marching solver over Lagrangian stencils, with optional source
/// factoring.
///
/// Stencils are built in parallel; the marching loop itself is sequential and
/// deterministic.
pub struct FastMarching<M, C = NoCache> {
    stencil: LagrangianStencil<M, C>,
    factoring: FactoringConfig,
    walls: Option<Array2<bool>>,
    seeds: Vec<Point>,
    num_threads: Option<usize>,
    progress_callback: Option<Box<dyn Fn(ProgressInfo) + Send + Sync>>,
}

impl<M, C> FastMarching<M, C>
where
    M: MetricSource + Sync,
    C: GradientCache + Sync,
{
    /// Create a solver for the given stencil, without seeds or factoring.
    pub fn new(stencil: LagrangianStencil<M, C>) -> Self {
        FastMarching {
            stencil,
            factoring: FactoringConfig::default(),
            walls: None,
            seeds: Vec::new(),
            num_threads: None,
            progress_callback: None,
        }
    }

    /// Set the factoring configuration (builder method).
    pub fn with_factoring(mut self, config: FactoringConfig) -> Self {
        self.factoring = config;
        self
    }

    /// Set the obstacle mask: `true` marks a wall (builder method).
    ///
    /// # Errors
    /// Returns an error if the mask does not have the grid's shape.
    pub fn with_walls(mut self, walls: Array2<bool>) -> Result<Self> {
        self.stencil.grid().check_shape(walls.dim())?;
        self.walls = Some(walls);
        Ok(self)
    }

    /// Set the number of threads used to build the stencils (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set a progress callback, invoked about every 500ms during the march
    /// (builder method).
    pub fn with_progress(mut self, callback: Box<dyn Fn(ProgressInfo) + Send + Sync>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Get a reference to the stencil.
    pub fn stencil(&self) -> &LagrangianStencil<M, C> {
        &self.stencil
    }

    /// Seeds added so far, in physical coordinates.
    pub fn seeds(&self) -> &[Point] {
        &self.seeds
    }

    /// Add a point source at the given physical coordinates.
    ///
    /// # Errors
    /// Returns an error if the seed is outside the domain or on a wall.
    pub fn add_seed(&mut self, point: Point) -> Result<()> {
        self.seed_index(point)?;
        self.seeds.push(point);
        Ok(())
    }

    fn seed_index(&self, point: Point) -> Result<Index> {
        let grid = self.stencil.grid();
        let p = grid.adimensionalize(point);
        let idx = grid.nearest_index(p).ok_or_else(|| EikonalError::InvalidSeed {
            coord: point.to_vec(),
            reason: format!("outside the domain of shape {:?}", grid.shape()),
        })?;
        if self.is_wall(idx) {
            return Err(EikonalError::InvalidSeed {
                coord: point.to_vec(),
                reason: format!("nearest grid point {:?} is a wall", idx),
            });
        }
        Ok(idx)
    }

    fn is_wall(&self, idx: Index) -> bool {
        self.walls.as_ref().map_or(false, |w| w[idx])
    }

    fn get_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    fn build_stencils(&self) -> Result<Vec<Vec<Offset>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.get_num_threads())
            .build()
            .map_err(|e| EikonalError::Other(e.to_string()))?;
        let stencil = &self.stencil;
        let walls = self.walls.as_ref();
        let grid = stencil.grid();
        Ok(pool.install(|| {
            (0..grid.num_nodes())
                .into_par_iter()
                .map(|flat| {
                    let idx = grid.flat_to_nd(flat);
                    if walls.map_or(false, |w| w[idx]) {
                        Vec::new()
                    } else {
                        stencil.neighbors(idx)
                    }
                })
                .collect()
        }))
    }

    /// Run fast marching from all added seeds.
    ///
    /// # Errors
    /// Returns an error if a seed became invalid (walls set after it was
    /// added), if the factoring setup fails, or if the thread pool cannot be
    /// created.
    pub fn solve(&self) -> Result<Solution> {
        let start = Instant::now();
        let grid = self.stencil.grid();
        let n = grid.num_nodes();
        let [n0, n1] = grid.shape();

        let seed_indices = self
            .seeds
            .iter()
            .map(|&p| self.seed_index(p))
            .collect::<Result<Vec<_>>>()?;
        if seed_indices.is_empty() {
            warn!("solving without any seed");
        }

        let stencils = self.build_stencils()?;
        let mut reverse: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
        for (xf, offsets) in stencils.iter().enumerate() {
            let x = grid.flat_to_nd(xf);
            for (k, &e) in offsets.iter().enumerate() {
                if let Some(y) = grid.neighbor(x, e) {
                    if !self.is_wall(y) {
                        reverse[grid.nd_to_flat(y)].push((xf, k));
                    }
                }
            }
        }
        let total_offsets: usize = stencils.iter().map(Vec::len).sum();
        let max_stencil_size = stencils.iter().map(Vec::len).max().unwrap_or(0);
        let open = stencils.iter().filter(|s| !s.is_empty()).count().max(1);
        debug!(
            "stencils built in {:.3}s: {} offsets in total",
            start.elapsed().as_secs_f64(),
            total_offsets
        );

        let factoring = Factoring::setup(self.factoring, &self.stencil, &self.seeds, self.walls.as_ref())?;

        let mut values = vec![f64::INFINITY; n];
        let mut accepted = vec![false; n];
        let mut flows: Vec<DiscreteFlow> = vec![Vec::new(); n];
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>> = BinaryHeap::new();

        for (&p, &idx) in self.seeds.iter().zip(&seed_indices) {
            let (v, _) = grid.vector_towards(idx, grid.adimensionalize(p));
            let value = self.stencil.get_guess(idx).norm([-v[0], -v[1]]);
            let flat = grid.nd_to_flat(idx);
            if value < values[flat] {
                values[flat] = value;
                heap.push(Reverse((OrderedFloat(value), flat)));
            }
        }

        let mut stats = SolveStats {
            mean_stencil_size: total_offsets as f64 / open as f64,
            max_stencil_size,
            ..Default::default()
        };
        let mut last_progress = Duration::ZERO;

        while let Some(Reverse((OrderedFloat(u), flat))) = heap.pop() {
            // Skip stale entries
            if accepted[flat] || u > values[flat] {
                continue;
            }
            let y = grid.flat_to_nd(flat);

            if !flows[flat].is_empty() {
                let mut flow = std::mem::take(&mut flows[flat]);
                for fe in flow.iter_mut() {
                    fe.weight = grid
                        .neighbor(y, fe.offset)
                        .map_or(f64::INFINITY, |z| values[grid.nd_to_flat(z)]);
                }
                factoring.make_factor(y, &mut flow, &self.stencil);
                let value = self.stencil.hopf_lax_recompute(y, &mut flow);
                if value.is_finite() {
                    values[flat] = value;
                }
                flows[flat] = flow;
            }
            accepted[flat] = true;
            stats.accepted += 1;
            self.stencil.erase_cache(y);

            if let Some(cb) = &self.progress_callback {
                let elapsed = start.elapsed();
                if elapsed >= last_progress + Duration::from_millis(500) {
                    last_progress = elapsed;
                    cb(ProgressInfo {
                        accepted: stats.accepted,
                        trial: heap.len(),
                        elapsed,
                    });
                }
            }

            for &(xf, k) in &reverse[flat] {
                if accepted[xf] {
                    continue;
                }
                let x = grid.flat_to_nd(xf);
                let offsets = &stencils[xf];
                let m = offsets.len();
                let mut flow = vec![FlowElement {
                    offset: offsets[k],
                    weight: values[flat],
                }];
                for kk in [(k + m - 1) % m, (k + 1) % m] {
                    if let Some(z) = grid.neighbor(x, offsets[kk]) {
                        let zf = grid.nd_to_flat(z);
                        if accepted[zf] && !self.is_wall(z) {
                            flow.push(FlowElement {
                                offset: offsets[kk],
                                weight: values[zf],
                            });
                        }
                    }
                }
                if factoring.make_factor(x, &mut flow, &self.stencil) {
                    stats.factored_updates += 1;
                }
                let (value, _) = self.stencil.hopf_lax_update(x, &flow);
                stats.updates += 1;
                if value < values[xf] {
                    values[xf] = value;
                    flows[xf] = flow;
                    heap.push(Reverse((OrderedFloat(value), xf)));
                }
            }
        }

        stats.elapsed = start.elapsed();
        info!(
            "fast marching: {} points accepted, {} updates ({} factored), stencil size mean {:.1} max {}, {:.3}s",
            stats.accepted,
            stats.updates,
            stats.factored_updates,
            stats.mean_stencil_size,
            stats.max_stencil_size,
            stats.elapsed.as_secs_f64()
        );

        let values = Array2::from_shape_fn((n0, n1), |(i, j)| values[grid.nd_to_flat([i, j])]);
        let flows = Array2::from_shape_fn((n0, n1), |(i, j)| {
            let flat = grid.nd_to_flat([i, j]);
            if accepted[flat] {
                std::mem::take(&mut flows[flat])
            } else {
                Vec::new()
            }
        });
        Ok(Solution {
            values,
            flows,
            stats,
        })
    }
}
