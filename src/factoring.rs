// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Source factoring.
//!
//! The arrival time is singular at the seeds (and behind convex obstacle
//! corners), which ruins the accuracy of the first order scheme nearby.
//! Inside a region around these centers, the neighbor values entering an
//! update are corrected by the non-linear part of a closed-form guess
//! `u0(y) = N_c(y - c)`, so that `u0` itself is reproduced exactly.
//!
//! Static factoring attributes each point to its nearest center. Dynamic
//! factoring partitions the region into basins by a Dijkstra run over the
//! 8-neighbor graph and, on basin boundaries, blends centers along the
//! geodesic flow.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use log::{debug, info, warn};
use ndarray::Array2;
use ordered_float::OrderedFloat;

use crate::core::{dot, euclidean, offset_vector, DiscreteFlow, DomainTransform, FlowElement, Index, Offset, PeriodicGrid, Point, Vector};
use crate::dual::Dual;
use crate::error::{EikonalError, Result};
use crate::norm::{DistanceGuess, MetricSource};
use crate::stencil::{GradientCache, LagrangianStencil};

/// Offsets of the 8-neighbor graph used to build the basins.
const EIGHT_NEIGHBORS: [Offset; 8] = [
    [1, 0],
    [1, 1],
    [0, 1],
    [-1, 1],
    [-1, 0],
    [-1, -1],
    [0, -1],
    [1, -1],
];

/// Below this distance a point is considered to coincide with its center.
const CENTER_TOLERANCE: f64 = 1e-9;

/// Factoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactoringMethod {
    /// No factoring.
    #[default]
    None,
    /// Nearest center.
    Static,
    /// Basins from a multi-source Dijkstra run.
    Dynamic,
}

/// Which norm the guess of a point is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactoringPointChoice {
    /// The norm at the center.
    #[default]
    Key,
    /// The norm at the point itself.
    Current,
    /// The average of both.
    Both,
}

/// Factoring parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactoringConfig {
    /// Strategy.
    pub method: FactoringMethod,
    /// Guess norm selection.
    pub point_choice: FactoringPointChoice,
    /// Radius of the factored region around each center, in grid units.
    pub radius: f64,
    /// Also factor around convex obstacle corners.
    pub wall_corners: bool,
}

impl Default for FactoringConfig {
    fn default() -> Self {
        FactoringConfig {
            method: FactoringMethod::None,
            point_choice: FactoringPointChoice::Key,
            radius: 10.0,
            wall_corners: false,
        }
    }
}

/// One-sided finite difference whose singular remainder is corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceOrder {
    /// `u(x+e) - u(x)`.
    First,
    /// `-3/2 u(x) + 2 u(x+e) - 1/2 u(x+2e)`.
    Second,
    /// `-11/6 u(x) + 3 u(x+e) - 3/2 u(x+2e) + 1/3 u(x+3e)`.
    Third,
}

impl DifferenceOrder {
    fn coefficients(self) -> &'static [f64] {
        match self {
            DifferenceOrder::First => &[-1.0, 1.0],
            DifferenceOrder::Second => &[-1.5, 2.0, -0.5],
            DifferenceOrder::Third => &[-11.0 / 6.0, 3.0, -1.5, 1.0 / 3.0],
        }
    }
}

/// A point where the solution is singular, in grid units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactoringCenter {
    /// Position.
    pub point: Point,
    /// Norm used to approximate the distance from this center.
    pub guess: DistanceGuess,
}

/// Relation between a grid point and one center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementaryGuess {
    /// Position of the center in the center table.
    pub center: usize,
    /// Vector from the point to the closest periodic image of the center.
    pub base: Vector,
    /// Periods crossed to reach that image.
    pub transform: DomainTransform,
}

/// A weighted guess together with the norm it is evaluated with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorTerm {
    /// Weight in the blend; the weights of a factor sum to one.
    pub weight: f64,
    /// Position relative to the center.
    pub guess: ElementaryGuess,
    /// Norm of `u0`.
    pub norm: DistanceGuess,
}

impl FactorTerm {
    fn correction(&self, offset: Offset, order: DifferenceOrder) -> f64 {
        let e = offset_vector(offset);
        let b = self.guess.base;
        let u0 = self
            .norm
            .norm_ad::<2>([Dual::variable(-b[0], 0), Dual::variable(-b[1], 1)]);
        let coefficients = order.coefficients();
        let mut delta = coefficients[0] * u0.value();
        for (j, a) in coefficients.iter().enumerate().skip(1) {
            let s = j as f64;
            delta += a * self.norm.norm([s * e[0] - b[0], s * e[1] - b[1]]);
        }
        delta - dot(u0.gradient(), e)
    }
}

/// Factoring data of a single point, built per query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointFactor {
    terms: Vec<FactorTerm>,
}

impl PointFactor {
    /// Blend of the given terms.
    pub fn new(terms: Vec<FactorTerm>) -> Self {
        PointFactor { terms }
    }

    /// The blended terms.
    pub fn terms(&self) -> &[FactorTerm] {
        &self.terms
    }

    /// `δ[u0](offset) - <∇u0(x), offset>` for the requested difference,
    /// blended over the terms.
    pub fn correction(&self, offset: Offset, order: DifferenceOrder) -> f64 {
        self.terms
            .iter()
            .map(|t| t.weight * t.correction(offset, order))
            .sum()
    }

    /// Subtract the first order correction from every neighbor value.
    pub fn apply(&self, flow: &mut [FlowElement]) {
        for fe in flow.iter_mut() {
            fe.weight -= self.correction(fe.offset, DifferenceOrder::First);
        }
    }
}

/// Factoring setup: centers, region and, for the dynamic method, basins.
#[derive(Debug, Clone)]
pub struct Factoring {
    config: FactoringConfig,
    grid: PeriodicGrid,
    centers: Vec<FactoringCenter>,
    region: Array2<bool>,
    keypoints: BTreeMap<usize, usize>,
    neighbors: BTreeMap<usize, Vec<(Offset, f64)>>,
}

impl Factoring {
    /// Factoring that leaves every update untouched.
    pub fn disabled(grid: &PeriodicGrid) -> Self {
        let [n0, n1] = grid.shape();
        Factoring {
            config: FactoringConfig::default(),
            grid: grid.clone(),
            centers: Vec::new(),
            region: Array2::from_elem((n0, n1), false),
            keypoints: BTreeMap::new(),
            neighbors: BTreeMap::new(),
        }
    }

    /// Build the factoring data. `seeds` are physical positions; `walls`,
    /// when given, must have the grid's shape.
    ///
    /// # Errors
    /// Returns an error for an invalid radius, a seed outside the domain or
    /// a wall mask of the wrong shape.
    pub fn setup<M: MetricSource, C: GradientCache>(
        config: FactoringConfig,
        stencil: &LagrangianStencil<M, C>,
        seeds: &[Point],
        walls: Option<&Array2<bool>>,
    ) -> Result<Self> {
        if !config.radius.is_finite() || config.radius < 0.0 {
            return Err(EikonalError::InvalidFactoringRadius(config.radius));
        }
        let grid = stencil.grid();
        if let Some(w) = walls {
            grid.check_shape(w.dim())?;
        }
        let mut factoring = Factoring::disabled(grid);
        factoring.config = config;
        if config.method == FactoringMethod::None {
            debug!("factoring disabled");
            return Ok(factoring);
        }

        factoring.setup_centers(stencil, seeds, walls)?;
        if factoring.centers.is_empty() {
            warn!("factoring requested without any center");
        }
        factoring.setup_region();
        if config.method == FactoringMethod::Dynamic {
            factoring.setup_dijkstra(stencil, walls);
        }
        info!(
            "factoring ({:?}, {:?}): {} centers, {} region points, {} keypoints, {} boundary points",
            config.method,
            config.point_choice,
            factoring.centers.len(),
            factoring.region.iter().filter(|&&r| r).count(),
            factoring.keypoints.len(),
            factoring.neighbors.len()
        );
        Ok(factoring)
    }

    fn setup_centers<M: MetricSource, C: GradientCache>(
        &mut self,
        stencil: &LagrangianStencil<M, C>,
        seeds: &[Point],
        walls: Option<&Array2<bool>>,
    ) -> Result<()> {
        for &seed in seeds {
            let point = self.grid.adimensionalize(seed);
            let guess = stencil
                .get_guess_at(point)
                .ok_or_else(|| EikonalError::InvalidCenter {
                    point: point.to_vec(),
                    reason: "outside the domain".to_string(),
                })?;
            self.centers.push(FactoringCenter { point, guess });
        }

        let Some(walls) = walls.filter(|_| self.config.wall_corners) else {
            return Ok(());
        };
        let shape = self.grid.shape();
        let periodic = self.grid.periodic();
        let is_free = |idx: Option<Index>| idx.map_or(false, |i| !walls[i]);
        let mut corners = 0usize;
        for w in self.grid.indices() {
            if !walls[w] {
                continue;
            }
            for sx in [-1i32, 1] {
                for sy in [-1i32, 1] {
                    let free = is_free(self.grid.neighbor(w, [sx, 0]))
                        && is_free(self.grid.neighbor(w, [0, sy]))
                        && is_free(self.grid.neighbor(w, [sx, sy]));
                    if !free {
                        continue;
                    }
                    // Obstacle vertex between the wall node and its free diagonal.
                    let mut point = [w[0] as f64 + 0.5 * sx as f64, w[1] as f64 + 0.5 * sy as f64];
                    for d in 0..2 {
                        if periodic[d] {
                            point[d] = point[d].rem_euclid(shape[d] as f64);
                        }
                    }
                    if let Some(guess) = stencil.get_guess_at(point) {
                        self.centers.push(FactoringCenter { point, guess });
                        corners += 1;
                    }
                }
            }
        }
        debug!("{} obstacle corners added as factoring centers", corners);
        Ok(())
    }

    fn setup_region(&mut self) {
        let radius = self.config.radius;
        for idx in self.grid.indices() {
            let inside = self.centers.iter().any(|c| {
                let (v, _) = self.grid.vector_towards(idx, c.point);
                euclidean(v) <= radius
            });
            self.region[idx] = inside;
        }
    }

    fn setup_dijkstra<M: MetricSource, C: GradientCache>(
        &mut self,
        stencil: &LagrangianStencil<M, C>,
        walls: Option<&Array2<bool>>,
    ) {
        let grid = &self.grid;
        let n = grid.num_nodes();
        let usable = |idx: Index| self.region[idx] && !walls.map_or(false, |w| w[idx]);

        let mut distances = vec![f64::INFINITY; n];
        let mut done = vec![false; n];
        let mut keys: Vec<Option<usize>> = vec![None; n];

        // Min-heap: (distance, push order, flat index, center). The push
        // order makes ties go to the first center reaching a point.
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize, usize, usize)>> = BinaryHeap::new();
        let mut pushed = 0usize;

        // Sources: the usable nodes of the grid cell holding each center.
        for (id, center) in self.centers.iter().enumerate() {
            let p = center.point;
            let corner = [p[0].floor() as usize, p[1].floor() as usize];
            let steps = |d: usize| if p[d] > p[d].floor() { 0..2 } else { 0..1 };
            for dx in steps(0) {
                for dy in steps(1) {
                    let Some(idx) = grid.neighbor(corner, [dx, dy]) else {
                        continue;
                    };
                    if !usable(idx) {
                        continue;
                    }
                    let (v, _) = grid.vector_towards(idx, p);
                    let dist = center.guess.norm([-v[0], -v[1]]);
                    let flat = grid.nd_to_flat(idx);
                    if dist < distances[flat] {
                        distances[flat] = dist;
                        heap.push(Reverse((OrderedFloat(dist), pushed, flat, id)));
                        pushed += 1;
                    }
                }
            }
        }

        while let Some(Reverse((OrderedFloat(dist), _, flat, id))) = heap.pop() {
            if done[flat] {
                continue;
            }
            done[flat] = true;
            keys[flat] = Some(id);
            let idx = grid.flat_to_nd(flat);
            let norm = stencil.get_norm(idx);
            for offset in EIGHT_NEIGHBORS {
                let Some(nb) = grid.neighbor(idx, offset) else {
                    continue;
                };
                let nf = grid.nd_to_flat(nb);
                if done[nf] || !usable(nb) {
                    continue;
                }
                let new_dist = dist + norm.norm(offset_vector(offset));
                if new_dist < distances[nf] {
                    distances[nf] = new_dist;
                    heap.push(Reverse((OrderedFloat(new_dist), pushed, nf, id)));
                    pushed += 1;
                }
            }
        }

        let mut keypoints = BTreeMap::new();
        let mut neighbors: BTreeMap<usize, Vec<(Offset, f64)>> = BTreeMap::new();
        for (flat, key) in keys.iter().enumerate() {
            let Some(key) = *key else {
                continue;
            };
            keypoints.insert(flat, key);
            let idx = grid.flat_to_nd(flat);
            let norm = stencil.get_norm(idx);
            for offset in EIGHT_NEIGHBORS {
                let other = grid
                    .neighbor(idx, offset)
                    .and_then(|nb| keys[grid.nd_to_flat(nb)]);
                if matches!(other, Some(k) if k != key) {
                    neighbors
                        .entry(flat)
                        .or_default()
                        .push((offset, norm.norm(offset_vector(offset))));
                }
            }
        }
        let unreached = self
            .grid
            .indices()
            .filter(|&idx| usable(idx) && keys[self.grid.nd_to_flat(idx)].is_none())
            .count();
        if unreached > 0 {
            warn!("{} factoring region points are not connected to any center", unreached);
        }
        self.keypoints = keypoints;
        self.neighbors = neighbors;
    }

    /// Configuration.
    pub fn config(&self) -> &FactoringConfig {
        &self.config
    }

    /// Factoring centers, in grid units.
    pub fn centers(&self) -> &[FactoringCenter] {
        &self.centers
    }

    /// Points where updates are factored.
    pub fn region(&self) -> &Array2<bool> {
        &self.region
    }

    /// Center owning each flat index (dynamic method).
    pub fn keypoints(&self) -> &BTreeMap<usize, usize> {
        &self.keypoints
    }

    /// Center owning `index`, if any (dynamic method).
    pub fn key(&self, index: Index) -> Option<usize> {
        self.keypoints.get(&self.grid.nd_to_flat(index)).copied()
    }

    /// 8-neighbors of `index` owned by another center, with the length of the
    /// connecting edge. Empty away from basin boundaries.
    pub fn basin_boundary(&self, index: Index) -> &[(Offset, f64)] {
        self.neighbors
            .get(&self.grid.nd_to_flat(index))
            .map_or(&[], |v| v.as_slice())
    }

    /// Whether updates at `index` are to be factored. Stateless: with the
    /// dynamic method every keyed region point qualifies on every visit.
    pub fn needs_recompute(&self, index: Index) -> bool {
        match self.config.method {
            FactoringMethod::None => false,
            FactoringMethod::Static => self.region[index],
            FactoringMethod::Dynamic => self.region[index] && self.key(index).is_some(),
        }
    }

    /// Local guess: the center's relation to `index`, evaluated with the
    /// norm at `index`. `None` if that norm is unusable.
    fn make_guess<M: MetricSource, C: GradientCache>(
        &self,
        index: Index,
        stencil: &LagrangianStencil<M, C>,
    ) -> Option<DistanceGuess> {
        let norm = stencil.get_guess(index);
        norm.is_valid().then_some(norm)
    }

    fn point_factor<M: MetricSource, C: GradientCache>(
        &self,
        index: Index,
        blend: &[(usize, f64)],
        stencil: &LagrangianStencil<M, C>,
    ) -> Option<PointFactor> {
        let current = match self.config.point_choice {
            FactoringPointChoice::Key => None,
            FactoringPointChoice::Current | FactoringPointChoice::Both => {
                Some(self.make_guess(index, stencil)?)
            }
        };
        let mut terms = Vec::with_capacity(2 * blend.len());
        for &(center, weight) in blend {
            let c = self.centers.get(center)?;
            let (base, transform) = self.grid.vector_towards(index, c.point);
            if euclidean(base) < CENTER_TOLERANCE {
                return None;
            }
            let guess = ElementaryGuess {
                center,
                base,
                transform,
            };
            match (self.config.point_choice, current) {
                (FactoringPointChoice::Current, Some(norm)) => {
                    terms.push(FactorTerm { weight, guess, norm })
                }
                (FactoringPointChoice::Both, Some(norm)) => {
                    terms.push(FactorTerm {
                        weight: 0.5 * weight,
                        guess,
                        norm: c.guess,
                    });
                    terms.push(FactorTerm {
                        weight: 0.5 * weight,
                        guess,
                        norm,
                    });
                }
                _ => terms.push(FactorTerm {
                    weight,
                    guess,
                    norm: c.guess,
                }),
            }
        }
        (!terms.is_empty()).then(|| PointFactor::new(terms))
    }

    /// Static factoring of `index`: the center with the smallest guessed
    /// distance, ties going to the first center. `None` if `index`
    /// coincides with it or no guess can be formed.
    pub fn set_index_static<M: MetricSource, C: GradientCache>(
        &self,
        index: Index,
        stencil: &LagrangianStencil<M, C>,
    ) -> Option<PointFactor> {
        let mut best: Option<(usize, f64)> = None;
        for (id, c) in self.centers.iter().enumerate() {
            let (v, _) = self.grid.vector_towards(index, c.point);
            let d = c.guess.norm([-v[0], -v[1]]);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((id, d));
            }
        }
        let (center, _) = best?;
        self.point_factor(index, &[(center, 1.0)], stencil)
    }

    /// Dynamic factoring of `index`. `flow` must hold geodesic flow weights
    /// (as produced by a recompute). On basin boundaries the centers of the
    /// upstream neighbors are blended, proportionally to the flow.
    pub fn set_index_dynamic<M: MetricSource, C: GradientCache>(
        &self,
        index: Index,
        flow: &[FlowElement],
        stencil: &LagrangianStencil<M, C>,
    ) -> Option<PointFactor> {
        let own = self.key(index)?;
        if self.basin_boundary(index).is_empty() {
            return self.point_factor(index, &[(own, 1.0)], stencil);
        }

        let mut blend: BTreeMap<usize, f64> = BTreeMap::new();
        for fe in flow.iter().filter(|fe| fe.weight > 0.0) {
            let key = self
                .grid
                .neighbor(index, fe.offset)
                .and_then(|nb| self.key(nb))
                .unwrap_or(own);
            *blend.entry(key).or_insert(0.0) += fe.weight;
        }
        let total: f64 = blend.values().sum();
        if !(total > 0.0) {
            return self.point_factor(index, &[(own, 1.0)], stencil);
        }
        let blend: Vec<(usize, f64)> = blend.into_iter().map(|(k, w)| (k, w / total)).collect();
        self.point_factor(index, &blend, stencil)
    }

    /// Correct the neighbor values in `flow` before an update at `index`.
    /// Returns whether a correction was applied; the flow is untouched
    /// otherwise.
    pub fn make_factor<M: MetricSource, C: GradientCache>(
        &self,
        index: Index,
        flow: &mut DiscreteFlow,
        stencil: &LagrangianStencil<M, C>,
    ) -> bool {
        if !self.needs_recompute(index) {
            return false;
        }
        let factor = match self.config.method {
            FactoringMethod::None => None,
            FactoringMethod::Static => self.set_index_static(index, stencil),
            FactoringMethod::Dynamic => {
                let mut probe = flow.clone();
                stencil.hopf_lax_recompute(index, &mut probe);
                self.set_index_dynamic(index, &probe, stencil)
            }
        };
        match factor {
            Some(f) => {
                f.apply(flow);
                true
            }
            None => false,
        }
    }
}
