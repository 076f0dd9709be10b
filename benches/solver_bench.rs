// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use eikonal_seismic::core::PeriodicGrid;
use eikonal_seismic::factoring::{FactoringConfig, FactoringMethod};
use eikonal_seismic::norm::{HookeTensor, MetricElement, UniformMetric};
use eikonal_seismic::scheduler::FastMarching;
use eikonal_seismic::stencil::{LagrangianStencil, VertexCache};

fn tilted() -> MetricElement {
    MetricElement::Seismic(HookeTensor::vti(20.0, 5.0, 3.0, 2.0).rotated(0.5))
}

fn make_stencil(n: usize, element: MetricElement) -> LagrangianStencil<UniformMetric> {
    let grid = PeriodicGrid::new([n, n], 1.0).unwrap();
    LagrangianStencil::new(grid, UniformMetric(element)).unwrap()
}

fn make_solver(n: usize, threads: usize, method: FactoringMethod) -> FastMarching<UniformMetric> {
    let center = (n / 2) as f64;
    let mut solver = FastMarching::new(make_stencil(n, tilted()))
        .with_factoring(FactoringConfig {
            method,
            ..Default::default()
        })
        .with_threads(threads);
    solver.add_seed([center, center]).unwrap();
    solver
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Stencil refinement alone, isotropic vs strongly anisotropic.
fn bench_stencil_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("stencil_construction");
    let isotropic = make_stencil(64, MetricElement::Seismic(HookeTensor::isotropic(1.0)));
    let anisotropic = make_stencil(64, tilted());
    group.bench_function("isotropic", |b| {
        b.iter(|| black_box(isotropic.neighbors(black_box([10, 10]))));
    });
    group.bench_function("tilted_vti", |b| {
        b.iter(|| black_box(anisotropic.neighbors(black_box([10, 10]))));
    });
    group.finish();
}

/// Full solve on a tilted VTI medium, 201x201, per factoring method.
fn bench_factoring_methods(c: &mut Criterion) {
    let cpus = num_cpus();
    let mut group = c.benchmark_group("tilted_201x201");
    group.sample_size(10);
    for (name, method) in [
        ("none", FactoringMethod::None),
        ("static", FactoringMethod::Static),
        ("dynamic", FactoringMethod::Dynamic),
    ] {
        group.bench_function(name, |b| {
            b.iter_with_setup(
                || make_solver(201, cpus, method),
                |solver| black_box(solver.solve().unwrap()),
            );
        });
    }
    group.finish();
}

/// Stencil construction is parallel; the march itself is sequential.
fn bench_thread_scaling(c: &mut Criterion) {
    let cpus = num_cpus();
    let mut group = c.benchmark_group("thread_scaling_301x301");
    group.sample_size(10);
    for &threads in &[1, 2, 4, 8] {
        if threads <= cpus {
            group.bench_function(format!("{}threads", threads), |b| {
                b.iter_with_setup(
                    || make_solver(301, threads, FactoringMethod::None),
                    |solver| black_box(solver.solve().unwrap()),
                );
            });
        }
    }
    group.finish();
}

/// Vertex gradient memoization against plain recomputation.
fn bench_vertex_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("vertex_cache_201x201");
    group.sample_size(10);
    group.bench_function("no_cache", |b| {
        b.iter_with_setup(
            || {
                let mut solver = FastMarching::new(make_stencil(201, tilted()));
                solver.add_seed([100.0, 100.0]).unwrap();
                solver
            },
            |solver| black_box(solver.solve().unwrap()),
        );
    });
    group.bench_function("cache", |b| {
        b.iter_with_setup(
            || {
                let stencil = make_stencil(201, tilted()).with_cache(VertexCache::new());
                let mut solver = FastMarching::new(stencil);
                solver.add_seed([100.0, 100.0]).unwrap();
                solver
            },
            |solver| black_box(solver.solve().unwrap()),
        );
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_stencil_construction,
    bench_factoring_methods,
    bench_thread_scaling,
    bench_vertex_cache,
);
criterion_main!(benches);
