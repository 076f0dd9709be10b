// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::LevelFilter;
use ndarray::Array2;

use eikonal_seismic::core::PeriodicGrid;
use eikonal_seismic::factoring::{FactoringConfig, FactoringMethod, FactoringPointChoice};
use eikonal_seismic::norm::{HookeTensor, MetricElement, MetricSource, UniformMetric};
use eikonal_seismic::scheduler::{FastMarching, ProgressInfo};
use eikonal_seismic::stencil::{GradientCache, LagrangianStencil, StencilConfig, VertexCache};

#[derive(Parser)]
#[command(
    name = "eikonal-seismic",
    about = "Anisotropic seismic traveltimes by Fast Marching with source factoring"
)]
struct Cli {
    /// Grid size, comma-separated (e.g., 101,101)
    #[arg(short = 's', long)]
    size: String,

    /// Seed coordinates, comma-separated (repeatable for multiple seeds)
    #[arg(long, num_args = 1)]
    seed: Vec<String>,

    /// Grid spacing
    #[arg(long, default_value = "1.0")]
    spacing: f64,

    /// Periodic axes, comma-separated booleans (e.g., true,false)
    #[arg(long, default_value = "false,false")]
    periodic: String,

    /// Medium: "isotropic:<v>", "gradient:<v0>,<g>", "vti:<c11>,<c33>,<c13>,<c44>",
    /// "tilted:<c11>,<c33>,<c13>,<c44>,<angle>" or "topographic:<v>,<s0>,<s1>"
    #[arg(short = 'm', long, default_value = "isotropic:1.0")]
    model: String,

    /// Factoring method: none, static or dynamic
    #[arg(long, default_value = "none")]
    factoring: String,

    /// Factoring guess: key, current or both
    #[arg(long, default_value = "key")]
    point_choice: String,

    /// Factoring radius, in grid steps
    #[arg(long, default_value = "10.0")]
    factoring_radius: f64,

    /// Also factor around obstacle corners
    #[arg(long)]
    wall_corners: bool,

    /// Rectangular obstacle "i0,j0,i1,j1" in grid indices, inclusive (repeatable)
    #[arg(long, num_args = 1)]
    wall: Vec<String>,

    /// Minimal norm cosine between consecutive stencil offsets
    #[arg(long, default_value = "0.5")]
    cos_angle_min: f64,

    /// Cap on the number of offsets per stencil
    #[arg(long, default_value = "256")]
    max_offsets: usize,

    /// Memoize vertex gradients during the march
    #[arg(long)]
    cache: bool,

    /// Points whose arrival time is printed, comma-separated (repeatable)
    #[arg(long, num_args = 1)]
    probe: Vec<String>,

    /// Number of Rayon worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Print progress to stderr
    #[arg(long)]
    progress: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_list<T: std::str::FromStr>(s: &str, what: &str, n: usize) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parts: Vec<T> = s
        .split(',')
        .map(|p| p.trim().parse::<T>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid {}: '{}'", what, s))?;
    if parts.len() != n {
        bail!("{} has {} components, expected {}", what, parts.len(), n);
    }
    Ok(parts)
}

fn parse_point(s: &str, what: &str) -> Result<[f64; 2]> {
    let p = parse_list::<f64>(s, what, 2)?;
    Ok([p[0], p[1]])
}

fn build_element(model: &str) -> Result<Option<MetricElement>> {
    if let Some(v) = model.strip_prefix("isotropic:") {
        let v: f64 = v.parse().context("invalid isotropic speed")?;
        if !v.is_finite() || v <= 0.0 {
            bail!("isotropic speed must be positive and finite, got {}", v);
        }
        return Ok(Some(MetricElement::Seismic(HookeTensor::isotropic(v))));
    }
    if let Some(params) = model.strip_prefix("vti:") {
        let c = parse_list::<f64>(params, "vti coefficients", 4)?;
        return Ok(Some(MetricElement::Seismic(HookeTensor::vti(c[0], c[1], c[2], c[3]))));
    }
    if let Some(params) = model.strip_prefix("tilted:") {
        let c = parse_list::<f64>(params, "tilted coefficients", 5)?;
        let hooke = HookeTensor::vti(c[0], c[1], c[2], c[3]).rotated(c[4]);
        return Ok(Some(MetricElement::Seismic(hooke)));
    }
    if let Some(params) = model.strip_prefix("topographic:") {
        let c = parse_list::<f64>(params, "topographic parameters", 3)?;
        if (1.0 + c[2]).abs() < 1e-12 {
            bail!("topographic slope component s1 must differ from -1");
        }
        return Ok(Some(MetricElement::Topographic(
            HookeTensor::isotropic(c[0]),
            [c[1], c[2]],
        )));
    }
    Ok(None)
}

fn build_gradient(params: &str, shape: [usize; 2], h: f64) -> Result<Array2<MetricElement>> {
    let c = parse_list::<f64>(params, "gradient parameters", 2)?;
    let (v0, g) = (c[0], c[1]);
    // depth axis: y (axis 1)
    let v_max = v0 + g * (shape[1] - 1) as f64 * h;
    if !v0.is_finite() || v0 <= 0.0 || !v_max.is_finite() || v_max <= 0.0 {
        bail!("gradient: speeds from {} to {} must be positive and finite", v0, v_max);
    }
    Ok(Array2::from_shape_fn((shape[0], shape[1]), |(_, j)| {
        MetricElement::Seismic(HookeTensor::isotropic(v0 + g * j as f64 * h))
    }))
}

fn build_factoring(cli: &Cli) -> Result<FactoringConfig> {
    let method = match cli.factoring.as_str() {
        "none" => FactoringMethod::None,
        "static" => FactoringMethod::Static,
        "dynamic" => FactoringMethod::Dynamic,
        other => bail!("unknown --factoring '{}': expected none, static or dynamic", other),
    };
    let point_choice = match cli.point_choice.as_str() {
        "key" => FactoringPointChoice::Key,
        "current" => FactoringPointChoice::Current,
        "both" => FactoringPointChoice::Both,
        other => bail!("unknown --point-choice '{}': expected key, current or both", other),
    };
    Ok(FactoringConfig {
        method,
        point_choice,
        radius: cli.factoring_radius,
        wall_corners: cli.wall_corners,
    })
}

fn build_walls(cli: &Cli, shape: [usize; 2]) -> Result<Option<Array2<bool>>> {
    if cli.wall.is_empty() {
        return Ok(None);
    }
    let mut walls = Array2::from_elem((shape[0], shape[1]), false);
    for w in &cli.wall {
        let r = parse_list::<usize>(w, "--wall", 4)?;
        if r[2] >= shape[0] || r[3] >= shape[1] || r[0] > r[2] || r[1] > r[3] {
            bail!("--wall '{}' is not a rectangle inside the grid", w);
        }
        for i in r[0]..=r[2] {
            for j in r[1]..=r[3] {
                walls[[i, j]] = true;
            }
        }
    }
    Ok(Some(walls))
}

fn run<M: MetricSource + Sync>(cli: &Cli, grid: PeriodicGrid, metric: M) -> Result<()> {
    let config = StencilConfig {
        cos_angle_min: cli.cos_angle_min,
        max_offsets: cli.max_offsets,
    };
    let stencil = LagrangianStencil::new(grid, metric)?.with_config(config)?;
    if cli.cache {
        solve(cli, stencil.with_cache(VertexCache::new()))
    } else {
        solve(cli, stencil)
    }
}

fn solve<M, C>(cli: &Cli, stencil: LagrangianStencil<M, C>) -> Result<()>
where
    M: MetricSource + Sync,
    C: GradientCache + Sync,
{
    let grid = stencil.grid().clone();
    let mut solver = FastMarching::new(stencil).with_factoring(build_factoring(cli)?);
    if let Some(walls) = build_walls(cli, grid.shape())? {
        solver = solver.with_walls(walls)?;
    }
    if let Some(threads) = cli.threads {
        solver = solver.with_threads(threads);
    }
    if cli.progress {
        solver = solver.with_progress(Box::new(|info: ProgressInfo| {
            eprintln!(
                "[{:.1}s] accepted={} trial={}",
                info.elapsed.as_secs_f64(),
                info.accepted,
                info.trial,
            );
        }));
    }

    for s in &cli.seed {
        solver
            .add_seed(parse_point(s, "--seed")?)
            .with_context(|| format!("cannot add seed '{}'", s))?;
    }

    let solution = solver.solve()?;

    for s in &cli.probe {
        let p = parse_point(s, "--probe")?;
        let idx = grid
            .nearest_index(grid.adimensionalize(p))
            .with_context(|| format!("probe '{}' is outside the domain", s))?;
        println!("{},{} -> {:?}: {:.12}", p[0], p[1], idx, solution.value(idx));
    }
    let reached = solution.values.iter().filter(|u| u.is_finite()).count();
    let max = solution
        .values
        .iter()
        .filter(|u| u.is_finite())
        .fold(0.0f64, |a, &b| a.max(b));
    println!(
        "reached {} of {} points, max arrival time {:.6}",
        reached,
        grid.num_nodes(),
        max
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match cli.verbose {
        0 => {}
        1 => {
            logger.filter_level(LevelFilter::Debug);
        }
        _ => {
            logger.filter_level(LevelFilter::Trace);
        }
    }
    logger.init();

    if cli.seed.is_empty() {
        bail!("at least one --seed must be specified");
    }

    let size = parse_list::<usize>(&cli.size, "--size", 2)?;
    let shape = [size[0], size[1]];
    let periodic = parse_list::<bool>(&cli.periodic, "--periodic", 2)?;
    let grid = PeriodicGrid::new(shape, cli.spacing)?.with_periodic([periodic[0], periodic[1]]);

    if let Some(params) = cli.model.strip_prefix("gradient:") {
        let metric = build_gradient(params, shape, cli.spacing)?;
        return run(&cli, grid, metric);
    }
    match build_element(&cli.model)? {
        Some(element) => run(&cli, grid, UniformMetric(element)),
        None => bail!(
            "unknown --model '{}'. Expected 'isotropic:<v>', 'gradient:<v0>,<g>', \
             'vti:<c11>,<c33>,<c13>,<c44>', 'tilted:<c11>,<c33>,<c13>,<c44>,<angle>' \
             or 'topographic:<v>,<s0>,<s1>'",
            cli.model
        ),
    }
}
