use std::{collections::BTreeMap, fs::File};

use metapupil::{
    atmosphere::{self, TurbulenceModel},
    cache::DiskStore,
    inversion::{self, Method, RegularizationWeight, SparseOptions},
    system, ProjectionMethod, TomographyConfig,
};
use nalgebra::DMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::Normal;
use serde::Serialize;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "metapupil", about = "Multi-guide-star atmospheric tomography")]
struct Opt {
    /// Number of guide stars
    #[structopt(long, default_value = "3")]
    stars: usize,
    /// Number of Zernike modes
    #[structopt(long, default_value = "30")]
    modes: usize,
    /// Field-of-view [arcsec]
    #[structopt(long, default_value = "60")]
    fov: f64,
    /// Telescope diameter [m]
    #[structopt(long, default_value = "4")]
    diameter: f64,
    /// Layer altitudes [km] (default: 0,1,..,30)
    #[structopt(long, use_delimiter = true)]
    heights: Option<Vec<f64>>,
    /// Fried parameter [m]
    #[structopt(long, default_value = "0.15")]
    r0: f64,
    /// Outer scale [m], switches to the von Karman model
    #[structopt(long)]
    outer_scale: Option<f64>,
    /// Altitudes [km] of the turbulent layers (default: all of them)
    #[structopt(long, use_delimiter = true)]
    keep: Option<Vec<f64>>,
    /// Measurement noise standard deviation
    #[structopt(long, default_value = "0")]
    noise: f64,
    /// L1 regularization weight
    #[structopt(long, default_value = "1e-5")]
    mu: f64,
    /// Analytic projection matrices
    #[structopt(long)]
    analytic: bool,
    /// Numerical projection sampling resolution
    #[structopt(long, default_value = "128")]
    resolution: usize,
    /// Disable the Nesterov acceleration of the sparse solver
    #[structopt(long)]
    no_accelerate: bool,
    /// Backtracking line search of the sparse solver
    #[structopt(long)]
    backtrack: bool,
    /// Curvature-based step size of the sparse solver
    #[structopt(long)]
    adaptive: bool,
    /// Random generator seed
    #[structopt(long, default_value = "123")]
    seed: u64,
    /// Projection matrix store directory
    #[structopt(long, default_value = "matrices")]
    matrices: String,
    /// Pickle the original and estimated turbulence to this file
    #[structopt(long)]
    results: Option<String>,
}

/// Original and estimated turbulence, pickled for offline comparison
#[derive(Debug, Serialize)]
struct Results {
    heights: Vec<f64>,
    original: Vec<f64>,
    estimates: BTreeMap<String, Vec<f64>>,
}

fn relative_error(estimate: &DMatrix<f64>, original: &DMatrix<f64>) -> f64 {
    let norm = original.norm();
    if norm > 0. {
        (estimate - original).norm() / norm
    } else {
        estimate.norm()
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let heights = opt
        .heights
        .clone()
        .unwrap_or_else(|| (0..=30).map(|h| h as f64).collect());
    let method = if opt.analytic {
        ProjectionMethod::Analytic
    } else {
        ProjectionMethod::Numerical {
            resolution: opt.resolution,
        }
    };
    let config = TomographyConfig::new(opt.stars, opt.modes, opt.fov, &heights, opt.diameter)?
        .projection_method(method);
    println!("Tomography session:\n{config}");

    let mut store = DiskStore::new(&opt.matrices)?;
    let tensor = system::projection_tensor(&config, &mut store)?;
    let stacked = system::stack(&tensor);

    let model = match opt.outer_scale {
        Some(l0) => TurbulenceModel::VonKarman { r0: opt.r0, l0 },
        None => TurbulenceModel::Kolmogorov { r0: opt.r0 },
    };
    println!("Turbulence: {model}");
    let covariance = atmosphere::covariance(&model, opt.modes, config.first_noll(), opt.diameter)?;
    let mut rng = StdRng::seed_from_u64(opt.seed);
    let keep = opt.keep.as_ref().map(|keep| config.layer_indices(keep));
    let original =
        atmosphere::draw_realization(&covariance, config.n_heights(), keep.as_deref(), &mut rng)?;

    let mut measurement = system::measure(&stacked, &original);
    if opt.noise > 0. {
        let noise = Normal::new(0., opt.noise)?;
        measurement
            .iter_mut()
            .for_each(|b| *b += rng.sample(noise));
    }

    let mut estimates = BTreeMap::new();

    let tikhonov =
        inversion::solve_least_squares(&stacked, &measurement, opt.modes, Some(&covariance))?;
    println!(
        "{:>13}: relative error {:.3e}",
        Method::LeastSquares.to_string(),
        relative_error(&tikhonov, &original)
    );
    estimates.insert(Method::LeastSquares.to_string(), tikhonov);

    let options = SparseOptions {
        accelerate: !opt.no_accelerate,
        backtrack: opt.backtrack,
        adaptive: opt.adaptive,
        ..Default::default()
    };
    let sparse = inversion::solve_sparse(
        &stacked,
        &measurement,
        &RegularizationWeight::Global(opt.mu),
        opt.modes,
        &options,
    )?;
    println!(
        "{:>13}: relative error {:.3e} ({} iterations, residual {:.3e}{})",
        Method::Sparse.to_string(),
        relative_error(&sparse.modes, &original),
        sparse.iterations,
        sparse.residual,
        if sparse.converged {
            ""
        } else {
            ", iteration cap reached"
        }
    );
    estimates.insert(Method::Sparse.to_string(), sparse.modes);

    if let Some(path) = opt.results {
        let results = Results {
            heights: config.heights_km(),
            original: original.as_slice().to_vec(),
            estimates: estimates
                .into_iter()
                .map(|(method, modes)| (method, modes.as_slice().to_vec()))
                .collect(),
        };
        let mut file = File::create(&path)?;
        serde_pickle::to_writer(&mut file, &results, Default::default())?;
        log::info!("results saved to {path}");
    }

    Ok(())
}
