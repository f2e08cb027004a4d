//! # metapupil
//!
//! Atmospheric tomography for multi-conjugate adaptive optics: synthetic
//! multi-guide-star wavefront sensing through a layered turbulent atmosphere
//! and the recovery of the layer-by-layer turbulence from the measurements.
//!
//! The forward model is assembled from per-(layer, star) Zernike projection
//! matrices ([projection]) stacked into a block system matrix ([system]);
//! turbulence realizations are drawn from the closed-form Kolmogorov or von
//! Karman Zernike covariance ([atmosphere]); the inverse problem is solved
//! by Tikhonov-regularized least-squares or by an accelerated
//! proximal-gradient L1 minimization ([inversion]). Projection matrices are
//! expensive and reused across sessions through a disk store ([cache]).
//!
//! ## Example
//!
//! ```
//! use metapupil::{
//!     atmosphere, cache::MemoryStore, inversion, system, ProjectionMethod,
//!     RegularizationWeight, SparseOptions, TomographyConfig, TurbulenceModel,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = TomographyConfig::new(3, 6, 60., &[0., 8.], 4.)?
//!     .projection_method(ProjectionMethod::Numerical { resolution: 32 });
//! let tensor = system::projection_tensor(&config, &mut MemoryStore::default())?;
//! let stacked = system::stack(&tensor);
//!
//! let model = TurbulenceModel::Kolmogorov { r0: 0.15 };
//! let covariance = atmosphere::covariance(&model, 6, config.first_noll(), 4.)?;
//! let mut rng = StdRng::seed_from_u64(123);
//! let turbulence = atmosphere::draw_realization(&covariance, 2, None, &mut rng)?;
//! let measurement = system::measure(&stacked, &turbulence);
//!
//! let tikhonov = inversion::solve_least_squares(&stacked, &measurement, 6, Some(&covariance))?;
//! let sparse = inversion::solve_sparse(
//!     &stacked,
//!     &measurement,
//!     &RegularizationWeight::Global(1e-5),
//!     6,
//!     &SparseOptions::default(),
//! )?;
//! assert_eq!(tikhonov.shape(), sparse.modes.shape());
//! # Ok(())
//! # }
//! ```

pub mod atmosphere;
pub mod cache;
mod error;
pub mod geometry;
pub mod inversion;
pub mod projection;
pub mod system;
pub mod zernike;

pub use atmosphere::TurbulenceModel;
pub use error::Error;
pub use geometry::{GeometryTriple, TomographyConfig};
pub use inversion::{
    solve_least_squares, solve_sparse, Method, RegularizationWeight, SparseOptions,
    SparseSolution,
};
pub use projection::ProjectionMethod;
pub use system::{measure, projection_tensor, stack, ProjectionTensor};
