//! Least-squares projection on a Cartesian footprint sampling

use nalgebra::DMatrix;

use super::{remap, ProjectionError};
use crate::zernike;

pub(super) fn projection_matrix(
    n_modes: usize,
    first_noll: usize,
    magnification: f64,
    scale: f64,
    rotation: f64,
    resolution: usize,
) -> Result<DMatrix<f64>, ProjectionError> {
    if resolution < 2 {
        return Err(ProjectionError::Resolution(resolution));
    }
    let step = 2. / (resolution - 1) as f64;
    let points: Vec<(f64, f64)> = (0..resolution * resolution)
        .map(|k| {
            (
                (k / resolution) as f64 * step - 1.,
                (k % resolution) as f64 * step - 1.,
            )
        })
        .filter(|(x, y)| x * x + y * y <= 1.)
        .collect();

    // footprint modes sampled in footprint coordinates and metapupil modes
    // sampled through the pupil map
    let local = DMatrix::from_fn(points.len(), n_modes, |p, i| {
        let (x, y) = points[p];
        zernike::evaluate(i + first_noll, x, y)
    });
    let global = DMatrix::from_fn(points.len(), n_modes, |p, j| {
        let (x, y) = points[p];
        let (u, v) = remap(magnification, scale, rotation, x, y);
        zernike::evaluate(j + first_noll, u, v)
    });

    let gram = local.tr_mul(&local);
    let rhs = local.tr_mul(&global);
    gram.lu()
        .solve(&rhs)
        .ok_or(ProjectionError::SingularBasis)
}
