//! System matrix assembly and forward model
//!
//! The per-(layer,star) projection matrices are gathered into a
//! [ProjectionTensor] and stacked into the block system matrix that maps the
//! turbulence Zernike coefficients of all the layers onto the WFS
//! measurements of all the guide stars.

use indicatif::ParallelProgressIterator;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::{
    cache::ProjectionStore,
    geometry::TomographyConfig,
    projection::{projection_matrix, ProjectionError},
};

#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    #[error("projection matrix computation failed")]
    Projection(#[from] ProjectionError),
    #[error(
        "projection tensor size mismatch (expected {expected} elements, got {got})"
    )]
    Size { expected: usize, got: usize },
}

/// Full projection matrix set of a tomography session
///
/// The matrices are kept in a C-order `[mode, mode, height, star]` tensor,
/// the layout the disk store persists.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTensor {
    n_modes: usize,
    n_heights: usize,
    n_stars: usize,
    data: Vec<f64>,
}

impl ProjectionTensor {
    pub fn zeros(n_modes: usize, n_heights: usize, n_stars: usize) -> Self {
        Self {
            n_modes,
            n_heights,
            n_stars,
            data: vec![0.; n_modes * n_modes * n_heights * n_stars],
        }
    }
    /// Wraps a C-order `[mode, mode, height, star]` buffer
    pub fn from_vec(
        n_modes: usize,
        n_heights: usize,
        n_stars: usize,
        data: Vec<f64>,
    ) -> Result<Self, SystemError> {
        let expected = n_modes * n_modes * n_heights * n_stars;
        if data.len() != expected {
            return Err(SystemError::Size {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            n_modes,
            n_heights,
            n_stars,
            data,
        })
    }
    /// Tensor shape as (modes, heights, stars)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.n_modes, self.n_heights, self.n_stars)
    }
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
    fn index(&self, m1: usize, m2: usize, height: usize, star: usize) -> usize {
        ((m1 * self.n_modes + m2) * self.n_heights + height) * self.n_stars + star
    }
    pub fn set_block(&mut self, height: usize, star: usize, block: &DMatrix<f64>) {
        for m1 in 0..self.n_modes {
            for m2 in 0..self.n_modes {
                let idx = self.index(m1, m2, height, star);
                self.data[idx] = block[(m1, m2)];
            }
        }
    }
    /// Projection matrix of the (height, star) pair
    pub fn block(&self, height: usize, star: usize) -> DMatrix<f64> {
        DMatrix::from_fn(self.n_modes, self.n_modes, |m1, m2| {
            self.data[self.index(m1, m2, height, star)]
        })
    }
    /// Extracts a subset of a superset tensor
    ///
    /// Keeps the first `n_modes` modes and the heights listed in `heights`,
    /// in the given order.
    pub fn subset(&self, n_modes: usize, heights: &[usize]) -> Self {
        assert!(n_modes <= self.n_modes && heights.iter().all(|h| *h < self.n_heights));
        let mut subset = Self::zeros(n_modes, heights.len(), self.n_stars);
        for (h, height) in heights.iter().enumerate() {
            for star in 0..self.n_stars {
                for m1 in 0..n_modes {
                    for m2 in 0..n_modes {
                        let idx = subset.index(m1, m2, h, star);
                        subset.data[idx] = self.data[self.index(m1, m2, *height, star)];
                    }
                }
            }
        }
        subset
    }
}

/// Computes the full projection tensor of a session
///
/// The (layer, star) pairs are independent and swept in parallel.
pub fn compute_tensor(config: &TomographyConfig) -> Result<ProjectionTensor, SystemError> {
    let pairs = config.pairs();
    let blocks = pairs
        .par_iter()
        .progress_count(pairs.len() as u64)
        .map(|&(layer, star)| {
            let triple = config.triple(layer, star);
            projection_matrix(
                config.n_modes(),
                config.first_noll(),
                triple.magnification,
                triple.scale,
                triple.rotation,
                config.method(),
            )
            .map(|matrix| (layer, star, matrix))
        })
        .collect::<Result<Vec<_>, ProjectionError>>()?;
    let mut tensor =
        ProjectionTensor::zeros(config.n_modes(), config.n_heights(), config.n_stars());
    for (layer, star, matrix) in blocks {
        tensor.set_block(layer, star, &matrix);
    }
    Ok(tensor)
}

/// Returns the session projection tensor, from the store when possible
///
/// The store is queried first for a record covering the session; the tensor
/// is computed and stored only on a miss.
pub fn projection_tensor<S: ProjectionStore>(
    config: &TomographyConfig,
    store: &mut S,
) -> Result<ProjectionTensor, crate::Error> {
    if let Some(tensor) = store.find(config)? {
        log::info!("projection matrices found in the store");
        return Ok(tensor);
    }
    log::info!(
        "computing {} projection matrices:\n{}",
        config.n_heights() * config.n_stars(),
        config
    );
    let tensor = compute_tensor(config)?;
    store.store(config, &tensor)?;
    Ok(tensor)
}

/// Stacks the projection tensor into the system matrix
///
/// Block (i, j) of the stacked matrix maps the Zernike coefficients of layer
/// j onto the WFS measurements of star i; coefficient vectors are layer-major.
pub fn stack(tensor: &ProjectionTensor) -> DMatrix<f64> {
    let (n_modes, n_heights, n_stars) = tensor.shape();
    let mut stacked = DMatrix::<f64>::zeros(n_stars * n_modes, n_heights * n_modes);
    for height in 0..n_heights {
        for star in 0..n_stars {
            stacked
                .view_mut((star * n_modes, height * n_modes), (n_modes, n_modes))
                .copy_from(&tensor.block(height, star));
        }
    }
    stacked
}

/// Applies the system matrix to a turbulence realization
///
/// Pure forward model; measurement noise is the caller's concern.
pub fn measure(stacked: &DMatrix<f64>, modes: &DMatrix<f64>) -> DVector<f64> {
    stacked * DVector::from_column_slice(modes.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_tensor(n_modes: usize, n_heights: usize, n_stars: usize) -> ProjectionTensor {
        let mut tensor = ProjectionTensor::zeros(n_modes, n_heights, n_stars);
        for height in 0..n_heights {
            for star in 0..n_stars {
                let tag = (10 * height + star) as f64;
                tensor.set_block(height, star, &DMatrix::repeat(n_modes, n_modes, tag));
            }
        }
        tensor
    }

    #[test]
    fn block_round_trip() {
        let tensor = tagged_tensor(3, 2, 4);
        assert_eq!(tensor.block(1, 2), DMatrix::repeat(3, 3, 12.));
    }

    #[test]
    fn stacking_block_layout() {
        let n_modes = 2;
        let stacked = stack(&tagged_tensor(n_modes, 3, 2));
        assert_eq!(stacked.nrows(), 2 * n_modes);
        assert_eq!(stacked.ncols(), 3 * n_modes);
        // block (star, height) holds the (height, star) projection matrix
        for height in 0..3 {
            for star in 0..2 {
                let block = stacked.view((star * n_modes, height * n_modes), (n_modes, n_modes));
                assert!(block.iter().all(|x| *x == (10 * height + star) as f64));
            }
        }
    }

    #[test]
    fn subset_of_superset() {
        let tensor = tagged_tensor(4, 5, 3);
        let subset = tensor.subset(2, &[0, 2, 4]);
        assert_eq!(subset.shape(), (2, 3, 3));
        assert_eq!(subset.block(1, 0), DMatrix::repeat(2, 2, 20.));
        assert_eq!(subset.block(2, 2), DMatrix::repeat(2, 2, 42.));
    }

    #[test]
    fn forward_model_is_the_stacked_product() {
        let tensor = tagged_tensor(2, 2, 2);
        let stacked = stack(&tensor);
        let modes = DMatrix::from_column_slice(2, 2, &[1., 2., 3., 4.]);
        let b = measure(&stacked, &modes);
        let flat = DVector::from_column_slice(&[1., 2., 3., 4.]);
        assert_eq!(b, &stacked * flat);
    }
}
