//! Regularized least-squares inversion

use nalgebra::{DMatrix, DVector};

use super::InversionError;

/// Block diagonal replication of a square matrix
fn block_diagonal(block: &DMatrix<f64>, n: usize) -> DMatrix<f64> {
    let size = block.nrows();
    let mut matrix = DMatrix::<f64>::zeros(size * n, size * n);
    for k in 0..n {
        matrix
            .view_mut((k * size, k * size), (size, size))
            .copy_from(block);
    }
    matrix
}

/// Least-squares tomographic estimate
///
/// Solves the normal equations `(M'M) x = M' b`. With a covariance matrix,
/// the solve is Tikhonov-regularized with the block diagonal inverse
/// covariance, one block per layer: `(M'M + C'C) x = M' b`, penalizing
/// solutions at odds with the turbulence statistics.
///
/// A numerically degenerate normal matrix (or covariance) aborts the solve;
/// there is no silent fallback to a pseudo-inverse.
pub fn solve_least_squares(
    stacked: &DMatrix<f64>,
    measurement: &DVector<f64>,
    n_modes: usize,
    regularization: Option<&DMatrix<f64>>,
) -> Result<DMatrix<f64>, InversionError> {
    if n_modes == 0 || stacked.ncols() % n_modes != 0 {
        return Err(InversionError::InvalidParameter(format!(
            "{} system matrix columns do not split into {n_modes} modes per layer",
            stacked.ncols()
        )));
    }
    let n_layers = stacked.ncols() / n_modes;
    let mut normal = stacked.tr_mul(stacked);
    if let Some(covariance) = regularization {
        if covariance.nrows() != n_modes || covariance.ncols() != n_modes {
            return Err(InversionError::InvalidParameter(format!(
                "the covariance matrix is {}x{}, expected {n_modes}x{n_modes}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        let inverse = covariance
            .clone()
            .try_inverse()
            .ok_or(InversionError::SingularMatrix)?;
        let penalty = block_diagonal(&inverse, n_layers);
        normal += penalty.tr_mul(&penalty);
    }
    let x = normal
        .lu()
        .solve(&stacked.tr_mul(measurement))
        .ok_or(InversionError::SingularMatrix)?;
    Ok(DMatrix::from_column_slice(n_modes, n_layers, x.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn well_conditioned(n: usize, rng: &mut StdRng) -> DMatrix<f64> {
        DMatrix::<f64>::identity(n, n)
            + DMatrix::from_fn(n, n, |_, _| 0.1 * rng.sample::<f64, _>(StandardNormal))
    }

    #[test]
    fn noiseless_recovery() {
        let mut rng = StdRng::seed_from_u64(3);
        let stacked = well_conditioned(8, &mut rng);
        let x = DVector::<f64>::from_fn(8, |_, _| rng.sample::<f64, _>(StandardNormal));
        let b = &stacked * &x;
        let estimate = solve_least_squares(&stacked, &b, 4, None).unwrap();
        let flat = DVector::from_column_slice(estimate.as_slice());
        assert!((&flat - &x).norm() / x.norm() < 1e-8);
    }

    #[test]
    fn regularization_shrinks_the_estimate() {
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let stacked = well_conditioned(8, &mut rng);
            let b = DVector::<f64>::from_fn(8, |_, _| rng.sample::<f64, _>(StandardNormal));
            let covariance = DMatrix::<f64>::identity(4, 4);
            let plain = solve_least_squares(&stacked, &b, 4, None).unwrap();
            let tikhonov = solve_least_squares(&stacked, &b, 4, Some(&covariance)).unwrap();
            assert!(tikhonov.norm() <= plain.norm() * (1. + 1e-12), "seed {seed}");
        }
    }

    #[test]
    fn singular_system_is_an_error() {
        let mut stacked = DMatrix::<f64>::identity(4, 4);
        stacked.set_column(2, &DVector::zeros(4));
        let b = DVector::<f64>::repeat(4, 1.);
        assert!(matches!(
            solve_least_squares(&stacked, &b, 2, None),
            Err(InversionError::SingularMatrix)
        ));
    }

    #[test]
    fn singular_covariance_is_an_error() {
        let stacked = DMatrix::<f64>::identity(4, 4);
        let b = DVector::<f64>::repeat(4, 1.);
        let covariance = DMatrix::<f64>::zeros(2, 2);
        assert!(matches!(
            solve_least_squares(&stacked, &b, 2, Some(&covariance)),
            Err(InversionError::SingularMatrix)
        ));
    }
}
