//! Zernike turbulence statistics
//!
//! Closed-form covariance of the Zernike expansion of a turbulent wavefront,
//! for the Kolmogorov and von Karman power spectra, and synthetic turbulence
//! realizations drawn from it. Covariance entries follow the Noll expansion:
//! they vanish unless the two modes share their azimuthal frequency and the
//! index difference is even.

use std::f64::consts::PI;
use std::fmt;

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use statrs::function::{factorial::factorial, gamma::gamma};

use crate::zernike;

/// Truncation of the von Karman covariance series
const VON_KARMAN_TERMS: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum AtmosphereError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("the Zernike covariance matrix is not positive definite")]
    IndefiniteCovariance,
}

/// Turbulence power spectrum model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurbulenceModel {
    /// Kolmogorov spectrum, set by the Fried parameter `r0` [m]
    Kolmogorov { r0: f64 },
    /// Von Karman spectrum, set by the Fried parameter `r0` [m] and the
    /// outer scale `l0` [m]
    VonKarman { r0: f64, l0: f64 },
}

impl fmt::Display for TurbulenceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kolmogorov { r0 } => write!(f, "Kolmogorov (r0: {r0}m)"),
            Self::VonKarman { r0, l0 } => {
                write!(f, "von Karman (r0: {r0}m, L0: {l0}m)")
            }
        }
    }
}

impl TurbulenceModel {
    fn validate(&self, diameter: f64) -> Result<(), AtmosphereError> {
        if !(diameter > 0.) {
            return Err(AtmosphereError::InvalidParameter(format!(
                "the telescope diameter must be positive (got {diameter}m)"
            )));
        }
        let r0 = match self {
            Self::Kolmogorov { r0 } => *r0,
            Self::VonKarman { r0, .. } => *r0,
        };
        if !(r0 > 0.) {
            return Err(AtmosphereError::InvalidParameter(format!(
                "the Fried parameter must be positive (got {r0}m)"
            )));
        }
        if let Self::VonKarman { l0, .. } = self {
            if !(*l0 > 0.) {
                return Err(AtmosphereError::InvalidParameter(format!(
                    "the outer scale must be positive (got {l0}m)"
                )));
            }
        }
        Ok(())
    }
}

/// Covariance matrix of the turbulent Zernike coefficients
///
/// The expansion starts at the Noll index `first_noll` and runs over
/// `n_modes` modes; `diameter` is the telescope diameter [m].
pub fn covariance(
    model: &TurbulenceModel,
    n_modes: usize,
    first_noll: usize,
    diameter: f64,
) -> Result<DMatrix<f64>, AtmosphereError> {
    model.validate(diameter)?;
    let mut cov = DMatrix::<f64>::zeros(n_modes, n_modes);
    for i in 0..n_modes {
        let (ni, mi) = zernike::noll_indices(i + first_noll);
        for j in 0..n_modes {
            let (nj, mj) = zernike::noll_indices(j + first_noll);
            if (i + j) % 2 != 0 || mi != mj {
                continue;
            }
            cov[(i, j)] = match model {
                TurbulenceModel::Kolmogorov { r0 } => {
                    kolmogorov_entry(ni, nj, mi, diameter / r0)
                }
                TurbulenceModel::VonKarman { r0, l0 } => von_karman_entry(
                    ni,
                    nj,
                    mi,
                    diameter / r0,
                    PI * diameter / l0,
                    VON_KARMAN_TERMS,
                ),
            };
        }
    }
    Ok(cov)
}

fn kolmogorov_entry(ni: u32, nj: u32, m: u32, d_r0: f64) -> f64 {
    let (nif, njf) = (ni as f64, nj as f64);
    let phase = (-1f64).powi(((ni + nj - 2 * m) / 2) as i32);
    let t1 = ((nif + 1.) * (njf + 1.)).sqrt() * PI.powf(8. / 3.) * 0.0072 * d_r0.powf(5. / 3.);
    let t2 = gamma(14. / 3.) * gamma(0.5 * (nif + njf - 5. / 3.));
    let t3 = gamma(0.5 * (nif - njf + 17. / 3.))
        * gamma(0.5 * (njf - nif + 17. / 3.))
        * gamma(0.5 * (nif + njf + 23. / 3.));
    phase * t1 * t2 / t3
}

fn von_karman_entry(ni: u32, nj: u32, m: u32, d_r0: f64, pi_d_l0: f64, terms: usize) -> f64 {
    let (nif, njf) = (ni as f64, nj as f64);
    let phase = (-1f64).powi(((ni + nj - 2 * m) / 2) as i32);
    let t1 = ((nif + 1.) * (njf + 1.)).sqrt() * PI.powf(8. / 3.) * 1.16 * d_r0.powf(5. / 3.);
    (0..terms)
        .map(|k| {
            let kf = k as f64;
            let phase2 = (-1f64).powi(k as i32) / factorial(k as u64)
                * pi_d_l0.powf(2. * kf + nif + njf - 5. / 3.);
            let t2 = gamma(kf + 0.5 * (3. + nif + njf))
                * gamma(kf + 2. + 0.5 * (nif + njf))
                * gamma(kf + 1. + 0.2 * (nif + njf))
                * gamma(5. / 6. - kf - 0.5 * (nif + njf));
            let t3 = gamma(3. + kf + nif + njf) * gamma(2. + kf + nif) * gamma(2. + kf + njf);
            let phase3 = pi_d_l0.powf(2. * kf);
            let t4 = gamma(0.5 * (nif + njf) - 5. / 6. - kf)
                * gamma(kf + 7. / 3.)
                * gamma(kf + 17. / 6.)
                * gamma(kf + 11. / 6.);
            let t5 = gamma(0.5 * (nif + njf) + 23. / 6. + kf)
                * gamma(0.5 * (nif - njf) + 17. / 6. + kf)
                * gamma(0.5 * (nif - njf) + 17. / 6. + kf);
            phase * t1 * (phase2 * t2 / t3 + phase3 * t4 / t5)
        })
        .sum()
}

/// Draws a turbulence realization, one independent sample per layer
///
/// Each column is a zero-mean multivariate normal sample with the given
/// covariance. With a keep-list, the columns of the layers not in the list
/// are set to zero; the random stream is consumed for every layer so the
/// kept columns do not depend on the list.
pub fn draw_realization<R: Rng>(
    covariance: &DMatrix<f64>,
    n_layers: usize,
    keep: Option<&[usize]>,
    rng: &mut R,
) -> Result<DMatrix<f64>, AtmosphereError> {
    let n_modes = covariance.nrows();
    let lower = Cholesky::new(covariance.clone())
        .ok_or(AtmosphereError::IndefiniteCovariance)?
        .l();
    let mut modes = DMatrix::<f64>::zeros(n_modes, n_layers);
    for layer in 0..n_layers {
        let z = DVector::from_fn(n_modes, |_, _| rng.sample::<f64, _>(StandardNormal));
        if keep.map_or(true, |keep| keep.contains(&layer)) {
            modes.set_column(layer, &(&lower * z));
        }
    }
    Ok(modes)
}
