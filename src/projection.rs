//! Zernike basis-change projection matrices
//!
//! The wavefront of a turbulence layer is expanded on the Zernike basis of
//! the layer metapupil; a guide star WFS sees it through the star footprint,
//! a displaced and contracted copy of the metapupil. The projection matrix of
//! a (layer, star) pair maps the metapupil Zernike coefficients onto the
//! footprint ones. Two computation methods are provided: a least-squares fit
//! on a Cartesian sampling of the footprint and an exact basis change through
//! the Cartesian monomial basis.

use std::fmt;

use nalgebra::DMatrix;

mod analytic;
mod numerical;

#[derive(thiserror::Error, Debug)]
pub enum ProjectionError {
    #[error("the footprint Zernike basis is degenerate")]
    SingularBasis,
    #[error("the sampling resolution must be at least 2 (got {0})")]
    Resolution(usize),
}

/// Projection matrix computation method
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectionMethod {
    /// Exact basis change through the Cartesian monomial basis
    Analytic,
    /// Least-squares fit on a `resolution`x`resolution` Cartesian sampling
    /// of the footprint
    Numerical { resolution: usize },
}

impl Default for ProjectionMethod {
    fn default() -> Self {
        Self::Numerical { resolution: 128 }
    }
}

impl fmt::Display for ProjectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analytic => write!(f, "analytic"),
            Self::Numerical { resolution } => write!(f, "numerical-{resolution}"),
        }
    }
}

/// Footprint coordinates mapped to the metapupil unit disk
///
/// Both pupils are reduced to unit disks; the footprint is contracted by the
/// magnification and displaced along the star azimuth.
pub(crate) fn remap(
    magnification: f64,
    scale: f64,
    rotation: f64,
    x: f64,
    y: f64,
) -> (f64, f64) {
    (
        x / magnification + scale * rotation.cos(),
        y / magnification + scale * rotation.sin(),
    )
}

/// Projection matrix from metapupil to footprint Zernike coefficients
///
/// The matrix is square with `n_modes` rows, the modes starting at the Noll
/// index `first_noll`. It is deterministic for identical arguments.
pub fn projection_matrix(
    n_modes: usize,
    first_noll: usize,
    magnification: f64,
    scale: f64,
    rotation: f64,
    method: ProjectionMethod,
) -> Result<DMatrix<f64>, ProjectionError> {
    match method {
        ProjectionMethod::Analytic => {
            analytic::projection_matrix(n_modes, first_noll, magnification, scale, rotation)
        }
        ProjectionMethod::Numerical { resolution } => numerical::projection_matrix(
            n_modes,
            first_noll,
            magnification,
            scale,
            rotation,
            resolution,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_layer_identity_numerical() {
        let m = projection_matrix(10, 2, 1., 0., 0., ProjectionMethod::Numerical {
            resolution: 64,
        })
        .unwrap();
        let eye = DMatrix::<f64>::identity(10, 10);
        assert!((&m - &eye).amax() < 1e-8, "{m:.3}");
    }

    #[test]
    fn ground_layer_identity_analytic() {
        let m = projection_matrix(10, 2, 1., 0., 0., ProjectionMethod::Analytic).unwrap();
        let eye = DMatrix::<f64>::identity(10, 10);
        assert!((&m - &eye).amax() < 1e-10, "{m:.3}");
    }

    #[test]
    fn analytic_matches_numerical() {
        // with the piston in and complete radial orders, the remapped modes
        // stay within the footprint basis span and both methods are exact
        let analytic =
            projection_matrix(10, 1, 1.6, 0.35, 2.1, ProjectionMethod::Analytic).unwrap();
        let numerical = projection_matrix(10, 1, 1.6, 0.35, 2.1, ProjectionMethod::Numerical {
            resolution: 96,
        })
        .unwrap();
        assert!((&analytic - &numerical).amax() < 1e-7);
    }

    #[test]
    fn deterministic() {
        let a = projection_matrix(6, 2, 1.3, 0.2, 1., ProjectionMethod::default()).unwrap();
        let b = projection_matrix(6, 2, 1.3, 0.2, 1., ProjectionMethod::default()).unwrap();
        assert_eq!(a, b);
    }
}
