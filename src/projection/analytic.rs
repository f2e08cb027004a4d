//! Exact projection through the Cartesian monomial basis
//!
//! The pupil map is affine so a remapped Zernike mode stays a polynomial of
//! the same degree. Each mode is expanded on the monomials `x^p y^q`, the
//! affine map is applied by binomial expansion and the result is projected
//! back onto the footprint Zernike basis with the exact monomial inner
//! products over the unit disk.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use statrs::function::factorial::binomial;

use super::ProjectionError;
use crate::zernike;

/// Index of `x^p y^q` in the degree-graded monomial basis
fn monomial_index(p: u32, q: u32) -> usize {
    let d = (p + q) as usize;
    d * (d + 1) / 2 + q as usize
}

fn monomial_count(degree: u32) -> usize {
    let d = degree as usize;
    (d + 1) * (d + 2) / 2
}

fn double_factorial(k: i64) -> f64 {
    if k <= 0 {
        1.
    } else {
        k as f64 * double_factorial(k - 2)
    }
}

/// Integral of `x^a y^b` over the unit disk
fn disk_moment(a: u32, b: u32) -> f64 {
    if a % 2 == 1 || b % 2 == 1 {
        0.
    } else {
        2. * PI * double_factorial(a as i64 - 1) * double_factorial(b as i64 - 1)
            / double_factorial((a + b + 2) as i64)
    }
}

/// Monomial coefficients of the Zernike mode `j`
fn monomial_coefficients(j: usize, n_monomials: usize) -> Vec<f64> {
    let (n, m) = zernike::noll_indices(j);
    let norm = zernike::normalization(j);
    let mut coeffs = vec![0.; n_monomials];
    for (power, c) in zernike::radial_polynomial(n, m) {
        // r^power trig(m theta) = (x^2+y^2)^t * Re|Im[(x+iy)^m]
        let t = (power - m) / 2;
        for a in 0..=t {
            let radial = c * binomial(t as u64, a as u64);
            if m == 0 {
                coeffs[monomial_index(2 * a, 2 * (t - a))] += norm * radial;
                continue;
            }
            for b in 0..=m {
                // even j carries the cosine (real part), odd j the sine
                let (keep, sign) = if j % 2 == 0 {
                    (b % 2 == 0, if (b / 2) % 2 == 0 { 1. } else { -1. })
                } else {
                    (b % 2 == 1, if b > 0 && ((b - 1) / 2) % 2 == 1 { -1. } else { 1. })
                };
                if keep {
                    let trig = sign * binomial(m as u64, b as u64);
                    coeffs[monomial_index(2 * a + m - b, 2 * (t - a) + b)] +=
                        norm * radial * trig;
                }
            }
        }
    }
    coeffs
}

/// Monomial coefficient transform of the affine pupil map
fn pupil_map_transform(
    degree: u32,
    magnification: f64,
    scale: f64,
    rotation: f64,
) -> DMatrix<f64> {
    let nm = monomial_count(degree);
    let dx = scale * rotation.cos();
    let dy = scale * rotation.sin();
    let mut transform = DMatrix::<f64>::zeros(nm, nm);
    for d in 0..=degree {
        for p in (0..=d).rev() {
            let q = d - p;
            let col = monomial_index(p, q);
            for a in 0..=p {
                for c in 0..=q {
                    transform[(monomial_index(a, c), col)] += binomial(p as u64, a as u64)
                        * binomial(q as u64, c as u64)
                        * magnification.powi(-((a + c) as i32))
                        * dx.powi((p - a) as i32)
                        * dy.powi((q - c) as i32);
                }
            }
        }
    }
    transform
}

pub(super) fn projection_matrix(
    n_modes: usize,
    first_noll: usize,
    magnification: f64,
    scale: f64,
    rotation: f64,
) -> Result<DMatrix<f64>, ProjectionError> {
    // Noll ordering is graded by radial degree so the last mode carries the
    // highest one
    let (degree, _) = zernike::noll_indices(first_noll + n_modes - 1);
    let nm = monomial_count(degree);
    let monomials: Vec<(u32, u32)> = (0..=degree)
        .flat_map(|d| (0..=d).rev().map(move |p| (p, d - p)))
        .collect();

    let mut footprint = DMatrix::<f64>::zeros(nm, n_modes);
    for i in 0..n_modes {
        footprint.set_column(
            i,
            &DVector::from_vec(monomial_coefficients(i + first_noll, nm)),
        );
    }
    let moments = DMatrix::from_fn(nm, nm, |r, c| {
        disk_moment(
            monomials[r].0 + monomials[c].0,
            monomials[r].1 + monomials[c].1,
        )
    });
    let remapped =
        pupil_map_transform(degree, magnification, scale, rotation) * &footprint;

    // orthogonal projection onto the footprint basis; the Gram matrix is
    // pi x identity for an orthonormal mode set
    let projector = footprint.transpose() * moments;
    let gram = &projector * &footprint;
    let rhs = &projector * &remapped;
    gram.lu().solve(&rhs).ok_or(ProjectionError::SingularBasis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_disk_moments() {
        assert!((disk_moment(0, 0) - PI).abs() < 1e-14);
        assert!((disk_moment(2, 0) - PI / 4.).abs() < 1e-14);
        assert_eq!(disk_moment(1, 2), 0.);
    }

    #[test]
    fn defocus_monomials() {
        // Z_4 = sqrt(3)(2x^2 + 2y^2 - 1)
        let coeffs = monomial_coefficients(4, monomial_count(2));
        let sqrt3 = 3f64.sqrt();
        assert!((coeffs[monomial_index(0, 0)] + sqrt3).abs() < 1e-12);
        assert!((coeffs[monomial_index(2, 0)] - 2. * sqrt3).abs() < 1e-12);
        assert!((coeffs[monomial_index(0, 2)] - 2. * sqrt3).abs() < 1e-12);
        assert!(coeffs[monomial_index(1, 1)].abs() < 1e-12);
    }

    #[test]
    fn astigmatism_monomials() {
        // Z_5 = sqrt(6) 2xy, Z_6 = sqrt(6)(x^2 - y^2)
        let sqrt6 = 6f64.sqrt();
        let sine = monomial_coefficients(5, monomial_count(2));
        assert!((sine[monomial_index(1, 1)] - 2. * sqrt6).abs() < 1e-12);
        let cosine = monomial_coefficients(6, monomial_count(2));
        assert!((cosine[monomial_index(2, 0)] - sqrt6).abs() < 1e-12);
        assert!((cosine[monomial_index(0, 2)] + sqrt6).abs() < 1e-12);
    }
}
