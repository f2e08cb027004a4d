//! Zernike mode bookkeeping
//!
//! Modes are identified by their Noll index `j>=1` and split into a radial
//! degree `n` and an azimuthal frequency `m`, with the usual Noll convention
//! for the sine/cosine pairs: even `j` carries the cosine term, odd `j` the
//! sine term.

use statrs::function::factorial::factorial;

/// Radial degree and azimuthal frequency of the Noll index `j`
///
/// # Panics
///
/// Panics if `j` is zero (Noll indices start at 1, the piston mode).
pub fn noll_indices(j: usize) -> (u32, u32) {
    assert!(j > 0, "Noll indices start at 1");
    let mut n = 0usize;
    while j > (n + 1) * (n + 2) / 2 {
        n += 1;
    }
    // 1-based rank of the mode within its radial order
    let m_prime = j - n * (n + 1) / 2;
    let m = if n % 2 == 0 {
        2 * (m_prime / 2)
    } else {
        1 + 2 * ((m_prime - 1) / 2)
    };
    (n as u32, m as u32)
}

/// Coefficients of the radial polynomial `R_n^m`
///
/// Returns the `(power, coefficient)` pairs of the even polynomial
/// `R_n^m(r) = sum_k c_k r^(n-2k)`.
pub fn radial_polynomial(n: u32, m: u32) -> Vec<(u32, f64)> {
    assert!(m <= n && (n - m) % 2 == 0, "invalid radial degree pair");
    (0..=(n - m) / 2)
        .map(|k| {
            let sign = if k % 2 == 0 { 1f64 } else { -1f64 };
            let num = factorial((n - k) as u64);
            let den = factorial(k as u64)
                * factorial(((n + m) / 2 - k) as u64)
                * factorial(((n - m) / 2 - k) as u64);
            (n - 2 * k, sign * num / den)
        })
        .collect()
}

/// Noll normalization factor of mode `j`
pub fn normalization(j: usize) -> f64 {
    let (n, m) = noll_indices(j);
    if m == 0 {
        ((n + 1) as f64).sqrt()
    } else {
        (2. * (n + 1) as f64).sqrt()
    }
}

/// Zernike mode `j` evaluated at the unit-disk point `(x, y)`
pub fn evaluate(j: usize, x: f64, y: f64) -> f64 {
    let (n, m) = noll_indices(j);
    let r = x.hypot(y);
    let radial: f64 = radial_polynomial(n, m)
        .into_iter()
        .map(|(p, c)| c * r.powi(p as i32))
        .sum();
    let azimuthal = if m == 0 {
        1f64
    } else {
        let theta = y.atan2(x);
        if j % 2 == 0 {
            (m as f64 * theta).cos()
        } else {
            (m as f64 * theta).sin()
        }
    };
    normalization(j) * radial * azimuthal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noll_table() {
        let nm: Vec<_> = (1..=11).map(noll_indices).collect();
        assert_eq!(
            nm,
            vec![
                (0, 0),
                (1, 1),
                (1, 1),
                (2, 0),
                (2, 2),
                (2, 2),
                (3, 1),
                (3, 1),
                (3, 3),
                (3, 3),
                (4, 0)
            ]
        );
    }

    #[test]
    fn defocus_radial() {
        // R_2^0(r) = 2r^2 - 1
        let r = 0.5f64;
        let value: f64 = radial_polynomial(2, 0)
            .into_iter()
            .map(|(p, c)| c * r.powi(p as i32))
            .sum();
        assert!((value + 0.5).abs() < 1e-14);
    }

    #[test]
    fn defocus_on_axis() {
        // Z_4(0, 0) = -sqrt(3)
        assert!((evaluate(4, 0., 0.) + 3f64.sqrt()).abs() < 1e-14);
    }

    #[test]
    fn tip_tilt_split() {
        // j=2 is the cosine (x) tilt, j=3 the sine (y) tilt
        assert!((evaluate(2, 0.7, 0.) - 2. * 0.7).abs() < 1e-14);
        assert!(evaluate(2, 0., 0.7).abs() < 1e-14);
        assert!((evaluate(3, 0., 0.7) - 2. * 0.7).abs() < 1e-14);
    }
}
