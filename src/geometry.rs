//! Tomography session geometry
//!
//! A [TomographyConfig] freezes the observing geometry for the lifetime of a
//! tomography session: guide star asterism, Zernike mode count, field-of-view,
//! telescope diameter and the altitudes of the reconstructed turbulence
//! layers. Everything else (metapupil diameters, per-(layer,star) geometry
//! triples) derives from it.

use std::fmt;

use itertools::Itertools;

use crate::projection::ProjectionMethod;

const RAD2ARCSEC: f64 = 206265.;

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Footprint of a turbulence layer along one guide star direction
///
/// The triple locates the star pupil within the layer metapupil, both reduced
/// to unit disks: `scale` is the footprint center displacement in units of
/// the metapupil radius, `magnification` the metapupil to telescope diameter
/// ratio and `rotation` the star azimuth on the field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryTriple {
    pub scale: f64,
    pub magnification: f64,
    pub rotation: f64,
}

/// Immutable tomography session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TomographyConfig {
    n_stars: usize,
    n_modes: usize,
    // field-of-view [rd]
    fov: f64,
    // telescope diameter [m]
    diameter: f64,
    // layer altitudes [m]
    heights: Vec<f64>,
    piston: bool,
    method: ProjectionMethod,
}

impl TomographyConfig {
    /// Creates a new configuration
    ///
    /// The guide stars are laid out evenly on a circle of diameter `fov`
    /// [arcsec]; `heights` are the turbulence layer altitudes [km] and
    /// `diameter` the telescope diameter [m]. The piston mode is excluded.
    pub fn new(
        n_stars: usize,
        n_modes: usize,
        fov: f64,
        heights: &[f64],
        diameter: f64,
    ) -> Result<Self, GeometryError> {
        if n_stars == 0 {
            return Err(GeometryError::InvalidParameter(
                "at least one guide star is required".into(),
            ));
        }
        if n_modes == 0 {
            return Err(GeometryError::InvalidParameter(
                "at least one Zernike mode is required".into(),
            ));
        }
        if !(diameter > 0.) {
            return Err(GeometryError::InvalidParameter(format!(
                "the telescope diameter must be positive (got {diameter}m)"
            )));
        }
        if !(fov >= 0.) {
            return Err(GeometryError::InvalidParameter(format!(
                "the field-of-view must be non-negative (got {fov}arcsec)"
            )));
        }
        if heights.is_empty() {
            return Err(GeometryError::InvalidParameter(
                "at least one layer altitude is required".into(),
            ));
        }
        if let Some(h) = heights.iter().find(|h| !(**h >= 0.)) {
            return Err(GeometryError::InvalidParameter(format!(
                "layer altitudes must be non-negative (got {h}km)"
            )));
        }
        Ok(Self {
            n_stars,
            n_modes,
            fov: fov / RAD2ARCSEC,
            diameter,
            heights: heights.iter().map(|h| h * 1e3).collect(),
            piston: false,
            method: ProjectionMethod::default(),
        })
    }
    /// Includes the piston mode in the Zernike expansions
    pub fn with_piston(self) -> Self {
        Self {
            piston: true,
            ..self
        }
    }
    /// Sets the projection matrix computation method
    pub fn projection_method(self, method: ProjectionMethod) -> Self {
        Self { method, ..self }
    }
    pub fn n_stars(&self) -> usize {
        self.n_stars
    }
    pub fn n_modes(&self) -> usize {
        self.n_modes
    }
    pub fn n_heights(&self) -> usize {
        self.heights.len()
    }
    /// Field-of-view [arcsec]
    pub fn fov_arcsec(&self) -> f64 {
        self.fov * RAD2ARCSEC
    }
    /// Telescope diameter [m]
    pub fn diameter(&self) -> f64 {
        self.diameter
    }
    /// Layer altitudes [km]
    pub fn heights_km(&self) -> Vec<f64> {
        self.heights.iter().map(|h| h * 1e-3).collect()
    }
    pub fn method(&self) -> ProjectionMethod {
        self.method
    }
    /// Noll index of the first expanded mode (1 with piston, 2 without)
    pub fn first_noll(&self) -> usize {
        if self.piston {
            1
        } else {
            2
        }
    }
    /// Metapupil diameter [m] of layer `i`
    pub fn metapupil_diameter(&self, layer: usize) -> f64 {
        self.diameter + self.heights[layer] * self.fov
    }
    /// Geometry triple of the (layer, star) pair
    pub fn triple(&self, layer: usize, star: usize) -> GeometryTriple {
        let dm = self.metapupil_diameter(layer);
        GeometryTriple {
            scale: self.heights[layer] * self.fov / dm,
            magnification: dm / self.diameter,
            rotation: star as f64 * 2. * std::f64::consts::PI / self.n_stars as f64,
        }
    }
    /// All the (layer, star) pairs in layer-major order
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        (0..self.n_heights())
            .cartesian_product(0..self.n_stars)
            .collect()
    }
    /// Maps layer altitudes [km] to their indices in the altitude grid
    ///
    /// Altitudes absent from the grid are silently dropped, like the
    /// keep-list of [crate::atmosphere::draw_realization] expects.
    pub fn layer_indices(&self, heights_km: &[f64]) -> Vec<usize> {
        self.heights
            .iter()
            .enumerate()
            .filter(|(_, h)| heights_km.iter().any(|k| (k * 1e3 - **h).abs() < 1e-6))
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Display for TomographyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " - Zernike modes: {}", self.n_modes)?;
        writeln!(
            f,
            " - number of heights: {} -> {:.1?} km",
            self.n_heights(),
            self.heights_km()
        )?;
        writeln!(f, " - FOV: {:.1} arcsec", self.fov_arcsec())?;
        writeln!(f, " - number of stars: {}", self.n_stars)?;
        write!(f, " - projection: {}", self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_layer_is_identity() {
        let cfg = TomographyConfig::new(3, 10, 60., &[0., 10.], 4.).unwrap();
        let t = cfg.triple(0, 1);
        assert_eq!(t.scale, 0.);
        assert_eq!(t.magnification, 1.);
    }

    #[test]
    fn triple_bounds() {
        let cfg = TomographyConfig::new(5, 30, 60., &[0., 5., 10., 20.], 4.).unwrap();
        for (i, j) in cfg.pairs() {
            let t = cfg.triple(i, j);
            assert!((0. ..1.).contains(&t.scale));
            assert!(t.magnification >= 1.);
        }
    }

    #[test]
    fn rejects_non_positive_diameter() {
        assert!(TomographyConfig::new(3, 10, 60., &[0.], 0.).is_err());
        assert!(TomographyConfig::new(3, 10, 60., &[0.], -1.).is_err());
    }

    #[test]
    fn layer_indices_from_altitudes() {
        let cfg = TomographyConfig::new(3, 10, 60., &[0., 4., 8., 16.], 4.).unwrap();
        assert_eq!(cfg.layer_indices(&[0., 16.]), vec![0, 3]);
        assert_eq!(cfg.layer_indices(&[2.]), Vec::<usize>::new());
    }
}
