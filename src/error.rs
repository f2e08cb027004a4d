use crate::{
    atmosphere::AtmosphereError, cache::CacheError, geometry::GeometryError,
    inversion::InversionError, projection::ProjectionError, system::SystemError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `geometry` module")]
    Geometry(#[from] GeometryError),
    #[error("Error in the `projection` module")]
    Projection(#[from] ProjectionError),
    #[error("Error in the `atmosphere` module")]
    Atmosphere(#[from] AtmosphereError),
    #[error("Error in the `system` module")]
    System(#[from] SystemError),
    #[error("Error in the `cache` module")]
    Cache(#[from] CacheError),
    #[error("Error in the `inversion` module")]
    Inversion(#[from] InversionError),
}
