//! Tomographic inversion
//!
//! Two estimators recover the layered turbulence from the stacked WFS
//! measurements: a (Tikhonov) regularized least-squares solve and a
//! sparsity-promoting accelerated proximal-gradient solve. Both consume the
//! same system matrix and measurement vector and return the estimate as a
//! `[mode, layer]` matrix matching the realization layout.

use std::fmt;

mod least_squares;
mod sparse;

pub use least_squares::solve_least_squares;
pub use sparse::{
    soft_threshold, solve_sparse, RegularizationWeight, SparseOptions, SparseSolution,
};

#[derive(thiserror::Error, Debug)]
pub enum InversionError {
    #[error("the normal matrix is singular")]
    SingularMatrix,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Inversion method tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Method {
    LeastSquares,
    Sparse,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::LeastSquares => write!(f, "least-squares"),
            Method::Sparse => write!(f, "sparse"),
        }
    }
}
