//! Error types for causalkit.

use thiserror::Error;

/// causalkit error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input table, or missing values in a column the
    /// computation requires to be complete.
    #[error("Data error: {0}")]
    Data(String),

    /// No valid adjustment set exists for the requested
    /// treatment/outcome pair, and no explicit confounders were given.
    #[error("Identification error: {0}")]
    Identification(String),

    /// Unknown estimation or refutation method name.
    #[error("Unsupported method: {0:?}")]
    UnsupportedMethod(String),

    /// Numerical computation failure (e.g. singular design matrix).
    #[error("Computation error: {0}")]
    Computation(String),

    /// Invalid argument.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
