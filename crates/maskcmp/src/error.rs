// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

/// Error type for mask comparison operations.
///
/// Boundary errors (shape, label values, matrix size, parameters) abort a
/// comparison before any metric is produced. Undefined statistics are not
/// errors: they surface as `NaN` in [`crate::MetricsRecord`].
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred during file operations.
    IoError(std::io::Error),
    /// Configuration parsing or loading error.
    ConfigError(config::ConfigError),
    /// JSON serialization or deserialization error.
    JsonError(serde_json::Error),
    /// Image decoding or encoding error.
    ImageError(image::ImageError),
    /// Directory traversal error while collecting slice images.
    WalkError(walkdir::Error),
    /// Truth and test rasters differ in width, height or depth.
    DimensionMismatch {
        /// Shape of the truth raster as (width, height, depth).
        truth: (usize, usize, usize),
        /// Shape of the test raster as (width, height, depth).
        test: (usize, usize, usize),
    },
    /// A raster sample is negative, fractional or not finite.
    InvalidLabelValue {
        /// Offending sample value.
        value: f64,
        /// Column of the sample.
        x: usize,
        /// Row of the sample.
        y: usize,
        /// Slice of the sample.
        z: usize,
    },
    /// The co-occurrence matrix for the label counts would exceed the limit.
    MatrixTooLarge {
        /// Number of truth rows (max truth label + 1).
        rows: usize,
        /// Number of test columns (max test label + 1).
        cols: usize,
        /// Configured cell limit.
        limit: usize,
    },
    /// Unsupported input or output file format.
    UnsupportedFormat(String),
    /// Invalid parameters provided to an operation.
    InvalidParameters(String),
    /// Attempted to use a feature that is not enabled.
    FeatureNotEnabled(String),
    /// Polars dataframe operation error (only with "polars" feature).
    #[cfg(feature = "polars")]
    PolarsError(polars::error::PolarsError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageError(err)
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkError(err)
    }
}

#[cfg(feature = "polars")]
impl From<polars::error::PolarsError> for Error {
    fn from(err: polars::error::PolarsError) -> Self {
        Error::PolarsError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
            Error::JsonError(e) => write!(f, "JSON error: {}", e),
            Error::ImageError(e) => write!(f, "Image error: {}", e),
            Error::WalkError(e) => write!(f, "Directory walk error: {}", e),
            Error::DimensionMismatch { truth, test } => write!(
                f,
                "Dimension mismatch: truth is {}x{}x{}, test is {}x{}x{}",
                truth.0, truth.1, truth.2, test.0, test.1, test.2
            ),
            Error::InvalidLabelValue { value, x, y, z } => write!(
                f,
                "Invalid label value {} at x={} y={} z={}",
                value, x, y, z
            ),
            Error::MatrixTooLarge { rows, cols, limit } => write!(
                f,
                "Label matrix of {}x{} cells exceeds the limit of {}",
                rows, cols, limit
            ),
            Error::UnsupportedFormat(s) => write!(f, "Unsupported format: {}", s),
            Error::InvalidParameters(s) => write!(f, "Invalid parameters: {}", s),
            Error::FeatureNotEnabled(s) => write!(f, "Feature not enabled: {}", s),
            #[cfg(feature = "polars")]
            Error::PolarsError(e) => write!(f, "Polars error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::ConfigError(e) => Some(e),
            Error::JsonError(e) => Some(e),
            Error::ImageError(e) => Some(e),
            Error::WalkError(e) => Some(e),
            #[cfg(feature = "polars")]
            Error::PolarsError(e) => Some(e),
            _ => None,
        }
    }
}
