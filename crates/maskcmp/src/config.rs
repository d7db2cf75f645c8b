// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Comparison parameters.
//!
//! [`ComparisonConfig::load`] layers, lowest priority first: built-in
//! defaults, a configuration file (TOML, JSON or YAML by extension) and
//! `MASKCMP_*` environment variables such as `MASKCMP_MIN_SIZE=10`.

use crate::{
    Error,
    histogram::DEFAULT_MAX_MATRIX_CELLS,
    matching::MatchPolicy,
    metrics::ThresholdSweep,
    validity::{BorderFilter, BorderMode},
};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "MASKCMP";

/// How objects are formed and matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorMode {
    /// Whole-stack label histograms, IoU matrix and histogram-route matching.
    /// Default border mode: [`BorderMode::StripScan`].
    #[default]
    Histogram,
    /// Per-slice connected objects with greedy exchange matching and stack
    /// totals summed over slices. Default border mode:
    /// [`BorderMode::CenterDistance`].
    Objects,
}

impl ComparatorMode {
    pub fn default_border_mode(&self) -> BorderMode {
        match self {
            ComparatorMode::Histogram => BorderMode::StripScan,
            ComparatorMode::Objects => BorderMode::CenterDistance,
        }
    }
}

impl std::fmt::Display for ComparatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparatorMode::Histogram => write!(f, "histogram"),
            ComparatorMode::Objects => write!(f, "objects"),
        }
    }
}

/// Fully populated comparison parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Compute the pixel-level record.
    pub pixel_method: bool,
    /// Compute the object-level record at `object_threshold`.
    pub object_method: bool,
    /// Compute object-level records over the threshold sweep.
    pub pixel_object_method: bool,
    /// IoU acceptance threshold of the single object-level record.
    pub object_threshold: f64,
    /// First threshold of the sweep.
    pub overlap_min: f64,
    /// Last threshold of the sweep, inclusive.
    pub overlap_max: f64,
    /// Step between sweep thresholds.
    pub overlap_increment: f64,
    /// Objects with fewer pixels are excluded from object scoring.
    pub min_size: f64,
    /// Border distance in pixels. Negative disables the border filter.
    pub min_dist: f64,
    pub mode: ComparatorMode,
    /// Border semantics, the mode default when unset.
    pub border_mode: Option<BorderMode>,
    /// Histogram-route candidate selection.
    pub match_policy: MatchPolicy,
    /// Minimum IoU for a histogram-route correspondence. When unset the
    /// lowest scored threshold is used.
    pub reference_threshold: Option<f64>,
    /// Upper bound on co-occurrence table cells.
    pub max_matrix_cells: usize,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        ComparisonConfig {
            pixel_method: true,
            object_method: true,
            pixel_object_method: true,
            object_threshold: 0.5,
            overlap_min: 0.5,
            overlap_max: 1.0,
            overlap_increment: 0.05,
            min_size: 0.0,
            min_dist: 0.0,
            mode: ComparatorMode::default(),
            border_mode: None,
            match_policy: MatchPolicy::default(),
            reference_threshold: None,
            max_matrix_cells: DEFAULT_MAX_MATRIX_CELLS,
        }
    }
}

impl ComparisonConfig {
    /// Platform configuration file, e.g. `~/.config/maskcmp/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("ai", "EdgeFirst", "maskcmp")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads and validates the configuration.
    ///
    /// An explicit `path` must exist; otherwise the platform default file is
    /// read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default) = Self::default_path() {
                    log::debug!("looking for configuration in {}", default.display());
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }
        builder =
            builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: ComparisonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects out-of-range parameters before any computation.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.pixel_method && !self.object_method && !self.pixel_object_method {
            return Err(Error::InvalidParameters(
                "at least one of pixel, object or sweep scoring must be enabled".to_owned(),
            ));
        }
        for (name, value) in [
            ("object_threshold", Some(self.object_threshold)),
            ("reference_threshold", self.reference_threshold),
        ] {
            let Some(value) = value else { continue };
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidParameters(format!(
                    "{} {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        if self.pixel_object_method {
            self.sweep()?;
        }
        if self.min_size.is_nan() || self.min_size < 0.0 {
            return Err(Error::InvalidParameters(format!(
                "min_size {} must be non-negative",
                self.min_size
            )));
        }
        if self.min_dist.is_nan() {
            return Err(Error::InvalidParameters("min_dist is not a number".to_owned()));
        }
        if self.max_matrix_cells == 0 {
            return Err(Error::InvalidParameters(
                "max_matrix_cells must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn border_mode(&self) -> BorderMode {
        self.border_mode
            .unwrap_or_else(|| self.mode.default_border_mode())
    }

    pub fn border_filter(&self) -> BorderFilter {
        BorderFilter::new(self.border_mode(), self.min_dist)
    }

    /// IoU at which the histogram route builds its correspondence: the
    /// explicit `reference_threshold`, else the object threshold lowered to
    /// the sweep minimum when the sweep is enabled.
    pub fn match_threshold(&self) -> f64 {
        if let Some(threshold) = self.reference_threshold {
            return threshold;
        }
        let mut threshold = self.object_threshold;
        if self.pixel_object_method {
            threshold = threshold.min(self.overlap_min);
        }
        threshold
    }

    pub fn sweep(&self) -> Result<ThresholdSweep, Error> {
        ThresholdSweep::new(self.overlap_min, self.overlap_max, self.overlap_increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ComparisonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.border_mode(), BorderMode::StripScan);
        assert_eq!(config.sweep().unwrap().len(), 11);
    }

    #[test]
    fn test_match_threshold() {
        let config = ComparisonConfig {
            object_threshold: 0.7,
            overlap_min: 0.3,
            ..Default::default()
        };
        assert!((config.match_threshold() - 0.3).abs() < 1e-6);
        let config = ComparisonConfig {
            pixel_object_method: false,
            ..config
        };
        assert!((config.match_threshold() - 0.7).abs() < 1e-6);
        let config = ComparisonConfig {
            reference_threshold: Some(0.1),
            ..config
        };
        assert!((config.match_threshold() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_mode_selects_border_default() {
        let config = ComparisonConfig {
            mode: ComparatorMode::Objects,
            ..Default::default()
        };
        assert_eq!(config.border_mode(), BorderMode::CenterDistance);
        let config = ComparisonConfig {
            border_mode: Some(BorderMode::StripScan),
            ..config
        };
        assert_eq!(config.border_mode(), BorderMode::StripScan);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ComparisonConfig {
                object_threshold: 1.2,
                ..Default::default()
            },
            ComparisonConfig {
                reference_threshold: Some(-0.5),
                ..Default::default()
            },
            ComparisonConfig {
                min_size: -3.0,
                ..Default::default()
            },
            ComparisonConfig {
                overlap_increment: 0.0,
                ..Default::default()
            },
            ComparisonConfig {
                pixel_method: false,
                object_method: false,
                pixel_object_method: false,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidParameters(_))));
        }
    }

    #[test]
    #[serial]
    fn test_load_file_and_env_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maskcmp.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "mode = \"objects\"\nmin_size = 4\nmin_dist = -1").unwrap();
        drop(file);

        // SAFETY: serialized with every other environment-touching test
        unsafe { std::env::set_var("MASKCMP_MIN_SIZE", "9") };
        let config = ComparisonConfig::load(Some(&path));
        unsafe { std::env::remove_var("MASKCMP_MIN_SIZE") };

        let config = config.unwrap();
        assert_eq!(config.mode, ComparatorMode::Objects);
        assert_eq!(config.min_size, 9.0);
        assert_eq!(config.min_dist, -1.0);
        assert_eq!(config.overlap_max, 1.0);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = ComparisonConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
