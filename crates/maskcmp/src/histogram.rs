// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-label pixel counts and the truth × test co-occurrence table.

use crate::{Error, LabelRaster};

/// Default upper bound on `(max truth + 1) × (max test + 1)` cells.
pub const DEFAULT_MAX_MATRIX_CELLS: usize = 1 << 26;

/// Pixel count per label value. Index 0 holds the background count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram1D {
    counts: Vec<u64>,
}

impl Histogram1D {
    /// Counts labels in `labels`, sized for values up to `max_label`.
    pub fn from_labels(labels: &[u32], max_label: u32) -> Result<Self, Error> {
        let mut counts = vec![0u64; max_label as usize + 1];
        for &label in labels {
            let Some(bucket) = counts.get_mut(label as usize) else {
                return Err(Error::InvalidParameters(format!(
                    "label {} exceeds declared maximum {}",
                    label, max_label
                )));
            };
            *bucket += 1;
        }
        Ok(Histogram1D { counts })
    }

    /// Counts every slice of `raster` into one histogram.
    pub fn of_raster(raster: &LabelRaster, max_label: u32) -> Result<Self, Error> {
        Self::from_labels(raster.data(), max_label)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Count for `label`, 0 when the label is outside the histogram.
    pub fn count(&self, label: u32) -> u64 {
        self.counts.get(label as usize).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

/// Joint pixel counts indexed by (truth label, test label), row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram2D {
    rows: usize,
    cols: usize,
    counts: Vec<u64>,
}

impl Histogram2D {
    /// Builds the co-occurrence table of two equally long label buffers.
    ///
    /// Fails fast with [`Error::MatrixTooLarge`] before allocating when the
    /// table would exceed `max_cells`.
    pub fn from_labels(
        truth: &[u32],
        max_truth: u32,
        test: &[u32],
        max_test: u32,
        max_cells: usize,
    ) -> Result<Self, Error> {
        if truth.len() != test.len() {
            return Err(Error::DimensionMismatch {
                truth: (truth.len(), 1, 1),
                test: (test.len(), 1, 1),
            });
        }

        let rows = max_truth as usize + 1;
        let cols = max_test as usize + 1;
        match rows.checked_mul(cols) {
            Some(cells) if cells <= max_cells => {}
            _ => {
                return Err(Error::MatrixTooLarge {
                    rows,
                    cols,
                    limit: max_cells,
                });
            }
        }

        let mut counts = vec![0u64; rows * cols];
        for (&t, &s) in truth.iter().zip(test) {
            let (t, s) = (t as usize, s as usize);
            if t >= rows || s >= cols {
                return Err(Error::InvalidParameters(format!(
                    "label pair ({}, {}) exceeds declared maxima ({}, {})",
                    t, s, max_truth, max_test
                )));
            }
            counts[t * cols + s] += 1;
        }

        Ok(Histogram2D { rows, cols, counts })
    }

    /// Builds the co-occurrence table over whole rasters, all slices.
    pub fn of_rasters(
        truth: &LabelRaster,
        max_truth: u32,
        test: &LabelRaster,
        max_test: u32,
        max_cells: usize,
    ) -> Result<Self, Error> {
        truth.check_same_shape(test)?;
        Self::from_labels(truth.data(), max_truth, test.data(), max_test, max_cells)
    }

    /// Number of truth rows (max truth label + 1).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of test columns (max test label + 1).
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, truth: usize, test: usize) -> u64 {
        self.counts[truth * self.cols + test]
    }

    /// Co-occurrence counts of one truth label against every test label.
    pub fn row(&self, truth: usize) -> &[u64] {
        &self.counts[truth * self.cols..(truth + 1) * self.cols]
    }

    /// Sum of all cells, equal to the number of pixels counted.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
