// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Intersection-over-Union for every (truth, test) label pair.

use crate::{Error, Histogram1D, Histogram2D};

/// Marks a pair that must not take part in matching or scoring.
pub const EXCLUDED: f64 = -1.0;

/// IoU per (truth, test) label pair, row-major with the same shape as the
/// [`Histogram2D`] it was computed from.
///
/// Cells are in `[0, 1]` or equal to [`EXCLUDED`]. Row 0 and column 0 belong
/// to background and are never read by object-level logic.
#[derive(Debug, Clone, PartialEq)]
pub struct IouMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl IouMatrix {
    /// Creates a matrix with every cell at 0.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        IouMatrix {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    /// Derives `inter / (area(t) + area(s) - inter)` from the histograms.
    /// Cells with a zero denominator stay 0.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
    pub fn compute(
        joint: &Histogram2D,
        truth: &Histogram1D,
        test: &Histogram1D,
    ) -> Result<Self, Error> {
        if truth.len() < joint.rows() || test.len() < joint.cols() {
            return Err(Error::InvalidParameters(format!(
                "histograms of length {} and {} do not cover a {}x{} table",
                truth.len(),
                test.len(),
                joint.rows(),
                joint.cols()
            )));
        }

        let mut matrix = IouMatrix::zeros(joint.rows(), joint.cols());
        for t in 0..joint.rows() {
            let area_t = truth.count(t as u32);
            for (s, &inter) in joint.row(t).iter().enumerate() {
                let union = area_t + test.count(s as u32) - inter;
                if union > 0 {
                    matrix.values[t * matrix.cols + s] = inter as f64 / union as f64;
                }
            }
        }
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, truth: usize, test: usize) -> f64 {
        self.values[truth * self.cols + test]
    }

    pub fn set(&mut self, truth: usize, test: usize, value: f64) {
        self.values[truth * self.cols + test] = value;
    }

    pub fn row(&self, truth: usize) -> &[f64] {
        &self.values[truth * self.cols..(truth + 1) * self.cols]
    }

    pub fn is_excluded(&self, truth: usize, test: usize) -> bool {
        self.get(truth, test) == EXCLUDED
    }

    /// Marks every pair involving truth label `truth` as excluded.
    pub fn exclude_row(&mut self, truth: usize) {
        let cols = self.cols;
        self.values[truth * cols..(truth + 1) * cols].fill(EXCLUDED);
    }

    /// Marks every pair involving test label `test` as excluded.
    pub fn exclude_col(&mut self, test: usize) {
        for t in 0..self.rows {
            self.values[t * self.cols + test] = EXCLUDED;
        }
    }

    /// Foreground test labels overlapping truth label `truth`, ascending,
    /// ignoring excluded cells.
    pub fn overlapping(&self, truth: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.row(truth)
            .iter()
            .enumerate()
            .skip(1)
            .filter(|&(_, &iou)| iou > 0.0)
            .map(|(s, &iou)| (s, iou))
    }

    /// Foreground truth labels overlapping test label `test`, ascending,
    /// ignoring excluded cells.
    pub fn overlapping_col(&self, test: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        (1..self.rows)
            .map(move |t| (t, self.get(t, test)))
            .filter(|&(_, iou)| iou > 0.0)
    }
}
