// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Building 3D object identities from independently labelled 2D slices.
//!
//! Slices are linked pairwise, `z - 1` to `z`, with the histogram-route
//! matcher. A label of slice `z` inherits the identity of its match in slice
//! `z - 1`; without a match it receives a fresh identity one above the
//! largest identity handed out so far. Only one slice of look-back is used,
//! so an object that disappears for a slice comes back with a new identity.

use crate::{
    Error, Histogram1D, Histogram2D, IouMatrix, LabelRaster,
    histogram::DEFAULT_MAX_MATRIX_CELLS,
    matching::{MatchPolicy, match_histogram},
    normalize::normalize_labels,
};
use std::collections::BTreeMap;

/// Default IoU required to carry an identity into the next slice.
pub const DEFAULT_PROPAGATION_IOU: f64 = 0.5;

/// Slice-local label to global identity, one map per slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceLabelMap {
    slices: Vec<BTreeMap<u32, u32>>,
}

impl SliceLabelMap {
    /// Global identity of `local` in slice `z`.
    pub fn global(&self, z: usize, local: u32) -> Option<u32> {
        self.slices.get(z)?.get(&local).copied()
    }

    pub fn depth(&self) -> usize {
        self.slices.len()
    }
}

/// Result of a propagation run.
#[derive(Debug, Clone)]
pub struct Propagation {
    /// Stack relabelled with 3D identities.
    pub raster: LabelRaster,
    /// Mapping from whole-stack normalized labels to 3D identities.
    pub labels: SliceLabelMap,
    /// Largest identity assigned.
    pub max_identity: u32,
    /// Number of slice labels that inherited an identity.
    pub carried: usize,
}

/// Slice-to-slice identity propagator.
#[derive(Debug, Clone)]
pub struct LabelPropagator {
    threshold: f64,
    policy: MatchPolicy,
    max_matrix_cells: usize,
}

impl Default for LabelPropagator {
    fn default() -> Self {
        LabelPropagator {
            threshold: DEFAULT_PROPAGATION_IOU,
            policy: MatchPolicy::LastAboveThreshold,
            max_matrix_cells: DEFAULT_MAX_MATRIX_CELLS,
        }
    }
}

impl LabelPropagator {
    pub fn new(threshold: f64) -> Result<Self, Error> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidParameters(format!(
                "propagation IoU {} is outside [0, 1]",
                threshold
            )));
        }
        Ok(LabelPropagator {
            threshold,
            ..Default::default()
        })
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_matrix_cells(mut self, max_matrix_cells: usize) -> Self {
        self.max_matrix_cells = max_matrix_cells;
        self
    }

    /// Relabels `raster` so objects continuing across slices share one
    /// identity. The input is left untouched.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
    pub fn propagate(&self, raster: &LabelRaster) -> Result<Propagation, Error> {
        let mut stack = raster.clone();
        let objects = stack.normalize()?;
        log::debug!(
            "propagating {} normalized labels over {} slices at IoU>={}",
            objects,
            stack.depth(),
            self.threshold
        );

        let mut output = stack.clone();
        let mut labels = SliceLabelMap::default();
        if stack.depth() == 0 {
            return Ok(Propagation {
                raster: output,
                labels,
                max_identity: 0,
                carried: 0,
            });
        }

        let mut prev = DenseSlice::new(stack.slice(0))?;
        let mut prev_global = prev.values.clone();
        let mut max_identity = prev.values.iter().copied().max().unwrap_or(0);
        labels.slices.push(prev.identity_map(&prev_global));
        let mut carried = 0;

        for z in 1..stack.depth() {
            let cur = DenseSlice::new(stack.slice(z))?;
            let joint = Histogram2D::from_labels(
                &cur.labels,
                cur.count,
                &prev.labels,
                prev.count,
                self.max_matrix_cells,
            )?;
            let h_cur = Histogram1D::from_labels(&cur.labels, cur.count)?;
            let h_prev = Histogram1D::from_labels(&prev.labels, prev.count)?;
            let iou = IouMatrix::compute(&joint, &h_cur, &h_prev)?;
            let result = match_histogram(&iou, self.threshold, self.policy);

            let mut global = vec![0u32; cur.count as usize + 1];
            let mut inherited = 0;
            for (local, slot) in global.iter_mut().enumerate().skip(1) {
                *slot = match result.correspondence.get(local) {
                    Some(m) => {
                        inherited += 1;
                        prev_global[m.test]
                    }
                    None => {
                        max_identity += 1;
                        max_identity
                    }
                };
            }
            for contest in &result.contests {
                log::debug!(
                    "slice {}: label {} of slice {} already carried by label {}",
                    z,
                    contest.test,
                    z - 1,
                    contest.winner
                );
            }
            log::debug!(
                "slice {}: {} labels carried over, {} new identities",
                z,
                inherited,
                cur.count as usize - inherited
            );
            carried += inherited;

            for (out, &dense) in output.slice_mut(z).iter_mut().zip(&cur.labels) {
                *out = global[dense as usize];
            }
            labels.slices.push(cur.identity_map(&global));
            prev = cur;
            prev_global = global;
        }

        log::info!(
            "built {} 3D identities from {} slices ({} carried over)",
            max_identity,
            stack.depth(),
            carried
        );
        Ok(Propagation {
            raster: output,
            labels,
            max_identity,
            carried,
        })
    }
}

/// One slice compacted to `1..=count`, remembering the original values.
struct DenseSlice {
    labels: Vec<u32>,
    count: u32,
    /// Original value of every dense label, index 0 is background.
    values: Vec<u32>,
}

impl DenseSlice {
    fn new(slice: &[u32]) -> Result<Self, Error> {
        let mut labels = slice.to_vec();
        let max_label = slice.iter().copied().max().unwrap_or(0);
        let count = normalize_labels(&mut labels, max_label)?;
        let mut values = vec![0u32; count as usize + 1];
        for (&dense, &original) in labels.iter().zip(slice) {
            values[dense as usize] = original;
        }
        Ok(DenseSlice {
            labels,
            count,
            values,
        })
    }

    fn identity_map(&self, global: &[u32]) -> BTreeMap<u32, u32> {
        (1..=self.count as usize)
            .map(|d| (self.values[d], global[d]))
            .collect()
    }
}
