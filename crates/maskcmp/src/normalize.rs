// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Dense relabelling of object identities.

use crate::{Error, Histogram1D, LabelRaster};

/// Renumbers the labels present in `labels` to `1..=N` in ascending order of
/// their original value and returns `N`. Background stays 0.
///
/// `max_label` sizes the lookup table and must bound every value.
pub fn normalize_labels(labels: &mut [u32], max_label: u32) -> Result<u32, Error> {
    let histogram = Histogram1D::from_labels(labels, max_label)?;

    let mut lookup = vec![0u32; histogram.len()];
    let mut next = 0u32;
    for (label, &count) in histogram.counts().iter().enumerate().skip(1) {
        if count > 0 {
            next += 1;
            lookup[label] = next;
        }
    }

    for label in labels.iter_mut() {
        *label = lookup[*label as usize];
    }
    Ok(next)
}

impl LabelRaster {
    /// Compacts the whole raster (all slices together) to `1..=N`, returning
    /// `N`. An all-background raster yields 0.
    pub fn normalize(&mut self) -> Result<u32, Error> {
        let max_label = self.max_label();
        normalize_labels(self.data_mut(), max_label)
    }

}
