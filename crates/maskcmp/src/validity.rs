// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Size and border eligibility of objects for object-level scoring.
//!
//! Two border semantics exist and they do not agree on every object:
//!
//! - [`BorderMode::StripScan`] rejects an object when any of its pixels lies
//!   within `min_dist` of an edge (rows and columns `0..=min_dist` counted
//!   from each of the four edges).
//! - [`BorderMode::CenterDistance`] rejects an object when its bounding box
//!   center is closer than `min_dist` to an edge, or, for `min_dist >= 0`,
//!   when the bounding box touches an edge.
//!
//! A negative `min_dist` disables the border filter in both modes. Pixel-level
//! scoring never consults these flags.

use crate::{
    Histogram1D, IouMatrix, LabelRaster,
    objects::{BoundingBox, LabeledObject},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Border rejection semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderMode {
    StripScan,
    CenterDistance,
}

impl std::fmt::Display for BorderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BorderMode::StripScan => write!(f, "strip-scan"),
            BorderMode::CenterDistance => write!(f, "center-distance"),
        }
    }
}

/// Per-label eligibility, indexed by label. Index 0 (background) is never
/// valid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidityFlags {
    flags: Vec<bool>,
}

impl ValidityFlags {
    /// Labels `1..=count` valid.
    pub fn all_valid(count: usize) -> Self {
        let mut flags = vec![true; count + 1];
        flags[0] = false;
        ValidityFlags { flags }
    }

    /// Labels with a pixel count of at least `min_size` are valid. Labels
    /// absent from the histogram are not.
    pub fn from_sizes(histogram: &Histogram1D, min_size: f64) -> Self {
        let mut flags: Vec<bool> = histogram
            .counts()
            .iter()
            .map(|&count| count > 0 && count as f64 >= min_size)
            .collect();
        if let Some(background) = flags.first_mut() {
            *background = false;
        }
        ValidityFlags { flags }
    }

    /// Highest label covered plus one.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.len() <= 1
    }

    pub fn is_valid(&self, label: usize) -> bool {
        self.flags.get(label).copied().unwrap_or(false)
    }

    pub fn invalidate(&mut self, label: usize) {
        if let Some(flag) = self.flags.get_mut(label) {
            *flag = false;
        }
    }

    pub fn valid_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    /// Foreground labels that are not valid, ascending.
    pub fn invalid_labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.flags
            .iter()
            .enumerate()
            .skip(1)
            .filter(|&(_, &f)| !f)
            .map(|(label, _)| label)
    }
}

/// Border rejection rule for one comparator run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderFilter {
    pub mode: BorderMode,
    pub min_dist: f64,
}

impl BorderFilter {
    pub fn new(mode: BorderMode, min_dist: f64) -> Self {
        BorderFilter { mode, min_dist }
    }

    pub fn is_enabled(&self) -> bool {
        self.min_dist >= 0.0
    }

    /// Whether pixel `(x, y)` lies in the rejected border strip.
    pub fn pixel_in_strip(&self, x: usize, y: usize, width: usize, height: usize) -> bool {
        let d = self.min_dist;
        x as f64 <= d
            || y as f64 <= d
            || (width - 1 - x) as f64 <= d
            || (height - 1 - y) as f64 <= d
    }

    /// Center-distance acceptance of a bounding box.
    pub fn bbox_ok(&self, bbox: &BoundingBox, width: usize, height: usize) -> bool {
        let d = self.min_dist;
        let (cx, cy) = bbox.center();
        if cx < d || cx >= width as f64 - d {
            return false;
        }
        if cy < d || cy >= height as f64 - d {
            return false;
        }
        if d >= 0.0 && (bbox.x == 0 || bbox.x + bbox.width >= width) {
            return false;
        }
        if d >= 0.0 && (bbox.y == 0 || bbox.y + bbox.height >= height) {
            return false;
        }
        true
    }

    /// Whether an extracted object passes the border rule.
    pub fn object_ok(&self, object: &LabeledObject, width: usize, height: usize) -> bool {
        if !self.is_enabled() {
            return true;
        }
        match self.mode {
            BorderMode::StripScan => !object
                .pixels
                .iter()
                .any(|&p| self.pixel_in_strip(p % width, p / width, width, height)),
            BorderMode::CenterDistance => self.bbox_ok(&object.bbox, width, height),
        }
    }

    /// Labels of one slice rejected by the border rule.
    pub fn rejected_labels(&self, labels: &[u32], width: usize, height: usize) -> BTreeSet<u32> {
        let mut rejected = BTreeSet::new();
        if !self.is_enabled() {
            return rejected;
        }
        match self.mode {
            BorderMode::StripScan => {
                for (p, &label) in labels.iter().enumerate() {
                    if label > 0 && self.pixel_in_strip(p % width, p / width, width, height) {
                        rejected.insert(label);
                    }
                }
            }
            BorderMode::CenterDistance => {
                for (label, bbox) in label_bounding_boxes(labels, width).into_iter().enumerate() {
                    if let Some(bbox) = bbox {
                        if !self.bbox_ok(&bbox, width, height) {
                            rejected.insert(label as u32);
                        }
                    }
                }
            }
        }
        rejected
    }

    /// Invalidates every label rejected in any slice of `raster`.
    pub fn apply(&self, raster: &LabelRaster, flags: &mut ValidityFlags) {
        for z in 0..raster.depth() {
            for label in self.rejected_labels(raster.slice(z), raster.width(), raster.height()) {
                flags.invalidate(label as usize);
            }
        }
    }
}

/// Bounding box of every label value in a slice, indexed by label.
pub fn label_bounding_boxes(labels: &[u32], width: usize) -> Vec<Option<BoundingBox>> {
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut extents: Vec<Option<(usize, usize, usize, usize)>> = vec![None; max_label + 1];
    for (p, &label) in labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        let (x, y) = (p % width, p / width);
        let extent = extents[label as usize].get_or_insert((x, y, x, y));
        extent.0 = extent.0.min(x);
        extent.1 = extent.1.min(y);
        extent.2 = extent.2.max(x);
        extent.3 = extent.3.max(y);
    }
    extents
        .into_iter()
        .map(|e| {
            e.map(|(x0, y0, x1, y1)| BoundingBox {
                x: x0,
                y: y0,
                width: x1 - x0 + 1,
                height: y1 - y0 + 1,
            })
        })
        .collect()
}

/// Marks every row of an invalid truth label and every column of an invalid
/// test label as excluded. Labels beyond the flag range count as invalid.
pub fn exclude_invalid(iou: &mut IouMatrix, truth: &ValidityFlags, test: &ValidityFlags) {
    for t in 1..iou.rows() {
        if !truth.is_valid(t) {
            iou.exclude_row(t);
        }
    }
    for s in 1..iou.cols() {
        if !test.is_valid(s) {
            iou.exclude_col(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ConnectedComponents, ObjectExtractor};

    #[rustfmt::skip]
    const SLICE: [u32; 36] = [
        0, 0, 0, 0, 0, 0,
        0, 1, 1, 0, 0, 0,
        0, 1, 1, 0, 0, 0,
        0, 0, 0, 0, 2, 0,
        0, 0, 0, 0, 0, 0,
        3, 3, 0, 0, 0, 0,
    ];

    #[test]
    fn test_size_flags() {
        let h = Histogram1D::from_labels(&SLICE, 4).unwrap();
        let flags = ValidityFlags::from_sizes(&h, 2.0);
        assert!(flags.is_valid(1));
        assert!(!flags.is_valid(2));
        assert!(flags.is_valid(3));
        assert!(!flags.is_valid(4));
        assert!(!flags.is_valid(0));
        assert_eq!(flags.invalid_labels().collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn test_strip_scan_disabled_when_negative() {
        let filter = BorderFilter::new(BorderMode::StripScan, -1.0);
        assert!(filter.rejected_labels(&SLICE, 6, 6).is_empty());
    }

    #[test]
    fn test_strip_scan_zero_rejects_touching() {
        let filter = BorderFilter::new(BorderMode::StripScan, 0.0);
        let rejected = filter.rejected_labels(&SLICE, 6, 6);
        assert_eq!(rejected.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_strip_scan_wider_strip() {
        let filter = BorderFilter::new(BorderMode::StripScan, 1.0);
        let rejected = filter.rejected_labels(&SLICE, 6, 6);
        assert_eq!(rejected.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_center_distance_mode() {
        // label 1 box (1,1)-(2,2) center (2,2); label 2 center (4.5,3.5)
        let filter = BorderFilter::new(BorderMode::CenterDistance, 2.0);
        let rejected = filter.rejected_labels(&SLICE, 6, 6);
        assert_eq!(rejected.into_iter().collect::<Vec<_>>(), vec![2, 3]);

        let filter = BorderFilter::new(BorderMode::CenterDistance, 0.0);
        let rejected = filter.rejected_labels(&SLICE, 6, 6);
        assert_eq!(rejected.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_modes_are_not_equivalent() {
        let strip = BorderFilter::new(BorderMode::StripScan, 1.0);
        let center = BorderFilter::new(BorderMode::CenterDistance, 1.0);
        assert!(strip.rejected_labels(&SLICE, 6, 6).contains(&1));
        assert!(!center.rejected_labels(&SLICE, 6, 6).contains(&1));
    }

    #[test]
    fn test_object_ok_follows_mode() {
        let objects = ConnectedComponents::default().extract(&SLICE, 6, 6);
        let strip = BorderFilter::new(BorderMode::StripScan, 1.0);
        let center = BorderFilter::new(BorderMode::CenterDistance, 1.0);
        assert!(!strip.object_ok(&objects[0], 6, 6));
        assert!(center.object_ok(&objects[0], 6, 6));
        assert!(!center.object_ok(&objects[2], 6, 6));
    }

    #[test]
    fn test_exclude_invalid_marks_matrix() {
        let mut iou = IouMatrix::zeros(3, 3);
        let mut truth = ValidityFlags::all_valid(2);
        truth.invalidate(2);
        let test = ValidityFlags::all_valid(1);
        exclude_invalid(&mut iou, &truth, &test);
        assert!(iou.is_excluded(2, 1));
        assert!(iou.is_excluded(1, 2));
        assert!(!iou.is_excluded(1, 1));
    }
}
