// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Turning a labelled slice into discrete pixel-set objects.
//!
//! The [`ObjectExtractor`] trait is the seam: anything that can produce
//! `{id, pixels, bounding box}` records for a slice can drive the object
//! comparator. [`ConnectedComponents`] is the shipped implementation.

use crate::IouMatrix;
use pathfinding::directed::bfs::bfs_reach;
use serde::Serialize;

/// Axis-aligned pixel bounding box, `x + width` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl BoundingBox {
    /// Center of the box in continuous pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Smallest distance from the box center to any raster edge.
    pub fn center_distance_to_border(&self, width: usize, height: usize) -> f64 {
        let (cx, cy) = self.center();
        cx.min(width as f64 - cx).min(cy.min(height as f64 - cy))
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// One object of a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledObject {
    /// Dense identifier, `1..=n` in discovery order.
    pub id: u32,
    /// Label value the object carried in the source raster.
    pub value: u32,
    /// Row-major pixel indices into the slice, ascending.
    pub pixels: Vec<usize>,
    pub bbox: BoundingBox,
}

impl LabeledObject {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Number of pixels shared with `other`.
    pub fn intersection(&self, other: &LabeledObject) -> usize {
        if !self.bbox.intersects(&other.bbox) {
            return 0;
        }
        // both pixel lists are sorted
        let (mut i, mut j, mut common) = (0, 0, 0);
        while i < self.pixels.len() && j < other.pixels.len() {
            match self.pixels[i].cmp(&other.pixels[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    common += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        common
    }

    /// `|a ∩ b| / (|a| + |b| - |a ∩ b|)`, or `None` when they do not overlap.
    pub fn overlap(&self, other: &LabeledObject) -> Option<f64> {
        let common = self.intersection(other);
        if common == 0 {
            return None;
        }
        Some(common as f64 / (self.area() + other.area() - common) as f64)
    }
}

/// Pairwise overlaps indexed by object id, shaped like a label IoU matrix.
pub fn overlap_matrix(truth: &[LabeledObject], test: &[LabeledObject]) -> IouMatrix {
    let mut matrix = IouMatrix::zeros(truth.len() + 1, test.len() + 1);
    for a in truth {
        for b in test {
            if let Some(overlap) = a.overlap(b) {
                matrix.set(a.id as usize, b.id as usize, overlap);
            }
        }
    }
    matrix
}

/// Produces the objects of one slice. Returned ids must be `1..=n` in
/// order.
pub trait ObjectExtractor {
    /// Extracts objects from a `width × height` row-major label slice.
    fn extract(&self, labels: &[u32], width: usize, height: usize) -> Vec<LabeledObject>;
}

/// 8-connected components of equal non-zero value, found in row-major scan
/// order. Components smaller than `min_size` pixels are dropped before ids
/// are assigned.
#[derive(Debug, Clone, Default)]
pub struct ConnectedComponents {
    pub min_size: usize,
}

impl ConnectedComponents {
    pub fn new(min_size: usize) -> Self {
        ConnectedComponents { min_size }
    }
}

impl ObjectExtractor for ConnectedComponents {
    fn extract(&self, labels: &[u32], width: usize, height: usize) -> Vec<LabeledObject> {
        let mut visited = vec![false; labels.len()];
        let mut objects = Vec::new();

        for start in 0..labels.len() {
            let value = labels[start];
            if value == 0 || visited[start] {
                continue;
            }

            let mut pixels: Vec<usize> = bfs_reach(start, |&p| {
                neighbours(p, width, height)
                    .filter(move |&n| labels[n] == value)
                    .collect::<Vec<_>>()
            })
            .collect();
            pixels.sort_unstable();

            let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
            for &p in &pixels {
                visited[p] = true;
                let (x, y) = (p % width, p / width);
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }

            if pixels.len() < self.min_size {
                continue;
            }

            objects.push(LabeledObject {
                id: objects.len() as u32 + 1,
                value,
                pixels,
                bbox: BoundingBox {
                    x: x0,
                    y: y0,
                    width: x1 - x0 + 1,
                    height: y1 - y0 + 1,
                },
            });
        }

        log::debug!("extracted {} objects from {}x{} slice", objects.len(), width, height);
        objects
    }
}

fn neighbours(p: usize, width: usize, height: usize) -> impl Iterator<Item = usize> {
    let (x, y) = ((p % width) as isize, (p / width) as isize);
    (-1isize..=1)
        .flat_map(move |dy| (-1isize..=1).map(move |dx| (x + dx, y + dy)))
        .filter(move |&(nx, ny)| {
            (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < width as isize && ny < height as isize
        })
        .map(move |(nx, ny)| ny as usize * width + nx as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_scan_order_and_bbox() {
        #[rustfmt::skip]
        let labels = [
            0, 5, 5, 0,
            0, 0, 0, 0,
            2, 0, 0, 9,
            2, 2, 0, 9,
        ];
        let objects = ConnectedComponents::default().extract(&labels, 4, 4);
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].value, 5);
        assert_eq!(objects[0].bbox, BoundingBox { x: 1, y: 0, width: 2, height: 1 });
        assert_eq!(objects[1].value, 2);
        assert_eq!(objects[1].area(), 3);
        assert_eq!(objects[2].id, 3);
        assert_eq!(objects[2].bbox, BoundingBox { x: 3, y: 2, width: 1, height: 2 });
    }

    #[test]
    fn test_components_are_eight_connected() {
        #[rustfmt::skip]
        let labels = [
            1, 0, 0,
            0, 1, 0,
            0, 0, 1,
        ];
        let objects = ConnectedComponents::default().extract(&labels, 3, 3);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].pixels, vec![0, 4, 8]);
    }

    #[test]
    fn test_same_label_disconnected_splits() {
        let labels = [3, 0, 3];
        let objects = ConnectedComponents::default().extract(&labels, 3, 1);
        assert_eq!(objects.len(), 2);
        assert!(objects.iter().all(|o| o.value == 3));
    }

    #[test]
    fn test_adjacent_labels_stay_separate() {
        let labels = [1, 1, 2, 2];
        let objects = ConnectedComponents::default().extract(&labels, 4, 1);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].pixels, vec![2, 3]);
    }

    #[test]
    fn test_min_size_drops_small_objects() {
        let labels = [1, 0, 2, 2];
        let objects = ConnectedComponents::new(2).extract(&labels, 4, 1);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, 1);
        assert_eq!(objects[0].value, 2);
    }

    #[test]
    fn test_overlap() {
        let labels_a = [1, 1, 1, 1, 0];
        let labels_b = [1, 1, 0, 0, 1];
        let a = &ConnectedComponents::default().extract(&labels_a, 5, 1)[0];
        let b = ConnectedComponents::default().extract(&labels_b, 5, 1);
        assert!((a.overlap(&b[0]).unwrap() - 0.5).abs() < 1e-6);
        assert!(a.overlap(&b[1]).is_none());
    }

    #[test]
    fn test_center_distance_to_border() {
        let bbox = BoundingBox { x: 1, y: 2, width: 2, height: 2 };
        assert_eq!(bbox.center(), (2.0, 3.0));
        assert!((bbox.center_distance_to_border(10, 4) - 1.0).abs() < 1e-9);
    }
}
