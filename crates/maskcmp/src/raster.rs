// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Label raster storage.
//!
//! A [`LabelRaster`] is a row-major `width × height × depth` grid of `u32`
//! labels where 0 is background. Slices are contiguous so a single slice can
//! be borrowed without copying.

use crate::Error;

/// Integer label image, optionally a stack of slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRaster {
    width: usize,
    height: usize,
    depth: usize,
    data: Vec<u32>,
}

impl LabelRaster {
    /// Creates a raster of the given shape filled with background.
    pub fn zeros(width: usize, height: usize, depth: usize) -> Self {
        LabelRaster {
            width,
            height,
            depth,
            data: vec![0; width * height * depth],
        }
    }

    /// Wraps existing label data laid out slice by slice, row by row.
    pub fn from_vec(
        width: usize,
        height: usize,
        depth: usize,
        data: Vec<u32>,
    ) -> Result<Self, Error> {
        let expected = width * height * depth;
        if data.len() != expected {
            return Err(Error::InvalidParameters(format!(
                "raster data has {} samples, expected {} for {}x{}x{}",
                data.len(),
                expected,
                width,
                height,
                depth
            )));
        }
        Ok(LabelRaster {
            width,
            height,
            depth,
            data,
        })
    }

    /// Builds a raster from floating point samples, rejecting any value that
    /// is negative, fractional, non-finite or wider than `u32`.
    pub fn from_f64(
        width: usize,
        height: usize,
        depth: usize,
        samples: &[f64],
    ) -> Result<Self, Error> {
        let expected = width * height * depth;
        if samples.len() != expected {
            return Err(Error::InvalidParameters(format!(
                "raster data has {} samples, expected {}",
                samples.len(),
                expected
            )));
        }

        let plane = width * height;
        let mut data = Vec::with_capacity(expected);
        for (index, &value) in samples.iter().enumerate() {
            if !value.is_finite()
                || value < 0.0
                || value.fract() != 0.0
                || value > u32::MAX as f64
            {
                let (z, rem) = if plane == 0 {
                    (0, 0)
                } else {
                    (index / plane, index % plane)
                };
                return Err(Error::InvalidLabelValue {
                    value,
                    x: if width == 0 { 0 } else { rem % width },
                    y: if width == 0 { 0 } else { rem / width },
                    z,
                });
            }
            data.push(value as u32);
        }

        Ok(LabelRaster {
            width,
            height,
            depth,
            data,
        })
    }

    /// Stacks equally sized single-slice rasters into one volume.
    pub fn stack(slices: Vec<LabelRaster>) -> Result<Self, Error> {
        let Some(first) = slices.first() else {
            return Err(Error::InvalidParameters("no slices to stack".to_owned()));
        };
        let (width, height) = (first.width, first.height);

        let mut depth = 0;
        let mut data = Vec::with_capacity(width * height * slices.len());
        for slice in &slices {
            if slice.width != width || slice.height != height {
                return Err(Error::DimensionMismatch {
                    truth: (width, height, 1),
                    test: slice.shape(),
                });
            }
            depth += slice.depth;
            data.extend_from_slice(&slice.data);
        }

        Ok(LabelRaster {
            width,
            height,
            depth,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Shape as (width, height, depth).
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    /// Number of pixels in one slice.
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    /// All samples in slice-major, row-major order.
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u32> {
        self.data
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> u32 {
        self.data[self.index(x, y, z)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: u32) {
        let index = self.index(x, y, z);
        self.data[index] = value;
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.height + y) * self.width + x
    }

    /// Borrows the samples of slice `z`.
    pub fn slice(&self, z: usize) -> &[u32] {
        let plane = self.plane_len();
        &self.data[z * plane..(z + 1) * plane]
    }

    pub fn slice_mut(&mut self, z: usize) -> &mut [u32] {
        let plane = self.plane_len();
        &mut self.data[z * plane..(z + 1) * plane]
    }

    /// Copies slice `z` into a single-slice raster.
    pub fn slice_raster(&self, z: usize) -> LabelRaster {
        LabelRaster {
            width: self.width,
            height: self.height,
            depth: 1,
            data: self.slice(z).to_vec(),
        }
    }

    /// Largest label present, 0 for an all-background raster.
    pub fn max_label(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Fails with [`Error::DimensionMismatch`] unless both rasters share a
    /// shape. `self` is reported as the truth side.
    pub fn check_same_shape(&self, other: &LabelRaster) -> Result<(), Error> {
        if self.shape() != other.shape() {
            return Err(Error::DimensionMismatch {
                truth: self.shape(),
                test: other.shape(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f64_accepts_integral_values() {
        let raster = LabelRaster::from_f64(2, 2, 1, &[0.0, 1.0, 2.0, 65535.0]).unwrap();
        assert_eq!(raster.data(), &[0, 1, 2, 65535]);
        assert_eq!(raster.max_label(), 65535);
    }

    #[test]
    fn test_from_f64_rejects_fractional_value() {
        let err = LabelRaster::from_f64(2, 2, 1, &[0.0, 1.0, 2.5, 0.0]).unwrap_err();
        match err {
            Error::InvalidLabelValue { value, x, y, z } => {
                assert_eq!(value, 2.5);
                assert_eq!((x, y, z), (0, 1, 0));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_from_f64_rejects_negative_value() {
        let err = LabelRaster::from_f64(3, 1, 2, &[0.0, 0.0, 0.0, 0.0, -1.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidLabelValue { x: 1, y: 0, z: 1, .. }));
    }

    #[test]
    fn test_from_vec_length_check() {
        assert!(LabelRaster::from_vec(2, 2, 1, vec![0; 3]).is_err());
    }

    #[test]
    fn test_slice_access() {
        let raster = LabelRaster::from_vec(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(raster.slice(1), &[3, 4]);
        assert_eq!(raster.get(1, 0, 2), 6);
        assert_eq!(raster.slice_raster(2).data(), &[5, 6]);
    }

    #[test]
    fn test_stack_rejects_mismatched_slices() {
        let a = LabelRaster::zeros(2, 2, 1);
        let b = LabelRaster::zeros(3, 2, 1);
        assert!(matches!(
            LabelRaster::stack(vec![a, b]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_check_same_shape() {
        let a = LabelRaster::zeros(4, 4, 1);
        let b = LabelRaster::zeros(4, 4, 2);
        assert!(a.check_same_shape(&a.clone()).is_ok());
        assert!(matches!(
            a.check_same_shape(&b),
            Err(Error::DimensionMismatch {
                truth: (4, 4, 1),
                test: (4, 4, 2)
            })
        ));
    }
}
