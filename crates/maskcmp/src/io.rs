// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Reading and writing label rasters as images.
//!
//! A mask is either one grayscale image (PNG or TIFF, 8 or 16 bit, or
//! floating point with integral values) or a directory of such images that
//! form the slices of a stack in file name order.

use crate::{Error, LabelRaster};
use image::{DynamicImage, ImageBuffer, ImageReader, Luma};
use log::debug;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SLICE_EXTENSIONS: &[&str] = &["png", "tif", "tiff"];

fn has_slice_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SLICE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Loads a mask file or a directory of slice images.
pub fn load_mask(path: &Path) -> Result<LabelRaster, Error> {
    if path.is_dir() {
        let files = slice_files(path)?;
        if files.is_empty() {
            return Err(Error::UnsupportedFormat(format!(
                "{} contains no PNG or TIFF slices",
                path.display()
            )));
        }
        debug!("loading {} slices from {}", files.len(), path.display());
        let slices = files
            .iter()
            .map(|file| load_slice(file))
            .collect::<Result<Vec<_>, _>>()?;
        LabelRaster::stack(slices)
    } else {
        load_slice(path)
    }
}

/// Slice images directly inside `dir`, sorted by file name.
pub fn slice_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() && has_slice_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn load_slice(path: &Path) -> Result<LabelRaster, Error> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let (width, height) = (image.width() as usize, image.height() as usize);
    match image {
        DynamicImage::ImageLuma8(buffer) => LabelRaster::from_vec(
            width,
            height,
            1,
            buffer.into_raw().into_iter().map(u32::from).collect(),
        ),
        DynamicImage::ImageLuma16(buffer) => LabelRaster::from_vec(
            width,
            height,
            1,
            buffer.into_raw().into_iter().map(u32::from).collect(),
        ),
        DynamicImage::ImageRgb32F(buffer) => {
            let samples = gray_samples(path, buffer.pixels().map(|p| &p.0[..]))?;
            LabelRaster::from_f64(width, height, 1, &samples)
        }
        DynamicImage::ImageRgba32F(buffer) => {
            let samples = gray_samples(path, buffer.pixels().map(|p| &p.0[..3]))?;
            LabelRaster::from_f64(width, height, 1, &samples)
        }
        other => Err(Error::UnsupportedFormat(format!(
            "{} is {:?}, expected a single-channel label image",
            path.display(),
            other.color()
        ))),
    }
}

/// Float images are decoded with their gray value repeated in every color
/// channel; any pixel whose channels differ is not a label image.
fn gray_samples<'a, I>(path: &Path, pixels: I) -> Result<Vec<f64>, Error>
where
    I: Iterator<Item = &'a [f32]>,
{
    pixels
        .map(|channels| match channels {
            [first, rest @ ..] if rest.iter().all(|c| c == first) => Ok(*first as f64),
            _ => Err(Error::UnsupportedFormat(format!(
                "{} has differing color channels, expected a single-channel label image",
                path.display()
            ))),
        })
        .collect()
}

/// Writes `raster` as 16-bit grayscale images.
///
/// A single-slice raster with an image extension is written to `path`
/// directly. Otherwise `path` is a directory that receives one
/// `slice_0001.png`, `slice_0002.png`, ... per slice.
pub fn write_mask(raster: &LabelRaster, path: &Path) -> Result<Vec<PathBuf>, Error> {
    if let Some(max) = raster.data().iter().copied().find(|&v| v > u16::MAX as u32) {
        return Err(Error::InvalidParameters(format!(
            "label {} does not fit in a 16-bit image",
            max
        )));
    }

    if raster.depth() == 1 && has_slice_extension(path) {
        write_slice(raster.slice(0), raster.width(), raster.height(), path)?;
        return Ok(vec![path.to_path_buf()]);
    }

    std::fs::create_dir_all(path)?;
    let mut written = Vec::with_capacity(raster.depth());
    for z in 0..raster.depth() {
        let file = path.join(format!("slice_{:04}.png", z + 1));
        write_slice(raster.slice(z), raster.width(), raster.height(), &file)?;
        written.push(file);
    }
    debug!("wrote {} slices to {}", written.len(), path.display());
    Ok(written)
}

fn write_slice(labels: &[u32], width: usize, height: usize, path: &Path) -> Result<(), Error> {
    let data: Vec<u16> = labels.iter().map(|&v| v as u16).collect();
    let buffer = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| {
            Error::InvalidParameters(format!("slice buffer does not match {}x{}", width, height))
        })?;
    buffer.save(path)?;
    Ok(())
}
