// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # MaskCmp Label Mask Comparison Library
//!
//! MaskCmp scores a segmentation result (the *test* mask) against a
//! reference (the *truth* mask). Both masks are integer label rasters where
//! every positive value names one object instance and 0 is background.
//!
//! ## Features
//!
//! - **Pixel metrics**: foreground agreement regardless of object identity
//! - **Object metrics**: one-to-one object correspondence by IoU with
//!   precision, recall, Jaccard and F-measure at any threshold
//! - **Threshold sweeps**: object metrics over a range of IoU thresholds,
//!   summed across slices as counts
//! - **Validity filters**: minimum object size and border exclusion with
//!   selectable border semantics
//! - **Diagnostics**: per-object outcomes that separate split from fused
//!   objects, plus non-fatal anomalies
//! - **3D propagation**: link independently labelled 2D slices into 3D
//!   object identities
//! - **Polars Integration**: metrics and correspondence tables as
//!   DataFrames
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maskcmp::{Comparator, ComparisonConfig, Error, load_mask};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Error> {
//!     let truth = load_mask(Path::new("truth.png"))?;
//!     let test = load_mask(Path::new("test.png"))?;
//!
//!     let comparator = Comparator::new(ComparisonConfig::load(None)?)?;
//!     let report = comparator.compare(&truth, &test)?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `polars`: Enables export of reports as Polars DataFrames
//! - `profiling`: Emits tracing spans around the hot paths

mod compare;
mod config;
mod diagnostics;
mod error;
mod histogram;
mod io;
mod iou;
mod matching;
mod metrics;
mod normalize;
mod objects;
mod propagate;
mod raster;
mod report;
mod validity;

pub use crate::{
    compare::{Comparator, pixel_record},
    config::{ComparatorMode, ComparisonConfig, ENV_PREFIX},
    diagnostics::{Anomaly, ObjectOutcomes, Outcome, Side, classify},
    error::Error,
    histogram::{DEFAULT_MAX_MATRIX_CELLS, Histogram1D, Histogram2D},
    io::{load_mask, slice_files, write_mask},
    iou::{EXCLUDED, IouMatrix},
    matching::{
        Contest, Correspondence, Match, MatchPolicy, MatchResult, candidates,
        match_greedy_exchange, match_histogram,
    },
    metrics::{
        Confusion, MetricsRecord, SWEEP_EPSILON, SweepAccumulator, ThresholdSweep, format_stat,
        pixel_confusion, pixel_confusion_labels, score_correspondence,
    },
    normalize::normalize_labels,
    objects::{BoundingBox, ConnectedComponents, LabeledObject, ObjectExtractor, overlap_matrix},
    propagate::{DEFAULT_PROPAGATION_IOU, LabelPropagator, Propagation, SliceLabelMap},
    raster::LabelRaster,
    report::{ComparisonReport, CorrespondenceRow, OutcomeCounts, SliceReport},
    validity::{BorderFilter, BorderMode, ValidityFlags, exclude_invalid, label_bounding_boxes},
};

#[cfg(feature = "polars")]
pub use crate::report::{correspondence_dataframe, metrics_dataframe};
