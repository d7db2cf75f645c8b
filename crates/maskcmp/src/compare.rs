// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! End-to-end truth/test comparison.

use crate::{
    Anomaly, ComparisonConfig, Confusion, Error, Histogram1D, Histogram2D, IouMatrix, LabelRaster,
    MetricsRecord, Side, ValidityFlags,
    config::ComparatorMode,
    diagnostics::classify,
    matching::{Correspondence, MatchResult, candidates, match_greedy_exchange, match_histogram},
    metrics::{SweepAccumulator, pixel_confusion, pixel_confusion_labels, score_correspondence},
    objects::{BoundingBox, ConnectedComponents, LabeledObject, ObjectExtractor, overlap_matrix},
    report::{ComparisonReport, CorrespondenceRow, OutcomeCounts, SliceReport},
    validity::{BorderFilter, exclude_invalid, label_bounding_boxes},
};
use log::{info, warn};

/// Compares truth and test rasters under one configuration.
pub struct Comparator {
    config: ComparisonConfig,
    extractor: Box<dyn ObjectExtractor + Send + Sync>,
}

impl Comparator {
    /// Validates `config` and uses [`ConnectedComponents`] for objects mode.
    /// Small objects are kept by the extractor and flagged invalid through
    /// `min_size` so they appear as not analyzed.
    pub fn new(config: ComparisonConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Comparator {
            config,
            extractor: Box::new(ConnectedComponents::default()),
        })
    }

    /// Replaces the object extractor used in objects mode.
    pub fn with_extractor<E>(mut self, extractor: E) -> Self
    where
        E: ObjectExtractor + Send + Sync + 'static,
    {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn config(&self) -> &ComparisonConfig {
        &self.config
    }

    /// Runs the configured comparison. Rasters of different shape are
    /// rejected before any work is done.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
    pub fn compare(
        &self,
        truth: &LabelRaster,
        test: &LabelRaster,
    ) -> Result<ComparisonReport, Error> {
        truth.check_same_shape(test)?;
        let report = match self.config.mode {
            ComparatorMode::Histogram => self.compare_histogram(truth, test)?,
            ComparatorMode::Objects => self.compare_objects(truth, test)?,
        };
        info!(
            "compared {} truth and {} test objects ({} anomalies)",
            report.truth_objects,
            report.test_objects,
            report.anomalies.len()
        );
        Ok(report)
    }

    fn thresholds(&self) -> Result<Vec<f64>, Error> {
        if self.config.pixel_object_method {
            Ok(self.config.sweep()?.thresholds())
        } else {
            Ok(Vec::new())
        }
    }

    fn empty_report(&self, truth: &LabelRaster) -> ComparisonReport {
        ComparisonReport {
            mode: self.config.mode,
            border_mode: self.config.border_mode(),
            min_size: self.config.min_size,
            min_dist: self.config.min_dist,
            width: truth.width(),
            height: truth.height(),
            depth: truth.depth(),
            truth_objects: 0,
            test_objects: 0,
            truth_valid: 0,
            test_valid: 0,
            pixel: None,
            object: None,
            sweep: Vec::new(),
            truth_outcomes: OutcomeCounts::default(),
            test_outcomes: OutcomeCounts::default(),
            slices: Vec::new(),
            correspondences: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    // =========================================================================
    // Histogram mode
    // =========================================================================

    fn compare_histogram(
        &self,
        truth: &LabelRaster,
        test: &LabelRaster,
    ) -> Result<ComparisonReport, Error> {
        let cfg = &self.config;
        let thresholds = self.thresholds()?;
        let mut report = self.empty_report(truth);

        let mut truth = truth.clone();
        let truth_count = truth.normalize()?;
        let mut test = test.clone();
        let test_count = test.normalize()?;
        empty_set_anomalies(truth_count, test_count, None, &mut report.anomalies);

        let joint = Histogram2D::of_rasters(
            &truth,
            truth_count,
            &test,
            test_count,
            cfg.max_matrix_cells,
        )?;
        let h_truth = Histogram1D::of_raster(&truth, truth_count)?;
        let h_test = Histogram1D::of_raster(&test, test_count)?;
        let mut iou = IouMatrix::compute(&joint, &h_truth, &h_test)?;

        let border = cfg.border_filter();
        let mut truth_valid = ValidityFlags::from_sizes(&h_truth, cfg.min_size);
        border.apply(&truth, &mut truth_valid);
        let mut test_valid = ValidityFlags::from_sizes(&h_test, cfg.min_size);
        border.apply(&test, &mut test_valid);
        exclude_invalid(&mut iou, &truth_valid, &test_valid);

        let theta = cfg.object_threshold;
        for t in 1..iou.rows() {
            let found = candidates(&iou, t, theta);
            if truth_valid.is_valid(t) && found.len() > 1 {
                warn!(
                    "truth object {} matches {} test objects at IoU>={}",
                    t,
                    found.len(),
                    theta
                );
                report.anomalies.push(Anomaly::MultipleCandidates {
                    slice: None,
                    truth: t,
                    tests: found,
                    threshold: theta,
                });
            }
        }

        let matched = match_histogram(&iou, cfg.match_threshold(), cfg.match_policy);
        contest_anomalies(&matched, None, &mut report.anomalies);
        let correspondence = &matched.correspondence;

        report.pixel = cfg
            .pixel_method
            .then(|| pixel_confusion(&joint).record(None));
        report.object = cfg.object_method.then(|| {
            score_correspondence(correspondence, &truth_valid, &test_valid, theta)
                .record(Some(theta))
        });
        report.sweep = thresholds
            .iter()
            .map(|&th| {
                score_correspondence(correspondence, &truth_valid, &test_valid, th)
                    .record(Some(th))
            })
            .collect();

        let outcomes = classify(&iou, &truth_valid, &test_valid, |t, s| {
            accepted(correspondence, t, s, theta)
        });
        report.truth_outcomes = OutcomeCounts::from_outcomes(&outcomes.truth);
        report.test_outcomes = OutcomeCounts::from_outcomes(&outcomes.test);

        let boxes = stack_bounding_boxes(&truth);
        for t in 1..=truth_count as usize {
            let Some(bbox) = boxes.get(t).copied().flatten() else {
                continue;
            };
            let m = correspondence.get(t);
            report.correspondences.push(correspondence_row(
                None,
                t,
                m.map(|m| (m.test, m.overlap)),
                &bbox,
                truth.width(),
                truth.height(),
                truth_valid.is_valid(t),
                outcomes.truth[t],
            ));
        }

        report.truth_objects = truth_count as usize;
        report.test_objects = test_count as usize;
        report.truth_valid = truth_valid.valid_count();
        report.test_valid = test_valid.valid_count();
        Ok(report)
    }

    // =========================================================================
    // Objects mode
    // =========================================================================

    fn compare_objects(
        &self,
        truth: &LabelRaster,
        test: &LabelRaster,
    ) -> Result<ComparisonReport, Error> {
        let cfg = &self.config;
        let thresholds = self.thresholds()?;
        let border = cfg.border_filter();
        let theta = cfg.object_threshold;
        let (width, height) = (truth.width(), truth.height());
        let mut report = self.empty_report(truth);

        let mut pixel_total = Confusion::default();
        let mut object_total = Confusion::default();
        let mut sweep_total = SweepAccumulator::new(thresholds.clone());

        for z in 0..truth.depth() {
            let (truth_labels, test_labels) = (truth.slice(z), test.slice(z));
            let truth_objects = self.extractor.extract(truth_labels, width, height);
            let test_objects = self.extractor.extract(test_labels, width, height);
            log::debug!(
                "slice {}: {} truth objects, {} test objects",
                z,
                truth_objects.len(),
                test_objects.len()
            );
            empty_set_anomalies(
                truth_objects.len() as u32,
                test_objects.len() as u32,
                Some(z),
                &mut report.anomalies,
            );

            let truth_valid = self.object_flags(&truth_objects, &border, width, height);
            let test_valid = self.object_flags(&test_objects, &border, width, height);

            let overlaps = overlap_matrix(&truth_objects, &test_objects);
            let matched = match_greedy_exchange(&overlaps);
            contest_anomalies(&matched, Some(z), &mut report.anomalies);
            let correspondence = &matched.correspondence;

            let pixel = pixel_confusion_labels(truth_labels, test_labels);
            pixel_total.add(&pixel);
            let object = score_correspondence(correspondence, &truth_valid, &test_valid, theta);
            object_total.add(&object);
            let sweep: Vec<Confusion> = thresholds
                .iter()
                .map(|&th| score_correspondence(correspondence, &truth_valid, &test_valid, th))
                .collect();
            sweep_total.add(&sweep)?;

            let mut excluded = overlaps.clone();
            exclude_invalid(&mut excluded, &truth_valid, &test_valid);
            let outcomes = classify(&excluded, &truth_valid, &test_valid, |t, s| {
                accepted(correspondence, t, s, theta)
            });
            report
                .truth_outcomes
                .add(&OutcomeCounts::from_outcomes(&outcomes.truth));
            report
                .test_outcomes
                .add(&OutcomeCounts::from_outcomes(&outcomes.test));

            for object in &truth_objects {
                let t = object.id as usize;
                let m = correspondence.get(t);
                report.correspondences.push(correspondence_row(
                    Some(z),
                    t,
                    m.map(|m| (m.test, m.overlap)),
                    &object.bbox,
                    width,
                    height,
                    truth_valid.is_valid(t),
                    outcomes.truth[t],
                ));
            }

            report.truth_objects += truth_objects.len();
            report.test_objects += test_objects.len();
            report.truth_valid += truth_valid.valid_count();
            report.test_valid += test_valid.valid_count();
            report.slices.push(SliceReport {
                slice: z,
                truth_objects: truth_objects.len(),
                test_objects: test_objects.len(),
                pixel: cfg.pixel_method.then(|| pixel.record(None)),
                object: cfg.object_method.then(|| object.record(Some(theta))),
                sweep: thresholds
                    .iter()
                    .zip(&sweep)
                    .map(|(&th, c)| c.record(Some(th)))
                    .collect(),
            });
        }

        report.pixel = cfg.pixel_method.then(|| pixel_total.record(None));
        report.object = cfg.object_method.then(|| object_total.record(Some(theta)));
        report.sweep = sweep_total.records();
        Ok(report)
    }

    fn object_flags(
        &self,
        objects: &[LabeledObject],
        border: &BorderFilter,
        width: usize,
        height: usize,
    ) -> ValidityFlags {
        let mut flags = ValidityFlags::all_valid(objects.len());
        for object in objects {
            if (object.area() as f64) < self.config.min_size
                || !border.object_ok(object, width, height)
            {
                flags.invalidate(object.id as usize);
            }
        }
        flags
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether `truth` holds `test` with an overlap of at least `threshold`.
fn accepted(correspondence: &Correspondence, truth: usize, test: usize, threshold: f64) -> bool {
    correspondence
        .get(truth)
        .is_some_and(|m| m.test == test && m.overlap >= threshold)
}

fn empty_set_anomalies(truth: u32, test: u32, slice: Option<usize>, anomalies: &mut Vec<Anomaly>) {
    for (count, side) in [(truth, Side::Truth), (test, Side::Test)] {
        if count == 0 {
            let anomaly = Anomaly::EmptyObjectSet { slice, side };
            warn!("{}", anomaly);
            anomalies.push(anomaly);
        }
    }
}

fn contest_anomalies(matched: &MatchResult, slice: Option<usize>, anomalies: &mut Vec<Anomaly>) {
    anomalies.extend(matched.contests.iter().map(|c| Anomaly::ContestedMatch {
        slice,
        test: c.test,
        winner: c.winner,
        loser: c.loser,
    }));
}

#[allow(clippy::too_many_arguments)]
fn correspondence_row(
    slice: Option<usize>,
    truth: usize,
    matched: Option<(usize, f64)>,
    bbox: &BoundingBox,
    width: usize,
    height: usize,
    valid: bool,
    outcome: crate::Outcome,
) -> CorrespondenceRow {
    let (center_x, center_y) = bbox.center();
    CorrespondenceRow {
        slice,
        truth,
        test: matched.map(|(s, _)| s),
        iou: matched.map(|(_, iou)| iou),
        center_x,
        center_y,
        center_distance: bbox.center_distance_to_border(width, height),
        valid,
        outcome,
    }
}

/// Bounding box of every label projected over all slices.
fn stack_bounding_boxes(raster: &LabelRaster) -> Vec<Option<BoundingBox>> {
    let mut boxes: Vec<Option<BoundingBox>> = vec![None; raster.max_label() as usize + 1];
    for z in 0..raster.depth() {
        for (label, bbox) in label_bounding_boxes(raster.slice(z), raster.width())
            .into_iter()
            .enumerate()
        {
            let Some(bbox) = bbox else { continue };
            boxes[label] = Some(match boxes[label] {
                None => bbox,
                Some(b) => {
                    let x1 = (b.x + b.width).max(bbox.x + bbox.width);
                    let y1 = (b.y + b.height).max(bbox.y + bbox.height);
                    let x = b.x.min(bbox.x);
                    let y = b.y.min(bbox.y);
                    BoundingBox {
                        x,
                        y,
                        width: x1 - x,
                        height: y1 - y,
                    }
                }
            });
        }
    }
    boxes
}

/// Pixel-level record of two rasters without building an object table.
pub fn pixel_record(truth: &LabelRaster, test: &LabelRaster) -> Result<MetricsRecord, Error> {
    truth.check_same_shape(test)?;
    Ok(pixel_confusion_labels(truth.data(), test.data()).record(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Outcome, validity::BorderMode};

    fn raster(width: usize, height: usize, data: &[u32]) -> LabelRaster {
        LabelRaster::from_vec(width, height, data.len() / (width * height), data.to_vec()).unwrap()
    }

    fn config(mode: ComparatorMode) -> ComparisonConfig {
        ComparisonConfig {
            mode,
            min_dist: -1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_masks_pixel_perfect() {
        #[rustfmt::skip]
        let data = [
            0, 0, 0, 0,
            0, 1, 1, 0,
            0, 1, 1, 0,
            0, 0, 0, 0,
        ];
        let truth = raster(4, 4, &data);
        for mode in [ComparatorMode::Histogram, ComparatorMode::Objects] {
            let report = Comparator::new(config(mode)).unwrap().compare(&truth, &truth).unwrap();
            let pixel = report.pixel.unwrap();
            assert_eq!((pixel.tp, pixel.fp, pixel.fn_), (4, 0, 0));
            for stat in [pixel.precision, pixel.recall, pixel.jaccard, pixel.fmeasure] {
                assert!((stat - 1.0).abs() < 1e-6);
            }
            let object = report.object.unwrap();
            assert_eq!((object.tp, object.fp, object.fn_), (1, 0, 0));
            assert_eq!(report.correspondences[0].test, Some(1));
        }
    }

    #[test]
    fn test_shape_mismatch_aborts() {
        let a = LabelRaster::zeros(4, 4, 1);
        let b = LabelRaster::zeros(5, 4, 1);
        let comparator = Comparator::new(ComparisonConfig::default()).unwrap();
        assert!(matches!(
            comparator.compare(&a, &b),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_histogram_border_filter_excludes_objects() {
        #[rustfmt::skip]
        let data = [
            1, 0, 0, 0,
            0, 0, 0, 0,
            0, 0, 2, 0,
            0, 0, 0, 0,
        ];
        let truth = raster(4, 4, &data);
        let cfg = ComparisonConfig {
            min_dist: 0.0,
            ..Default::default()
        };
        let report = Comparator::new(cfg).unwrap().compare(&truth, &truth).unwrap();
        assert_eq!(report.truth_valid, 1);
        assert_eq!(report.test_valid, 1);
        let object = report.object.unwrap();
        assert_eq!((object.tp, object.fp, object.fn_), (1, 0, 0));
        assert_eq!(report.truth_outcomes.not_analyzed, 1);
        // pixel scoring ignores validity
        assert_eq!(report.pixel.unwrap().tp, 2);
    }

    #[test]
    fn test_objects_mode_center_distance_default() {
        #[rustfmt::skip]
        let data = [
            1, 1, 0, 0, 0,
            0, 0, 0, 0, 0,
            0, 0, 2, 0, 0,
            0, 0, 0, 0, 0,
            0, 0, 0, 0, 0,
        ];
        let truth = raster(5, 5, &data);
        let cfg = ComparisonConfig {
            mode: ComparatorMode::Objects,
            min_dist: 0.0,
            ..Default::default()
        };
        let report = Comparator::new(cfg).unwrap().compare(&truth, &truth).unwrap();
        assert_eq!(report.border_mode, BorderMode::CenterDistance);
        assert_eq!(report.truth_objects, 2);
        assert_eq!(report.truth_valid, 1);
        assert!(!report.correspondences[0].valid);
        assert!((report.correspondences[1].center_distance - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_stack_totals_from_summed_counts() {
        // slice 0 matches, slice 1 has one missed and one spurious object
        #[rustfmt::skip]
        let truth = raster(3, 1, &[
            1, 0, 0,
            2, 0, 0,
        ]);
        #[rustfmt::skip]
        let test = raster(3, 1, &[
            5, 0, 0,
            0, 0, 4,
        ]);
        let report = Comparator::new(config(ComparatorMode::Objects))
            .unwrap()
            .compare(&truth, &test)
            .unwrap();
        assert_eq!(report.slices.len(), 2);
        let object = report.object.unwrap();
        assert_eq!((object.tp, object.fp, object.fn_), (1, 1, 1));
        assert!((object.precision - 0.5).abs() < 1e-6);
        assert_eq!(report.sweep.len(), 11);
        assert_eq!(report.sweep[0].tp, 1);
        assert_eq!(report.truth_outcomes.missed, 1);
        assert_eq!(report.test_outcomes.spurious, 1);
    }

    #[test]
    fn test_split_reported_in_outcomes() {
        #[rustfmt::skip]
        let truth = raster(2, 2, &[
            1, 1,
            1, 1,
        ]);
        #[rustfmt::skip]
        let test = raster(2, 2, &[
            1, 1,
            2, 2,
        ]);
        let cfg = ComparisonConfig {
            object_threshold: 0.6,
            ..config(ComparatorMode::Histogram)
        };
        let report = Comparator::new(cfg).unwrap().compare(&truth, &test).unwrap();
        let object = report.object.unwrap();
        assert_eq!((object.tp, object.fp, object.fn_), (0, 2, 1));
        assert_eq!(report.correspondences[0].outcome, Outcome::Split);
        assert_eq!(report.test_outcomes.split, 2);
        assert_eq!(report.truth_outcomes.fused, 0);
    }

    #[test]
    fn test_fused_truth_scores_once_in_both_modes() {
        #[rustfmt::skip]
        let truth = raster(2, 2, &[
            1, 1,
            2, 2,
        ]);
        let test = raster(2, 2, &[1, 1, 1, 1]);
        for mode in [ComparatorMode::Histogram, ComparatorMode::Objects] {
            let report = Comparator::new(config(mode))
                .unwrap()
                .compare(&truth, &test)
                .unwrap();
            let object = report.object.unwrap();
            assert_eq!((object.tp, object.fp, object.fn_), (1, 0, 1), "{:?}", mode);
            assert_eq!(report.sweep[0].tp, 1);
            assert_eq!(report.truth_outcomes.matched, 1);
            assert_eq!(report.truth_outcomes.fused, 1);
            assert_eq!(report.test_outcomes.matched, 1);
            assert_eq!(report.correspondences[0].test, Some(1));
            assert_eq!(report.correspondences[1].test, None);
            assert_eq!(report.correspondences[1].outcome, Outcome::Fused);
        }
    }

    #[test]
    fn test_multiple_candidates_counted_once() {
        let truth = raster(2, 2, &[1, 1, 1, 1]);
        #[rustfmt::skip]
        let test = raster(2, 2, &[
            1, 1,
            2, 2,
        ]);
        let cfg = ComparisonConfig {
            object_threshold: 0.3,
            ..config(ComparatorMode::Histogram)
        };
        let report = Comparator::new(cfg).unwrap().compare(&truth, &test).unwrap();
        let object = report.object.unwrap();
        assert_eq!((object.tp, object.fp, object.fn_), (1, 1, 0));
        assert!(report.anomalies.contains(&Anomaly::MultipleCandidates {
            slice: None,
            truth: 1,
            tests: vec![1, 2],
            threshold: 0.3,
        }));
        assert_eq!(report.truth_outcomes.matched, 1);
        assert_eq!(report.test_outcomes.split, 1);
    }

    #[test]
    fn test_empty_test_mask_reports_anomaly() {
        let mut truth = LabelRaster::zeros(5, 5, 1);
        for x in 0..5 {
            truth.set(x, 1, 0, 1);
            truth.set(x, 2, 0, 1);
        }
        let test = LabelRaster::zeros(5, 5, 1);
        let report = Comparator::new(config(ComparatorMode::Histogram))
            .unwrap()
            .compare(&truth, &test)
            .unwrap();
        let object = report.object.unwrap();
        assert_eq!((object.tp, object.fp, object.fn_), (0, 0, 1));
        assert!(object.precision.is_nan());
        assert_eq!(object.recall, 0.0);
        assert!(report.anomalies.contains(&Anomaly::EmptyObjectSet {
            slice: None,
            side: Side::Test
        }));
    }

    #[test]
    fn test_disabled_methods_are_absent() {
        let cfg = ComparisonConfig {
            object_method: false,
            pixel_object_method: false,
            ..config(ComparatorMode::Histogram)
        };
        let truth = raster(2, 1, &[1, 0]);
        let report = Comparator::new(cfg).unwrap().compare(&truth, &truth).unwrap();
        assert!(report.pixel.is_some());
        assert!(report.object.is_none());
        assert!(report.sweep.is_empty());
    }

    #[test]
    fn test_objects_min_size_marks_not_analyzed() {
        let truth = raster(5, 1, &[1, 0, 2, 2, 2]);
        let cfg = ComparisonConfig {
            min_size: 2.0,
            ..config(ComparatorMode::Objects)
        };
        let report = Comparator::new(cfg).unwrap().compare(&truth, &truth).unwrap();
        assert_eq!(report.truth_objects, 2);
        assert_eq!(report.truth_valid, 1);
        assert_eq!(report.truth_outcomes.not_analyzed, 1);
        assert_eq!(report.truth_outcomes.matched, 1);
        let object = report.object.unwrap();
        assert_eq!((object.tp, object.fp, object.fn_), (1, 0, 0));
    }

    #[test]
    fn test_custom_extractor() {
        let truth = raster(5, 1, &[1, 0, 2, 2, 2]);
        let report = Comparator::new(config(ComparatorMode::Objects))
            .unwrap()
            .with_extractor(ConnectedComponents::new(2))
            .compare(&truth, &truth)
            .unwrap();
        assert_eq!(report.truth_objects, 1);
        assert_eq!(report.correspondences.len(), 1);
    }

    #[test]
    fn test_pixel_record() {
        let a = raster(3, 1, &[1, 1, 0]);
        let b = raster(3, 1, &[0, 2, 2]);
        let record = pixel_record(&a, &b).unwrap();
        assert_eq!((record.tp, record.fp, record.fn_), (1, 1, 1));
    }
}
