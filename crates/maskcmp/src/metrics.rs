// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Confusion counts, derived statistics and IoU threshold sweeps.
//!
//! Statistics with a zero denominator are `NaN` and stay `NaN`: they are
//! written as `null` in JSON and as "undefined" in text output.

use crate::{Correspondence, Error, Histogram2D, ValidityFlags};
use serde::Serialize;
use std::fmt;

/// Tolerance used when comparing thresholds against the sweep maximum.
pub const SWEEP_EPSILON: f64 = 1e-6;

/// True positive, false positive and false negative counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Confusion {
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
}

impl Confusion {
    pub fn new(tp: u64, fp: u64, fn_: u64) -> Self {
        Confusion { tp, fp, fn_ }
    }

    /// `tp / (tp + fp)`
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// `tp / (tp + fn)`
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// `tp / (tp + fp + fn)`
    pub fn jaccard(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp + self.fn_)
    }

    /// Harmonic mean of precision and recall.
    pub fn fmeasure(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        2.0 * p * r / (p + r)
    }

    pub fn add(&mut self, other: &Confusion) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.fn_ += other.fn_;
    }

    /// Statistics for these counts at `threshold`.
    pub fn record(&self, threshold: Option<f64>) -> MetricsRecord {
        MetricsRecord {
            threshold,
            tp: self.tp,
            fp: self.fp,
            fn_: self.fn_,
            precision: self.precision(),
            recall: self.recall(),
            jaccard: self.jaccard(),
            fmeasure: self.fmeasure(),
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        f64::NAN
    } else {
        num as f64 / den as f64
    }
}

/// Counts and statistics for one threshold. `threshold` is `None` for
/// pixel-level records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsRecord {
    pub threshold: Option<f64>,
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub precision: f64,
    pub recall: f64,
    pub jaccard: f64,
    pub fmeasure: f64,
}

impl MetricsRecord {
    pub fn confusion(&self) -> Confusion {
        Confusion::new(self.tp, self.fp, self.fn_)
    }
}

/// Formats a statistic, writing `undefined` for `NaN`.
pub fn format_stat(value: f64) -> String {
    if value.is_nan() {
        "undefined".to_owned()
    } else {
        format!("{:.4}", value)
    }
}

impl fmt::Display for MetricsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.threshold {
            Some(t) => write!(f, "IoU>={:<5.2} ", t)?,
            None => write!(f, "pixel      ")?,
        }
        write!(
            f,
            "tp={} fp={} fn={} precision={} recall={} jaccard={} fmeasure={}",
            self.tp,
            self.fp,
            self.fn_,
            format_stat(self.precision),
            format_stat(self.recall),
            format_stat(self.jaccard),
            format_stat(self.fmeasure)
        )
    }
}

/// Foreground/background agreement ignoring object identity.
pub fn pixel_confusion(joint: &Histogram2D) -> Confusion {
    let mut confusion = Confusion::default();
    for t in 0..joint.rows() {
        for (s, &count) in joint.row(t).iter().enumerate() {
            match (t > 0, s > 0) {
                (true, true) => confusion.tp += count,
                (false, true) => confusion.fp += count,
                (true, false) => confusion.fn_ += count,
                (false, false) => {}
            }
        }
    }
    confusion
}

/// Pixel-level counts straight from two equally long label buffers.
pub fn pixel_confusion_labels(truth: &[u32], test: &[u32]) -> Confusion {
    let mut confusion = Confusion::default();
    for (&t, &s) in truth.iter().zip(test) {
        match (t > 0, s > 0) {
            (true, true) => confusion.tp += 1,
            (false, true) => confusion.fp += 1,
            (true, false) => confusion.fn_ += 1,
            (false, false) => {}
        }
    }
    confusion
}

/// Object-level counts from a fixed correspondence.
///
/// A valid truth label is a tp when its match reaches `threshold`, otherwise
/// a fn. A valid test label is a fp when it is unmatched or held by a valid
/// truth label whose overlap is below `threshold`. Test labels held by an
/// invalid truth label are not counted.
pub fn score_correspondence(
    correspondence: &Correspondence,
    truth_valid: &ValidityFlags,
    test_valid: &ValidityFlags,
    threshold: f64,
) -> Confusion {
    let mut confusion = Confusion::default();
    let mut owner = vec![None; test_valid.len()];

    for (t, m) in correspondence.iter() {
        if let Some(m) = m {
            if let Some(slot) = owner.get_mut(m.test) {
                *slot = Some((t, m.overlap));
            }
        }
        if !truth_valid.is_valid(t) {
            continue;
        }
        match m {
            Some(m) if m.overlap >= threshold => confusion.tp += 1,
            _ => confusion.fn_ += 1,
        }
    }

    for (s, held) in owner.iter().enumerate().skip(1) {
        if !test_valid.is_valid(s) {
            continue;
        }
        match held {
            None => confusion.fp += 1,
            Some((t, overlap)) if truth_valid.is_valid(*t) && *overlap < threshold => {
                confusion.fp += 1
            }
            Some(_) => {}
        }
    }
    confusion
}

/// Ordered IoU thresholds `min, min + inc, ...` up to `max` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdSweep {
    pub min: f64,
    pub max: f64,
    pub increment: f64,
}

impl ThresholdSweep {
    pub fn new(min: f64, max: f64, increment: f64) -> Result<Self, Error> {
        let sweep = ThresholdSweep { min, max, increment };
        sweep.validate()?;
        Ok(sweep)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [("min", self.min), ("max", self.max), ("increment", self.increment)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidParameters(format!(
                    "overlap {} {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        if self.increment <= 0.0 {
            return Err(Error::InvalidParameters(
                "overlap increment must be positive".to_owned(),
            ));
        }
        if self.min > self.max + SWEEP_EPSILON {
            return Err(Error::InvalidParameters(format!(
                "overlap min {} exceeds max {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Thresholds of the sweep, rounded to 1e-6 to absorb step error.
    pub fn thresholds(&self) -> Vec<f64> {
        let mut out = Vec::new();
        let mut i = 0u32;
        loop {
            let value = self.min + i as f64 * self.increment;
            if value > self.max + SWEEP_EPSILON {
                break;
            }
            out.push((value * 1e6).round() / 1e6);
            i += 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.thresholds().len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds().is_empty()
    }
}

/// Per-threshold running totals across slices or images.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepAccumulator {
    thresholds: Vec<f64>,
    totals: Vec<Confusion>,
}

impl SweepAccumulator {
    pub fn new(thresholds: Vec<f64>) -> Self {
        let totals = vec![Confusion::default(); thresholds.len()];
        SweepAccumulator { thresholds, totals }
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Adds one set of per-threshold counts, aligned with the thresholds.
    pub fn add(&mut self, counts: &[Confusion]) -> Result<(), Error> {
        if counts.len() != self.totals.len() {
            return Err(Error::InvalidParameters(format!(
                "{} counts for {} thresholds",
                counts.len(),
                self.totals.len()
            )));
        }
        for (total, c) in self.totals.iter_mut().zip(counts) {
            total.add(c);
        }
        Ok(())
    }

    /// Adds the counts carried by a set of records.
    pub fn add_records(&mut self, records: &[MetricsRecord]) -> Result<(), Error> {
        let counts: Vec<Confusion> = records.iter().map(MetricsRecord::confusion).collect();
        self.add(&counts)
    }

    pub fn totals(&self) -> &[Confusion] {
        &self.totals
    }

    /// Statistics recomputed from the summed counts.
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.thresholds
            .iter()
            .zip(&self.totals)
            .map(|(&t, c)| c.record(Some(t)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Histogram2D, IouMatrix,
        histogram::DEFAULT_MAX_MATRIX_CELLS,
        matching::{MatchPolicy, match_histogram},
    };

    #[test]
    fn test_statistics() {
        let c = Confusion::new(6, 2, 4);
        assert!((c.precision() - 0.75).abs() < 1e-6);
        assert!((c.recall() - 0.6).abs() < 1e-6);
        assert!((c.jaccard() - 0.5).abs() < 1e-6);
        assert!((c.fmeasure() - 2.0 * 0.75 * 0.6 / 1.35).abs() < 1e-6);
    }

    #[test]
    fn test_zero_denominators_are_nan() {
        let c = Confusion::new(0, 0, 1);
        assert!(c.precision().is_nan());
        assert_eq!(c.recall(), 0.0);
        assert!(c.fmeasure().is_nan());
        let empty = Confusion::default();
        assert!(empty.jaccard().is_nan());
    }

    #[test]
    fn test_nan_serializes_as_null() {
        let record = Confusion::new(0, 0, 1).record(Some(0.5));
        let json = serde_json::to_value(record).unwrap();
        assert!(json["precision"].is_null());
        assert_eq!(json["recall"], 0.0);
        assert_eq!(json["fn"], 1);
        assert_eq!(format_stat(record.precision), "undefined");
    }

    #[test]
    fn test_pixel_confusion() {
        let truth = [0, 1, 1, 2, 0];
        let test = [3, 1, 0, 2, 0];
        let joint =
            Histogram2D::from_labels(&truth, 2, &test, 3, DEFAULT_MAX_MATRIX_CELLS).unwrap();
        assert_eq!(pixel_confusion(&joint), Confusion::new(2, 1, 1));
        assert_eq!(pixel_confusion_labels(&truth, &test), pixel_confusion(&joint));
    }

    #[test]
    fn test_sweep_inclusive_of_max() {
        let sweep = ThresholdSweep::new(0.5, 1.0, 0.05).unwrap();
        let thresholds = sweep.thresholds();
        assert_eq!(thresholds.len(), 11);
        assert!((thresholds[0] - 0.5).abs() < 1e-9);
        assert!((thresholds[10] - 1.0).abs() < 1e-9);
        assert!((thresholds[3] - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_sweep_single_threshold() {
        let sweep = ThresholdSweep::new(0.5, 0.5, 0.1).unwrap();
        assert_eq!(sweep.thresholds(), vec![0.5]);
    }

    #[test]
    fn test_sweep_rejects_bad_ranges() {
        assert!(ThresholdSweep::new(0.5, 1.0, 0.0).is_err());
        assert!(ThresholdSweep::new(0.8, 0.5, 0.1).is_err());
        assert!(ThresholdSweep::new(-0.1, 0.5, 0.1).is_err());
        assert!(ThresholdSweep::new(0.1, 1.5, 0.1).is_err());
    }

    #[test]
    fn test_accumulator_sums_counts_not_ratios() {
        let mut acc = SweepAccumulator::new(vec![0.5]);
        acc.add(&[Confusion::new(1, 0, 0)]).unwrap();
        acc.add(&[Confusion::new(1, 3, 0)]).unwrap();
        let records = acc.records();
        // averaging per-slice precision would give (1.0 + 0.25) / 2
        assert!((records[0].precision - 2.0 / 5.0).abs() < 1e-6);
        assert_eq!(acc.totals()[0], Confusion::new(2, 3, 0));
        assert!(acc.add(&[]).is_err());
    }

    #[test]
    fn test_score_correspondence() {
        let mut iou = IouMatrix::zeros(4, 4);
        iou.set(1, 1, 0.9);
        iou.set(2, 2, 0.4);
        iou.set(3, 3, 0.8);
        let result = match_histogram(&iou, 0.0, MatchPolicy::LastAboveThreshold);
        let mut truth_valid = ValidityFlags::all_valid(3);
        truth_valid.invalidate(3);
        let test_valid = ValidityFlags::all_valid(3);

        let c = score_correspondence(&result.correspondence, &truth_valid, &test_valid, 0.5);
        // truth 1 tp, truth 2 fn, test 2 fp, test 3 held by invalid truth 3
        assert_eq!(c, Confusion::new(1, 1, 1));
    }

    #[test]
    fn test_score_correspondence_counts_multiplicity_once() {
        // truth 1 qualifies with tests 1 and 2, truth 2 overlaps test 2 below 0.5
        let mut iou = IouMatrix::zeros(3, 3);
        iou.set(1, 1, 0.6);
        iou.set(1, 2, 0.55);
        iou.set(2, 2, 0.3);
        let result = match_histogram(&iou, 0.5, MatchPolicy::LastAboveThreshold);
        let valid = ValidityFlags::all_valid(2);
        let c = score_correspondence(&result.correspondence, &valid, &valid, 0.5);
        // test 1 is left over as a fp
        assert_eq!(c, Confusion::new(1, 1, 1));

        let mut last_tp = u64::MAX;
        for th in ThresholdSweep::new(0.0, 1.0, 0.05).unwrap().thresholds() {
            let c = score_correspondence(&result.correspondence, &valid, &valid, th);
            assert!(c.tp <= last_tp);
            assert_eq!(c.tp + c.fn_, 2);
            last_tp = c.tp;
        }
    }
}
