// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Comparison results and their tabular forms.

use crate::{
    Anomaly, MetricsRecord, Outcome,
    config::ComparatorMode,
    metrics::format_stat,
    validity::BorderMode,
};
use serde::Serialize;
use std::fmt;

#[cfg(feature = "polars")]
use polars::prelude::*;

/// Number of objects per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub matched: usize,
    pub split: usize,
    pub fused: usize,
    pub under_threshold: usize,
    pub missed: usize,
    pub spurious: usize,
    pub not_analyzed: usize,
}

impl OutcomeCounts {
    /// Counts foreground entries of a label-indexed outcome list.
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut counts = OutcomeCounts::default();
        for outcome in outcomes.iter().skip(1) {
            counts.push(*outcome);
        }
        counts
    }

    pub fn push(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Matched => self.matched += 1,
            Outcome::Split => self.split += 1,
            Outcome::Fused => self.fused += 1,
            Outcome::UnderThreshold => self.under_threshold += 1,
            Outcome::Missed => self.missed += 1,
            Outcome::Spurious => self.spurious += 1,
            Outcome::NotAnalyzed => self.not_analyzed += 1,
        }
    }

    pub fn add(&mut self, other: &OutcomeCounts) {
        self.matched += other.matched;
        self.split += other.split;
        self.fused += other.fused;
        self.under_threshold += other.under_threshold;
        self.missed += other.missed;
        self.spurious += other.spurious;
        self.not_analyzed += other.not_analyzed;
    }
}

/// One truth object with its assigned test object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrespondenceRow {
    /// Slice of the object, `None` for whole-stack comparisons.
    pub slice: Option<usize>,
    pub truth: usize,
    pub test: Option<usize>,
    pub iou: Option<f64>,
    pub center_x: f64,
    pub center_y: f64,
    /// Distance from the bounding box center to the nearest raster edge.
    pub center_distance: f64,
    pub valid: bool,
    /// Outcome at the object threshold.
    pub outcome: Outcome,
}

/// Results of one slice in objects mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceReport {
    pub slice: usize,
    pub truth_objects: usize,
    pub test_objects: usize,
    pub pixel: Option<MetricsRecord>,
    pub object: Option<MetricsRecord>,
    pub sweep: Vec<MetricsRecord>,
}

/// Full result of comparing a truth raster with a test raster.
///
/// For multi-slice inputs in objects mode the top-level records are
/// recomputed from counts summed over `slices`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub mode: ComparatorMode,
    pub border_mode: BorderMode,
    pub min_size: f64,
    pub min_dist: f64,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub truth_objects: usize,
    pub test_objects: usize,
    pub truth_valid: usize,
    pub test_valid: usize,
    pub pixel: Option<MetricsRecord>,
    pub object: Option<MetricsRecord>,
    pub sweep: Vec<MetricsRecord>,
    pub truth_outcomes: OutcomeCounts,
    pub test_outcomes: OutcomeCounts,
    pub slices: Vec<SliceReport>,
    pub correspondences: Vec<CorrespondenceRow>,
    pub anomalies: Vec<Anomaly>,
}

const RULE_TOP: &str = "╔══════════════════════════════════════════════════════════════╗";
const RULE_MID: &str = "╠══════════════════════════════════════════════════════════════╣";
const RULE_END: &str = "╚══════════════════════════════════════════════════════════════╝";

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE_TOP)?;
        writeln!(
            f,
            "║                    MASK COMPARISON REPORT                    ║"
        )?;
        writeln!(f, "{}", RULE_MID)?;
        writeln!(
            f,
            "║ Mode:        {} ({}, min_dist {}, min_size {})",
            self.mode, self.border_mode, self.min_dist, self.min_size
        )?;
        writeln!(
            f,
            "║ Raster:      {}x{}x{}",
            self.width, self.height, self.depth
        )?;
        writeln!(
            f,
            "║ Objects:     {} truth ({} valid), {} test ({} valid)",
            self.truth_objects, self.truth_valid, self.test_objects, self.test_valid
        )?;
        writeln!(f, "{}", RULE_MID)?;
        if let Some(pixel) = &self.pixel {
            writeln!(f, "║ {}", pixel)?;
        }
        if let Some(object) = &self.object {
            writeln!(f, "║ {}", object)?;
        }
        if !self.sweep.is_empty() {
            writeln!(f, "║ Threshold sweep:")?;
            for record in &self.sweep {
                writeln!(
                    f,
                    "║   {:>5.2}  tp={:<5} fp={:<5} fn={:<5} jaccard={} f={}",
                    record.threshold.unwrap_or(f64::NAN),
                    record.tp,
                    record.fp,
                    record.fn_,
                    format_stat(record.jaccard),
                    format_stat(record.fmeasure)
                )?;
            }
        }
        writeln!(f, "{}", RULE_MID)?;
        let t = &self.truth_outcomes;
        writeln!(
            f,
            "║ Truth:       matched {}, split {}, fused {}, under {}, missed {}, excluded {}",
            t.matched, t.split, t.fused, t.under_threshold, t.missed, t.not_analyzed
        )?;
        let s = &self.test_outcomes;
        writeln!(
            f,
            "║ Test:        matched {}, split {}, fused {}, under {}, spurious {}, excluded {}",
            s.matched, s.split, s.fused, s.under_threshold, s.spurious, s.not_analyzed
        )?;
        if !self.anomalies.is_empty() {
            writeln!(f, "║ Anomalies:   {}", self.anomalies.len())?;
            for anomaly in self.anomalies.iter().take(5) {
                writeln!(f, "║   - {}", anomaly)?;
            }
            if self.anomalies.len() > 5 {
                writeln!(f, "║   ... and {} more", self.anomalies.len() - 5)?;
            }
        }
        writeln!(f, "{}", RULE_END)
    }
}

impl ComparisonReport {
    /// `(scope, slice, record)` for every metrics record of the report.
    pub fn records(&self) -> Vec<(&'static str, Option<usize>, &MetricsRecord)> {
        let groups = self
            .slices
            .iter()
            .map(|s| (Some(s.slice), &s.pixel, &s.object, &s.sweep))
            .chain(std::iter::once((None, &self.pixel, &self.object, &self.sweep)));

        let mut out = Vec::new();
        for (slice, pixel, object, sweep) in groups {
            if let Some(r) = pixel {
                out.push(("pixel", slice, r));
            }
            if let Some(r) = object {
                out.push(("object", slice, r));
            }
            out.extend(sweep.iter().map(|r| ("sweep", slice, r)));
        }
        out
    }
}

/// Metrics of a report as a DataFrame, one row per record. Stack-level rows
/// have a null `slice`.
#[cfg(feature = "polars")]
pub fn metrics_dataframe(report: &ComparisonReport) -> Result<DataFrame, crate::Error> {
    use itertools::Itertools;
    use std::sync::Arc;

    let (scopes, slices, thresholds, tps, fps, fns, precisions, recalls, jaccards, fmeasures) =
        report
            .records()
            .into_iter()
            .map(|(scope, slice, r)| {
                (
                    scope,
                    slice.map(|z| z as u32),
                    r.threshold,
                    r.tp,
                    r.fp,
                    r.fn_,
                    r.precision,
                    r.recall,
                    r.jaccard,
                    r.fmeasure,
                )
            })
            .multiunzip::<(
                Vec<_>, // scopes
                Vec<_>, // slices
                Vec<_>, // thresholds
                Vec<_>, // tps
                Vec<_>, // fps
                Vec<_>, // fns
                Vec<_>, // precisions
                Vec<_>, // recalls
                Vec<_>, // jaccards
                Vec<_>, // fmeasures
            )>();

    let scopes = Series::new("scope".into(), scopes)
        .cast(&DataType::Categorical(
            Categories::new("scopes".into(), "scopes".into(), CategoricalPhysical::U8),
            Arc::new(CategoricalMapping::new(u8::MAX as usize)),
        ))?
        .into();

    Ok(DataFrame::new(vec![
        scopes,
        Series::new("slice".into(), slices).into(),
        Series::new("threshold".into(), thresholds).into(),
        Series::new("tp".into(), tps).into(),
        Series::new("fp".into(), fps).into(),
        Series::new("fn".into(), fns).into(),
        Series::new("precision".into(), precisions).into(),
        Series::new("recall".into(), recalls).into(),
        Series::new("jaccard".into(), jaccards).into(),
        Series::new("fmeasure".into(), fmeasures).into(),
    ])?)
}

/// Correspondence table of a report as a DataFrame.
#[cfg(feature = "polars")]
pub fn correspondence_dataframe(report: &ComparisonReport) -> Result<DataFrame, crate::Error> {
    use itertools::Itertools;
    use std::sync::Arc;

    let (slices, truths, tests, ious, cxs, cys, dists, valids, outcomes) = report
        .correspondences
        .iter()
        .map(|row| {
            (
                row.slice.map(|z| z as u32),
                row.truth as u32,
                row.test.map(|s| s as u32),
                row.iou,
                row.center_x,
                row.center_y,
                row.center_distance,
                row.valid,
                outcome_name(row.outcome),
            )
        })
        .multiunzip::<(
            Vec<_>, // slices
            Vec<_>, // truths
            Vec<_>, // tests
            Vec<_>, // ious
            Vec<_>, // cxs
            Vec<_>, // cys
            Vec<_>, // dists
            Vec<_>, // valids
            Vec<_>, // outcomes
        )>();

    let outcomes = Series::new("outcome".into(), outcomes)
        .cast(&DataType::Categorical(
            Categories::new("outcomes".into(), "outcomes".into(), CategoricalPhysical::U8),
            Arc::new(CategoricalMapping::new(u8::MAX as usize)),
        ))?
        .into();

    Ok(DataFrame::new(vec![
        Series::new("slice".into(), slices).into(),
        Series::new("truth".into(), truths).into(),
        Series::new("test".into(), tests).into(),
        Series::new("iou".into(), ious).into(),
        Series::new("center_x".into(), cxs).into(),
        Series::new("center_y".into(), cys).into(),
        Series::new("center_distance".into(), dists).into(),
        Series::new("valid".into(), valids).into(),
        outcomes,
    ])?)
}

#[cfg(feature = "polars")]
fn outcome_name(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Matched => "matched",
        Outcome::Split => "split",
        Outcome::Fused => "fused",
        Outcome::UnderThreshold => "under_threshold",
        Outcome::Missed => "missed",
        Outcome::Spurious => "spurious",
        Outcome::NotAnalyzed => "not_analyzed",
    }
}
