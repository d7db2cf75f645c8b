// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-object outcome classification and anomaly records.

use crate::{IouMatrix, ValidityFlags};
use serde::Serialize;

/// Why an object did or did not count as a true positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Paired with an object of the other mask at the threshold.
    Matched,
    /// A truth object overlapping several test objects, none accepted, or a
    /// test object that is one of those pieces.
    Split,
    /// A test object overlapping several truth objects, none accepted, or a
    /// truth object that is one of those pieces.
    Fused,
    /// One overlapping partner whose IoU is below the threshold.
    UnderThreshold,
    /// Truth object with no overlapping test object.
    Missed,
    /// Test object with no overlapping truth object.
    Spurious,
    /// Excluded by the size or border filter.
    NotAnalyzed,
}

/// Outcome of every label on both sides, indexed by label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectOutcomes {
    pub truth: Vec<Outcome>,
    pub test: Vec<Outcome>,
}

impl ObjectOutcomes {
    pub fn truth_count(&self, outcome: Outcome) -> usize {
        self.truth.iter().skip(1).filter(|&&o| o == outcome).count()
    }

    pub fn test_count(&self, outcome: Outcome) -> usize {
        self.test.iter().skip(1).filter(|&&o| o == outcome).count()
    }
}

/// Classifies every object given an overlap matrix with exclusions applied
/// and the set of pairs accepted at the current threshold.
pub fn classify<F>(
    overlaps: &IouMatrix,
    truth_valid: &ValidityFlags,
    test_valid: &ValidityFlags,
    accepted: F,
) -> ObjectOutcomes
where
    F: Fn(usize, usize) -> bool,
{
    let truth_partners: Vec<Vec<usize>> = (0..overlaps.rows())
        .map(|t| overlaps.overlapping(t).map(|(s, _)| s).collect())
        .collect();
    let test_partners: Vec<Vec<usize>> = (0..overlaps.cols())
        .map(|s| overlaps.overlapping_col(s).map(|(t, _)| t).collect())
        .collect();

    let mut truth = vec![Outcome::NotAnalyzed; overlaps.rows()];
    for (t, partners) in truth_partners.iter().enumerate().skip(1) {
        if !truth_valid.is_valid(t) {
            continue;
        }
        truth[t] = if partners.iter().any(|&s| accepted(t, s)) {
            Outcome::Matched
        } else {
            match partners.as_slice() {
                [] => Outcome::Missed,
                [s] if test_partners[*s].len() > 1 => Outcome::Fused,
                [_] => Outcome::UnderThreshold,
                _ => Outcome::Split,
            }
        };
    }

    let mut test = vec![Outcome::NotAnalyzed; overlaps.cols()];
    for (s, partners) in test_partners.iter().enumerate().skip(1) {
        if !test_valid.is_valid(s) {
            continue;
        }
        test[s] = if partners.iter().any(|&t| accepted(t, s)) {
            Outcome::Matched
        } else {
            match partners.as_slice() {
                [] => Outcome::Spurious,
                [t] if truth_partners[*t].len() > 1 => Outcome::Split,
                [_] => Outcome::UnderThreshold,
                _ => Outcome::Fused,
            }
        };
    }

    ObjectOutcomes { truth, test }
}

/// Mask side of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Truth,
    Test,
}

/// Non-fatal condition noticed during a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// One mask has no objects; object statistics degrade to 0 or undefined.
    EmptyObjectSet { slice: Option<usize>, side: Side },
    /// Several test labels qualify for one truth label; counted once as tp.
    MultipleCandidates {
        slice: Option<usize>,
        truth: usize,
        tests: Vec<usize>,
        threshold: f64,
    },
    /// A test label was wanted by two truth labels.
    ContestedMatch {
        slice: Option<usize>,
        test: usize,
        winner: usize,
        loser: usize,
    },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let at = |slice: &Option<usize>| match slice {
            Some(z) => format!("slice {}: ", z),
            None => String::new(),
        };
        match self {
            Anomaly::EmptyObjectSet { slice, side } => {
                write!(f, "{}{:?} mask has no objects", at(slice), side)
            }
            Anomaly::MultipleCandidates {
                slice,
                truth,
                tests,
                threshold,
            } => write!(
                f,
                "{}truth {} has {} test candidates {:?} at IoU>={}",
                at(slice),
                truth,
                tests.len(),
                tests,
                threshold
            ),
            Anomaly::ContestedMatch {
                slice,
                test,
                winner,
                loser,
            } => write!(
                f,
                "{}test {} kept by truth {}, truth {} left unmatched",
                at(slice),
                test,
                winner,
                loser
            ),
        }
    }
}
