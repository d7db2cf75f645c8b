// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Truth → test object correspondence.
//!
//! Both routes are deterministic greedy passes in ascending truth order and
//! both produce an injective [`Correspondence`]:
//!
//! - [`match_histogram`] works on an IoU matrix built from label histograms.
//!   Candidates are non-excluded pairs with a positive IoU at or above the
//!   reference threshold. With [`MatchPolicy::LastAboveThreshold`] the last
//!   candidate in ascending test order wins, not the best one.
//! - [`match_greedy_exchange`] works on pixel-set overlaps. Each truth object
//!   takes its maximum-overlap test object; when that object is already held
//!   by another truth object the higher overlap keeps it and the other one is
//!   left unmatched.

use crate::IouMatrix;
use serde::{Deserialize, Serialize};

/// Selection rule among the candidates of one truth label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Last qualifying test label in ascending scan order.
    #[default]
    LastAboveThreshold,
    /// Qualifying test label with the highest IoU, lowest label on ties.
    ArgmaxOverlap,
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchPolicy::LastAboveThreshold => write!(f, "last-above-threshold"),
            MatchPolicy::ArgmaxOverlap => write!(f, "argmax-overlap"),
        }
    }
}

/// Test label assigned to a truth label with its overlap score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Match {
    pub test: usize,
    pub overlap: f64,
}

/// Injective partial map from truth labels to test labels, indexed by truth
/// label. Slot 0 (background) is always empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondence {
    matches: Vec<Option<Match>>,
}

impl Correspondence {
    /// Empty correspondence for truth labels `1..truth_rows`.
    pub fn new(truth_rows: usize) -> Self {
        Correspondence {
            matches: vec![None; truth_rows.max(1)],
        }
    }

    /// Number of truth slots including background.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.len() <= 1
    }

    pub fn get(&self, truth: usize) -> Option<Match> {
        self.matches.get(truth).copied().flatten()
    }

    /// Truth label currently holding `test`.
    pub fn owner_of(&self, test: usize) -> Option<usize> {
        self.matches
            .iter()
            .position(|m| m.is_some_and(|m| m.test == test))
    }

    /// `(truth, match)` for every foreground truth label, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<Match>)> + '_ {
        self.matches.iter().copied().enumerate().skip(1)
    }

    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }

    /// No test label appears under two truth labels.
    pub fn is_injective(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.matches.iter().flatten().all(|m| seen.insert(m.test))
    }

    fn assign(&mut self, truth: usize, test: usize, overlap: f64) {
        self.matches[truth] = Some(Match { test, overlap });
    }

    fn clear(&mut self, truth: usize) {
        self.matches[truth] = None;
    }
}

/// A test label wanted by a truth label but held by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Contest {
    pub test: usize,
    /// Truth label left holding the test label.
    pub winner: usize,
    /// Truth label that did not get it.
    pub loser: usize,
}

/// Matcher output with the evidence behind it.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub correspondence: Correspondence,
    /// Qualifying test labels per truth label, ascending.
    pub candidates: Vec<Vec<usize>>,
    pub contests: Vec<Contest>,
}

impl MatchResult {
    /// Truth labels with more than one qualifying test label.
    pub fn multiplicities(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.len() > 1)
            .map(|(t, c)| (t, c.as_slice()))
    }
}

/// Qualifying test labels of truth label `truth` at `threshold`.
pub fn candidates(iou: &IouMatrix, truth: usize, threshold: f64) -> Vec<usize> {
    iou.overlapping(truth)
        .filter(|&(_, value)| value >= threshold)
        .map(|(s, _)| s)
        .collect()
}

/// Histogram-route matching over an IoU matrix.
///
/// A test label already held by an earlier truth label is skipped and the
/// next qualifying label under the policy is tried; each skip is recorded as
/// a [`Contest`].
#[cfg_attr(feature = "profiling", tracing::instrument(skip(iou)))]
pub fn match_histogram(iou: &IouMatrix, threshold: f64, policy: MatchPolicy) -> MatchResult {
    let mut correspondence = Correspondence::new(iou.rows());
    let mut held_by = vec![None; iou.cols()];
    let mut all_candidates = vec![Vec::new(); iou.rows()];
    let mut contests = Vec::new();

    for t in 1..iou.rows() {
        let found = candidates(iou, t, threshold);

        let mut order = found.clone();
        match policy {
            MatchPolicy::LastAboveThreshold => order.reverse(),
            MatchPolicy::ArgmaxOverlap => {
                order.sort_by(|&a, &b| iou.get(t, b).total_cmp(&iou.get(t, a)).then(a.cmp(&b)))
            }
        }

        for s in order {
            match held_by[s] {
                None => {
                    held_by[s] = Some(t);
                    correspondence.assign(t, s, iou.get(t, s));
                    break;
                }
                Some(winner) => contests.push(Contest {
                    test: s,
                    winner,
                    loser: t,
                }),
            }
        }

        if found.len() > 1 {
            log::debug!(
                "truth {} has {} candidates at threshold {}: {:?}",
                t,
                found.len(),
                threshold,
                found
            );
        }
        all_candidates[t] = found;
    }

    MatchResult {
        correspondence,
        candidates: all_candidates,
        contests,
    }
}

/// Pixel-set route matching with single-level greedy exchange.
#[cfg_attr(feature = "profiling", tracing::instrument(skip(overlaps)))]
pub fn match_greedy_exchange(overlaps: &IouMatrix) -> MatchResult {
    let mut correspondence = Correspondence::new(overlaps.rows());
    let mut all_candidates = vec![Vec::new(); overlaps.rows()];
    let mut contests = Vec::new();

    for t in 1..overlaps.rows() {
        let mut best: Option<(usize, f64)> = None;
        for (s, overlap) in overlaps.overlapping(t) {
            all_candidates[t].push(s);
            if best.is_none_or(|(_, b)| overlap > b) {
                best = Some((s, overlap));
            }
        }
        let Some((s, overlap)) = best else {
            continue;
        };

        match correspondence.owner_of(s) {
            None => correspondence.assign(t, s, overlap),
            Some(holder) => {
                let held = correspondence.get(holder).map_or(0.0, |m| m.overlap);
                if overlap > held {
                    correspondence.clear(holder);
                    correspondence.assign(t, s, overlap);
                    contests.push(Contest {
                        test: s,
                        winner: t,
                        loser: holder,
                    });
                } else {
                    contests.push(Contest {
                        test: s,
                        winner: holder,
                        loser: t,
                    });
                }
            }
        }
    }

    MatchResult {
        correspondence,
        candidates: all_candidates,
        contests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize, cells: &[(usize, usize, f64)]) -> IouMatrix {
        let mut m = IouMatrix::zeros(rows, cols);
        for &(t, s, v) in cells {
            m.set(t, s, v);
        }
        m
    }

    #[test]
    fn test_last_above_threshold_is_not_best() {
        let iou = matrix(2, 4, &[(1, 1, 0.9), (1, 2, 0.4), (1, 3, 0.0)]);
        let result = match_histogram(&iou, 0.0, MatchPolicy::LastAboveThreshold);
        assert_eq!(result.correspondence.get(1).map(|m| m.test), Some(2));
        assert_eq!(result.candidates[1], vec![1, 2]);
    }

    #[test]
    fn test_argmax_policy_picks_best() {
        let iou = matrix(2, 4, &[(1, 1, 0.9), (1, 2, 0.4)]);
        let result = match_histogram(&iou, 0.0, MatchPolicy::ArgmaxOverlap);
        let m = result.correspondence.get(1).unwrap();
        assert_eq!(m.test, 1);
        assert!((m.overlap - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_threshold_filters_candidates() {
        let iou = matrix(2, 3, &[(1, 1, 0.6), (1, 2, 0.3)]);
        let result = match_histogram(&iou, 0.5, MatchPolicy::LastAboveThreshold);
        assert_eq!(result.correspondence.get(1).map(|m| m.test), Some(1));
        assert_eq!(result.candidates[1], vec![1]);
    }

    #[test]
    fn test_excluded_cells_never_match() {
        let mut iou = matrix(3, 3, &[(1, 1, 0.8), (2, 2, 0.8)]);
        iou.exclude_col(2);
        let result = match_histogram(&iou, 0.0, MatchPolicy::LastAboveThreshold);
        assert!(result.correspondence.get(2).is_none());
        assert_eq!(result.correspondence.get(1).map(|m| m.test), Some(1));
    }

    #[test]
    fn test_histogram_route_stays_injective() {
        let iou = matrix(3, 3, &[(1, 2, 0.4), (2, 1, 0.3), (2, 2, 0.4)]);
        let result = match_histogram(&iou, 0.0, MatchPolicy::LastAboveThreshold);
        assert!(result.correspondence.is_injective());
        assert_eq!(result.correspondence.get(1).map(|m| m.test), Some(2));
        assert_eq!(result.correspondence.get(2).map(|m| m.test), Some(1));
        assert_eq!(
            result.contests,
            vec![Contest {
                test: 2,
                winner: 1,
                loser: 2
            }]
        );
    }

    #[test]
    fn test_greedy_exchange_higher_overlap_steals() {
        // truth 1 and truth 2 both prefer test 1; truth 2 overlaps more
        let iou = matrix(3, 3, &[(1, 1, 0.5), (1, 2, 0.2), (2, 1, 0.7)]);
        let result = match_greedy_exchange(&iou);
        assert!(result.correspondence.get(1).is_none());
        assert_eq!(result.correspondence.get(2).map(|m| m.test), Some(1));
        assert_eq!(result.contests[0].loser, 1);
        assert!(result.correspondence.is_injective());
    }

    #[test]
    fn test_greedy_exchange_lower_overlap_loses() {
        let iou = matrix(3, 2, &[(1, 1, 0.8), (2, 1, 0.6)]);
        let result = match_greedy_exchange(&iou);
        assert_eq!(result.correspondence.get(1).map(|m| m.test), Some(1));
        assert!(result.correspondence.get(2).is_none());
        assert_eq!(result.correspondence.owner_of(1), Some(1));
    }

    #[test]
    fn test_greedy_exchange_ties_keep_first() {
        let iou = matrix(2, 3, &[(1, 1, 0.5), (1, 2, 0.5)]);
        let result = match_greedy_exchange(&iou);
        assert_eq!(result.correspondence.get(1).map(|m| m.test), Some(1));
        assert_eq!(result.multiplicities().count(), 1);
    }

    #[test]
    fn test_no_overlap_no_match() {
        let iou = IouMatrix::zeros(3, 3);
        let result = match_greedy_exchange(&iou);
        assert_eq!(result.correspondence.matched_count(), 0);
        let result = match_histogram(&iou, 0.0, MatchPolicy::LastAboveThreshold);
        assert_eq!(result.correspondence.matched_count(), 0);
    }
}
