//! Selection policy: robustness-aware score and the acceptance rule.
//!
//! The default rule scores a record as
//!
//! ```text
//! score = 0.8·WGA² + 0.18·OOD − 0.02·|ID − OOD|
//! ```
//!
//! unless it falls below the baseline floors (minus tolerance), in which case
//! the score is −1. Squaring WGA rewards worst-group gains more than average
//! accuracy. A candidate replaces the incumbent only when it clears the
//! incumbent's score by a fixed margin.
//!
//! `SelectionRule::GapReduction` keeps the older rule: ID may drop a little,
//! OOD must rise by a minimum step, and the ID/OOD gap must shrink.

use tracing::warn;

use crate::error::{Result, SearchError};
use crate::types::ResultRecord;

// ============================================================================
// Constants
// ============================================================================

/// Worst-group accuracy of the reference baseline run.
pub const BASELINE_WGA: f64 = 0.526;

/// OOD accuracy of the reference baseline run.
pub const BASELINE_OOD: f64 = 0.586;

/// Slack below the floors before a record is rejected outright.
pub const FLOOR_TOLERANCE: f64 = 0.005;

/// Score assigned to records below a floor.
pub const REJECTED_SCORE: f64 = -1.0;

/// Minimum score gain over the incumbent.
pub const IMPROVEMENT_MARGIN: f64 = 0.001;

/// Gap-reduction rule: allowed ID accuracy drop.
pub const GAP_ID_TOLERANCE: f64 = 0.01;

/// Gap-reduction rule: required OOD accuracy gain.
pub const GAP_MIN_OOD_GAIN: f64 = 0.02;

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineFloors {
    pub wga: f64,
    pub ood: f64,
    pub tolerance: f64,
}

impl Default for BaselineFloors {
    fn default() -> Self {
        Self {
            wga: BASELINE_WGA,
            ood: BASELINE_OOD,
            tolerance: FLOOR_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Weight on WGA²
    pub alpha: f64,
    /// Weight on OOD accuracy
    pub beta: f64,
    /// Penalty on the absolute ID/OOD gap
    pub gamma: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            beta: 0.18,
            gamma: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionRule {
    /// Floors plus weighted score
    #[default]
    BaselineFloor,
    /// ID tolerance, OOD gain, shrinking gap
    GapReduction,
}

impl std::str::FromStr for SelectionRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "baseline-floor" | "score" => Ok(SelectionRule::BaselineFloor),
            "gap-reduction" | "gap" => Ok(SelectionRule::GapReduction),
            _ => Err(format!(
                "Unknown selection rule: {}. Use baseline-floor or gap-reduction",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionPolicy {
    pub floors: BaselineFloors,
    pub weights: ScoreWeights,
    pub margin: Option<f64>,
    pub rule: SelectionRule,
}

impl SelectionPolicy {
    pub fn margin(&self) -> f64 {
        self.margin.unwrap_or(IMPROVEMENT_MARGIN)
    }

    /// Robustness score of a record.
    pub fn score(&self, result: &ResultRecord) -> Result<f64> {
        let unavailable = |reason: &str| SearchError::ScoringUnavailable {
            name: result.name().to_string(),
            reason: reason.to_string(),
        };

        let wga = result
            .ood
            .worst_group_accuracy
            .ok_or_else(|| unavailable("worst_group_accuracy is null"))?;
        let id = result.id.accuracy;
        let ood = result.ood.accuracy;
        if wga.is_nan() || id.is_nan() || ood.is_nan() {
            return Err(unavailable("accuracy is NaN"));
        }

        let f = &self.floors;
        if wga < f.wga - f.tolerance || ood < f.ood - f.tolerance {
            return Ok(REJECTED_SCORE);
        }

        let w = &self.weights;
        Ok(w.alpha * wga * wga + w.beta * ood - w.gamma * (id - ood).abs())
    }

    /// Whether `candidate` should replace `incumbent`.
    ///
    /// Unscorable candidates are never better; an unscorable incumbent counts
    /// as no incumbent.
    pub fn is_better(&self, candidate: &ResultRecord, incumbent: Option<&ResultRecord>) -> bool {
        match self.rule {
            SelectionRule::BaselineFloor => self.is_better_by_score(candidate, incumbent),
            SelectionRule::GapReduction => is_better_by_gap(candidate, incumbent),
        }
    }

    fn is_better_by_score(&self, candidate: &ResultRecord, incumbent: Option<&ResultRecord>) -> bool {
        let cand = match self.score(candidate) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "candidate not scorable");
                return false;
            }
        };

        let inc = incumbent.and_then(|i| match self.score(i) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "incumbent not scorable, treating as absent");
                None
            }
        });

        match inc {
            None => cand > 0.0,
            Some(inc) => cand > inc + self.margin(),
        }
    }
}

fn is_better_by_gap(candidate: &ResultRecord, incumbent: Option<&ResultRecord>) -> bool {
    let Some(best) = incumbent else {
        return !candidate.ood.accuracy.is_nan();
    };
    let (id_new, ood_new) = (candidate.id.accuracy, candidate.ood.accuracy);
    let (id_best, ood_best) = (best.id.accuracy, best.ood.accuracy);

    if id_new < id_best - GAP_ID_TOLERANCE {
        return false;
    }
    if ood_new <= ood_best + GAP_MIN_OOD_GAIN {
        return false;
    }
    candidate.gap() < best.gap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::types::{IdMetrics, OodMetrics, StrategyConfig};
    use std::collections::BTreeMap;

    fn rec(name: &str, id: f64, ood: f64, wga: Option<f64>) -> ResultRecord {
        ResultRecord {
            config: StrategyConfig::new(name),
            id: IdMetrics { accuracy: id, auc: 0.7 },
            ood: OodMetrics {
                accuracy: ood,
                auc: 0.65,
                group_accuracy: BTreeMap::new(),
                worst_group_accuracy: wga,
            },
            meta_id: None,
            meta_ood: None,
        }
    }

    #[test]
    fn test_score_formula() {
        let policy = SelectionPolicy::default();
        let s = policy.score(&rec("a", 0.62, 0.60, Some(0.55))).unwrap();
        let expected = 0.8 * 0.55 * 0.55 + 0.18 * 0.60 - 0.02 * 0.02;
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn test_score_increases_with_wga() {
        let policy = SelectionPolicy::default();
        let mut last = f64::NEG_INFINITY;
        for wga in [0.53, 0.56, 0.6, 0.7, 0.9] {
            let s = policy.score(&rec("a", 0.62, 0.60, Some(wga))).unwrap();
            assert!(s > last);
            last = s;
        }
    }

    #[test]
    fn test_floor_at_exact_tolerance() {
        let policy = SelectionPolicy::default();
        let at_floor = BASELINE_WGA - FLOOR_TOLERANCE;
        assert!(policy.score(&rec("a", 0.6, 0.6, Some(at_floor))).unwrap() > 0.0);

        let below = at_floor - 1e-6;
        assert_eq!(
            policy.score(&rec("a", 0.6, 0.6, Some(below))).unwrap(),
            REJECTED_SCORE
        );
        let ood_below = BASELINE_OOD - FLOOR_TOLERANCE - 1e-6;
        assert_eq!(
            policy.score(&rec("a", 0.6, ood_below, Some(0.6))).unwrap(),
            REJECTED_SCORE
        );
    }

    #[test]
    fn test_unscorable_records() {
        let policy = SelectionPolicy::default();
        let err = policy.score(&rec("nowga", 0.6, 0.6, None)).unwrap_err();
        assert!(matches!(err, SearchError::ScoringUnavailable { .. }));
        assert!(policy.score(&rec("nan", f64::NAN, 0.6, Some(0.6))).is_err());

        // Candidate not scorable -> not better
        assert!(!policy.is_better(&rec("nowga", 0.6, 0.6, None), None));
        // Incumbent not scorable -> compared as if absent
        let good = rec("good", 0.62, 0.60, Some(0.55));
        assert!(policy.is_better(&good, Some(&rec("nowga", 0.6, 0.6, None))));
    }

    #[test]
    fn test_is_better_without_incumbent() {
        let policy = SelectionPolicy::default();
        assert!(policy.is_better(&rec("ok", 0.62, 0.60, Some(0.55)), None));
        assert!(!policy.is_better(&rec("low", 0.62, 0.60, Some(0.40)), None));
    }

    #[test]
    fn test_is_better_margin() {
        let policy = SelectionPolicy::default();
        let inc = rec("inc", 0.62, 0.60, Some(0.55));
        let tiny = rec("tiny", 0.62, 0.60, Some(0.5505));
        let clear = rec("clear", 0.62, 0.60, Some(0.58));
        assert!(!policy.is_better(&tiny, Some(&inc)));
        assert!(policy.is_better(&clear, Some(&inc)));
        assert!(!policy.is_better(&inc, Some(&inc)));
    }

    #[test]
    fn test_floor_rejection_scenario() {
        // Incumbent at WGA 0.55 / OOD 0.60; candidate with WGA 0.50 is rejected
        let policy = SelectionPolicy::default();
        let inc = rec("inc", 0.65, 0.60, Some(0.55));
        let cand = rec("cand", 0.70, 0.66, Some(0.50));
        assert_eq!(policy.score(&cand).unwrap(), REJECTED_SCORE);
        assert!(!policy.is_better(&cand, Some(&inc)));
    }

    #[test]
    fn test_gap_reduction_rule() {
        let policy = SelectionPolicy {
            rule: SelectionRule::GapReduction,
            ..SelectionPolicy::default()
        };
        let best = rec("best", 0.70, 0.55, None);
        assert!(policy.is_better(&rec("c", 0.695, 0.60, None), Some(&best)));
        // OOD gain too small
        assert!(!policy.is_better(&rec("c", 0.70, 0.565, None), Some(&best)));
        // ID dropped too far
        assert!(!policy.is_better(&rec("c", 0.68, 0.60, None), Some(&best)));
        assert!(policy.is_better(&best, None));
    }

    #[test]
    fn test_rule_from_str() {
        assert_eq!("gap".parse::<SelectionRule>().unwrap(), SelectionRule::GapReduction);
        assert_eq!(
            "baseline_floor".parse::<SelectionRule>().unwrap(),
            SelectionRule::BaselineFloor
        );
        assert!("nope".parse::<SelectionRule>().is_err());
    }

    /// WGA or OOD values that clear the default floors.
    fn above_floor() -> impl Strategy<Value = f64> {
        (BASELINE_OOD - FLOOR_TOLERANCE)..=1.0
    }

    proptest! {
        #[test]
        fn prop_score_strictly_increases_with_wga(
            id in 0.0f64..=1.0,
            ood in above_floor(),
            wga in (BASELINE_WGA - FLOOR_TOLERANCE)..0.7,
            lift in 1e-6f64..0.3,
        ) {
            let policy = SelectionPolicy::default();
            let low = policy.score(&rec("low", id, ood, Some(wga))).unwrap();
            let high = policy.score(&rec("high", id, ood, Some(wga + lift))).unwrap();
            prop_assert!(low > 0.0);
            prop_assert!(high > low, "score({}) = {} vs score({}) = {}", wga, low, wga + lift, high);
        }

        #[test]
        fn prop_is_better_matches_score_and_margin(
            cand in (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0),
            inc in (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0),
        ) {
            let policy = SelectionPolicy::default();
            let c = rec("cand", cand.0, cand.1, Some(cand.2));
            let i = rec("inc", inc.0, inc.1, Some(inc.2));
            let (sc, si) = (policy.score(&c).unwrap(), policy.score(&i).unwrap());

            prop_assert_eq!(policy.is_better(&c, Some(&i)), sc > si + IMPROVEMENT_MARGIN);
            prop_assert_eq!(policy.is_better(&c, None), sc > 0.0);
            prop_assert!(!policy.is_better(&i, Some(&i)));
        }
    }
}
