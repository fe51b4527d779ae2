//! Acceptance score: a 0-1 rating of the incumbent that drives early stopping.
//!
//! [`RubricJudge`] computes it deterministically from the incumbent's metrics.
//! [`LlmJudge`] asks a text generator for a single number using the same
//! rubric in prose; any failure scores 0.0, so a broken judge never stops the
//! search early.

use tracing::{debug, warn};

use super::llm::TextGenerator;
use crate::types::ResultRecord;

/// Score at or above which the search stops.
pub const DEFAULT_SUCCESS_THRESHOLD: f64 = 0.8;

pub trait Judge {
    fn name(&self) -> &str;

    /// Rate the incumbent in `[0, 1]`; no incumbent rates 0.
    fn score(&mut self, incumbent: Option<&ResultRecord>) -> f64;
}

/// Worst-group accuracy, falling back to OOD accuracy when the record has none.
fn wga_or_ood(record: &ResultRecord) -> f64 {
    record
        .ood
        .worst_group_accuracy
        .unwrap_or(record.ood.accuracy)
}

/// `w_wga·WGA + w_ood·OOD + w_gap·(1 − min(1, gap / gap_scale))`
#[derive(Debug, Clone)]
pub struct RubricJudge {
    pub wga_weight: f64,
    pub ood_weight: f64,
    pub gap_weight: f64,
    /// Gap at which the gap term reaches zero
    pub gap_scale: f64,
}

impl Default for RubricJudge {
    fn default() -> Self {
        Self {
            wga_weight: 0.5,
            ood_weight: 0.4,
            gap_weight: 0.1,
            gap_scale: 0.1,
        }
    }
}

impl RubricJudge {
    pub fn rate(&self, record: &ResultRecord) -> f64 {
        let gap_term = 1.0 - (record.gap() / self.gap_scale).min(1.0);
        let s = self.wga_weight * wga_or_ood(record)
            + self.ood_weight * record.ood.accuracy
            + self.gap_weight * gap_term;
        if s.is_nan() { 0.0 } else { s.clamp(0.0, 1.0) }
    }
}

impl Judge for RubricJudge {
    fn name(&self) -> &str {
        "rubric"
    }

    fn score(&mut self, incumbent: Option<&ResultRecord>) -> f64 {
        incumbent.map(|r| self.rate(r)).unwrap_or(0.0)
    }
}

/// Judge backed by a text generator.
pub struct LlmJudge {
    generator: Box<dyn TextGenerator>,
}

impl LlmJudge {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn prompt_for(record: &ResultRecord) -> String {
        format!(
            "You are the judge agent. Your job is to score the run from 0 to 1.

Metrics:
- ID accuracy = {:.4}
- OOD accuracy = {:.4}
- Worst group accuracy = {:.4}
- Gap (|OOD - ID|) = {:.4}

Scoring rubric:
- High score (~0.8-1.0): strong OOD, strong worst-group accuracy, and low gap.
- Medium score (~0.4-0.7): decent OOD but fairness or gap issues.
- Low score (0-0.3): poor OOD or bad worst-group accuracy.

IMPORTANT:
Return ONLY a single float between 0 and 1.
No explanation, no text, no words. ONLY the number.

Output format example:
0.72",
            record.id.accuracy,
            record.ood.accuracy,
            wga_or_ood(record),
            record.gap()
        )
    }
}

/// The whole trimmed reply as a number, clamped to `[0, 1]`.
///
/// Anything else (prose, fractions like `8/10`, non-finite values) is `None`.
pub fn parse_score(text: &str) -> Option<f64> {
    let x = text.trim().parse::<f64>().ok()?;
    x.is_finite().then(|| x.clamp(0.0, 1.0))
}

impl Judge for LlmJudge {
    fn name(&self) -> &str {
        "llm"
    }

    fn score(&mut self, incumbent: Option<&ResultRecord>) -> f64 {
        let Some(record) = incumbent else {
            return 0.0;
        };
        match self.generator.generate(&Self::prompt_for(record)) {
            Ok(raw) => match parse_score(&raw) {
                Some(score) => {
                    debug!(score, "judge score");
                    score
                }
                None => {
                    warn!(raw = %raw.chars().take(120).collect::<String>(), "judge reply is not a bare number, scoring 0.0");
                    0.0
                }
            },
            Err(e) => {
                warn!(error = %e, "judge unavailable, scoring 0.0");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SearchError};
    use crate::types::{IdMetrics, OodMetrics, StrategyConfig};

    fn rec(id: f64, ood: f64, wga: Option<f64>) -> ResultRecord {
        ResultRecord {
            config: StrategyConfig::new("r"),
            id: IdMetrics { accuracy: id, auc: 0.7 },
            ood: OodMetrics {
                accuracy: ood,
                auc: 0.7,
                group_accuracy: Default::default(),
                worst_group_accuracy: wga,
            },
            meta_id: None,
            meta_ood: None,
        }
    }

    #[test]
    fn test_rubric() {
        let mut judge = RubricJudge::default();
        assert_eq!(judge.score(None), 0.0);

        // No gap: 0.5*0.9 + 0.4*0.9 + 0.1
        let s = judge.score(Some(&rec(0.9, 0.9, Some(0.9))));
        assert!((s - 0.91).abs() < 1e-12);

        // Gap beyond scale drops the gap term
        let s = judge.score(Some(&rec(0.9, 0.6, Some(0.5))));
        assert!((s - (0.25 + 0.24)).abs() < 1e-12);

        // Missing WGA falls back to OOD
        let s = judge.score(Some(&rec(0.6, 0.6, None)));
        assert!((s - (0.3 + 0.24 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.72"), Some(0.72));
        assert_eq!(parse_score("  1.5 "), Some(1.0));
        assert_eq!(parse_score("\n0.4\n"), Some(0.4));
        assert_eq!(parse_score("-0.5"), Some(0.0));
        assert_eq!(parse_score("Score: 0.4."), None);
        assert_eq!(parse_score("8/10"), None);
        assert_eq!(parse_score("0.9 because WGA improved"), None);
        assert_eq!(parse_score("inf"), None);
        assert_eq!(parse_score("none"), None);
        assert_eq!(parse_score("NaN"), None);
    }

    struct Reply(Result<String>);

    impl TextGenerator for Reply {
        fn name(&self) -> String {
            "reply".into()
        }

        fn generate(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(SearchError::ProposerUnavailable(e.to_string())),
            }
        }
    }

    #[test]
    fn test_llm_judge_failures_score_zero() {
        let r = rec(0.7, 0.65, Some(0.6));
        let mut ok = LlmJudge::new(Box::new(Reply(Ok("0.85".into()))));
        assert_eq!(ok.score(Some(&r)), 0.85);

        let mut words = LlmJudge::new(Box::new(Reply(Ok("great run".into()))));
        assert_eq!(words.score(Some(&r)), 0.0);

        let mut fraction = LlmJudge::new(Box::new(Reply(Ok("8/10".into()))));
        assert_eq!(fraction.score(Some(&r)), 0.0);

        let mut down = LlmJudge::new(Box::new(Reply(Err(SearchError::ProposerUnavailable(
            "x".into(),
        )))));
        assert_eq!(down.score(Some(&r)), 0.0);
        assert_eq!(down.score(None), 0.0);
    }

    #[test]
    fn test_prompt_contains_metrics() {
        let text = LlmJudge::prompt_for(&rec(0.7, 0.65, Some(0.6)));
        assert!(text.contains("OOD accuracy = 0.6500"));
        assert!(text.contains("Worst group accuracy = 0.6000"));
    }
}
