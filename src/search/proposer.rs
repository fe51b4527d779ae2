//! Strategy proposers: where each step's candidate configs come from.
//!
//! | Proposer             | Source                                      |
//! |----------------------|---------------------------------------------|
//! | [`HeuristicProposer`] | fixed perturbations of the incumbent        |
//! | [`LlmProposer`]       | text generator + strategy prompt + parser   |
//!
//! The heuristic never fails and doubles as the fallback when the LLM
//! proposer reports `ProposerParse` or `ProposerUnavailable`.

use tracing::debug;

use super::llm::TextGenerator;
use super::parse::parse_strategies;
use super::prompt::StrategyPrompt;
use crate::error::Result;
use crate::types::{ResultRecord, StrategyConfig};

/// What a proposer sees at the start of a step.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    pub step: usize,
    pub max_steps: usize,
    pub incumbent: Option<&'a ResultRecord>,
    /// Records produced in this session, in run order
    pub history: &'a [ResultRecord],
    /// Every persisted record known at session start plus this session's
    pub known: &'a [ResultRecord],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proposal {
    pub configs: Vec<StrategyConfig>,
    pub rationale: Option<String>,
}

pub trait Proposer {
    fn name(&self) -> &str;

    fn propose(&mut self, ctx: &ProposalContext<'_>) -> Result<Proposal>;
}

// =============================================================================
// Heuristic
// =============================================================================

pub const BASELINE_NAME: &str = "baseline";

/// Perturbs the incumbent: C halved/doubled on even steps, a smaller
/// group-weighted sample on odd steps.
#[derive(Debug, Clone)]
pub struct HeuristicProposer {
    /// Multiplier applied to `sample_frac` on odd steps
    pub frac_shrink: f64,
    pub min_sample_frac: f64,
}

impl Default for HeuristicProposer {
    fn default() -> Self {
        Self {
            frac_shrink: 0.85,
            min_sample_frac: 0.5,
        }
    }
}

impl HeuristicProposer {
    pub fn proposal_for(&self, ctx: &ProposalContext<'_>) -> Proposal {
        let Some(inc) = ctx.incumbent else {
            return Proposal {
                configs: vec![StrategyConfig::new(unused_name(BASELINE_NAME, ctx.known))],
                rationale: Some("no incumbent yet: establish the baseline".to_string()),
            };
        };
        let base = &inc.config;
        let step = ctx.step;

        if step % 2 == 0 {
            let half = StrategyConfig {
                name: unused_name(&format!("heuristic_s{}_c_half", step), ctx.known),
                ..base.clone()
            }
            .with_l2_c(base.l2_c / 2.0);
            let double = StrategyConfig {
                name: unused_name(&format!("heuristic_s{}_c_double", step), ctx.known),
                ..base.clone()
            }
            .with_l2_c(base.l2_c * 2.0);
            Proposal {
                configs: vec![half, double],
                rationale: Some(format!("bracket regularization around C={:.4}", base.l2_c)),
            }
        } else {
            let frac = (base.sample_frac * self.frac_shrink).max(self.min_sample_frac);
            let dro = StrategyConfig {
                name: unused_name(&format!("heuristic_s{}_dro_frac", step), ctx.known),
                ..base.clone()
            }
            .with_sample_frac(frac)
            .with_group_dro(true);
            Proposal {
                configs: vec![dro],
                rationale: Some(format!(
                    "group-weighted training on a {:.0}% sample",
                    frac * 100.0
                )),
            }
        }
    }
}

/// `base`, or `base_2`, `base_3`, ... if a known record already holds the name.
///
/// Step numbers restart every session, so without this a later session would
/// overwrite an earlier session's file under the same name.
fn unused_name(base: &str, known: &[ResultRecord]) -> String {
    let taken = |name: &str| known.iter().any(|r| r.name() == name);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|name| !taken(name.as_str()))
        .unwrap_or_else(|| base.to_string())
}

impl Proposer for HeuristicProposer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn propose(&mut self, ctx: &ProposalContext<'_>) -> Result<Proposal> {
        Ok(self.proposal_for(ctx))
    }
}

// =============================================================================
// LLM
// =============================================================================

/// Delegates proposal generation to a text generator.
pub struct LlmProposer {
    generator: Box<dyn TextGenerator>,
    prompt: StrategyPrompt,
    label: String,
}

impl LlmProposer {
    pub fn new(generator: Box<dyn TextGenerator>, prompt: StrategyPrompt) -> Self {
        let label = format!("llm:{}", generator.name());
        Self {
            generator,
            prompt,
            label,
        }
    }
}

impl Proposer for LlmProposer {
    fn name(&self) -> &str {
        &self.label
    }

    fn propose(&mut self, ctx: &ProposalContext<'_>) -> Result<Proposal> {
        let prompt = self.prompt.render(ctx.known);
        debug!(step = ctx.step, chars = prompt.len(), "sending strategy prompt");

        let raw = self.generator.generate(&prompt)?;
        debug!(step = ctx.step, raw = %raw.chars().take(600).collect::<String>(), "raw proposer output");

        let parsed = parse_strategies(&raw)?;
        Ok(Proposal {
            configs: parsed.configs,
            rationale: parsed.rationale,
        })
    }
}
