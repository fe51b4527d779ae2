//! Optional LLM advisors: research notes on the incumbent and a critique of
//! each step's proposal. Their text is recorded in the step report only and
//! never changes what the loop runs.

use tracing::warn;

use super::llm::TextGenerator;
use crate::types::{ResultRecord, StrategyConfig};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvisorNotes {
    pub research: Option<String>,
    pub critique: Option<String>,
}

pub struct Advisors {
    generator: Box<dyn TextGenerator>,
}

impl Advisors {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn research_prompt(incumbent: Option<&ResultRecord>) -> String {
        match incumbent {
            None => "No results yet. Suggest generic improvements for out-of-distribution \
                     robustness of a logistic regression classifier."
                .to_string(),
            Some(r) => format!(
                "Analyze this run like a research scientist.\n\n\
                 Strategy: {}\n\
                 ID accuracy = {:.4}\n\
                 OOD accuracy = {:.4}\n\
                 Worst group accuracy = {}\n\n\
                 Give short suggestions to reduce the OOD gap and lift the worst group.",
                r.config.summary(),
                r.id.accuracy,
                r.ood.accuracy,
                r.ood
                    .worst_group_accuracy
                    .map(|w| format!("{:.4}", w))
                    .unwrap_or_else(|| "n/a".to_string())
            ),
        }
    }

    pub fn critique_prompt(configs: &[StrategyConfig]) -> String {
        let listing = configs
            .iter()
            .map(|c| format!("- {}", c.summary()))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You are the critic. Evaluate these proposed training strategies:\n\n{}\n\n\
             Provide a short critique and the main risks.",
            listing
        )
    }

    fn ask(&self, what: &str, prompt: &str) -> Option<String> {
        match self.generator.generate(prompt) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(advisor = what, error = %e, "advisor unavailable");
                None
            }
        }
    }

    pub fn advise(&self, incumbent: Option<&ResultRecord>, configs: &[StrategyConfig]) -> AdvisorNotes {
        let research = self.ask("research", &Self::research_prompt(incumbent));
        let critique = if configs.is_empty() {
            None
        } else {
            self.ask("critic", &Self::critique_prompt(configs))
        };
        AdvisorNotes { research, critique }
    }
}
