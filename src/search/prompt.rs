//! Strategy prompt: a sectioned template rendered with the current results.
//!
//! A prompt is a set of named sections rendered in canonical order under
//! `## ` headers. Templates can be loaded from markdown using the same
//! header convention; the `{{EXPERIMENT_RESULTS}}` placeholder is replaced
//! with a table of known records at render time.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::types::ResultRecord;

pub const RESULTS_PLACEHOLDER: &str = "{{EXPERIMENT_RESULTS}}";

/// Standard section names.
pub mod sections {
    pub const ROLE: &str = "Role";
    pub const TASK: &str = "Task";
    pub const RESULTS: &str = "Results";
    pub const SEARCH_SPACE: &str = "Search_space";
    pub const OUTPUT_SCHEMA: &str = "Output_schema";
    pub const STYLE: &str = "Style";

    pub const ORDER: &[&str] = &[ROLE, TASK, RESULTS, SEARCH_SPACE, OUTPUT_SCHEMA, STYLE];
}

const DEFAULT_ROLE: &str = "You are an ML researcher improving out-of-distribution robustness \
of a logistic regression classifier under domain shift.";

const DEFAULT_TASK: &str = "Propose 2-4 new training strategies that are likely to raise \
worst-group accuracy on the OOD partition without collapsing OOD accuracy. Avoid repeating \
configurations that are already in the results table.";

const DEFAULT_SEARCH_SPACE: &str = "- class_weight: null or \"balanced\"
- l2_C: positive float (inverse regularization strength)
- sample_frac: float in (0, 1]
- undersample_majority: true/false
- reg_strength: \"normal\" or \"strong\" (strong divides C by 10)
- use_group_dro: true/false (weight rows by inverse group frequency)";

const DEFAULT_OUTPUT_SCHEMA: &str = r#"Return one JSON object:
{
  "rationale": "why these strategies",
  "strategies": [
    {"name": "unique_name", "class_weight": null, "l2_C": 1.0, "sample_frac": 1.0,
     "undersample_majority": false, "reg_strength": "normal", "use_group_dro": false}
  ]
}"#;

const DEFAULT_STYLE: &str = "JSON only. Names must be unique, lowercase, and use underscores.";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrategyPrompt {
    sections: BTreeMap<String, String>,
}

impl StrategyPrompt {
    /// Built-in template.
    pub fn builtin() -> Self {
        Self::default()
            .with_section(sections::ROLE, DEFAULT_ROLE)
            .with_section(sections::TASK, DEFAULT_TASK)
            .with_section(sections::RESULTS, RESULTS_PLACEHOLDER)
            .with_section(sections::SEARCH_SPACE, DEFAULT_SEARCH_SPACE)
            .with_section(sections::OUTPUT_SCHEMA, DEFAULT_OUTPUT_SCHEMA)
            .with_section(sections::STYLE, DEFAULT_STYLE)
    }

    pub fn with_section(mut self, name: &str, content: &str) -> Self {
        self.sections.insert(name.to_string(), content.trim().to_string());
        self
    }

    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections.get(name).map(String::as_str)
    }

    /// Parse `## Name` sections. Text before the first header is ignored.
    pub fn from_markdown(content: &str) -> Self {
        let mut prompt = Self::default();
        let mut current: Option<String> = None;
        let mut body = String::new();

        for line in content.lines() {
            if let Some(name) = line.strip_prefix("## ") {
                if let Some(prev) = current.take() {
                    prompt = prompt.with_section(&prev, &body);
                    body.clear();
                }
                current = Some(name.trim().to_string());
            } else if current.is_some() {
                body.push_str(line);
                body.push('\n');
            }
        }
        if let Some(prev) = current {
            prompt = prompt.with_section(&prev, &body);
        }
        prompt
    }

    /// Load a markdown template; a file without any `## ` section is used whole.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let prompt = Self::from_markdown(&content);
        if prompt.sections.is_empty() {
            return Ok(Self::default().with_section(sections::TASK, &content));
        }
        Ok(prompt)
    }

    /// Render sections in canonical order, then any extras alphabetically.
    pub fn render_template(&self) -> String {
        let mut out = String::new();
        let extras = self
            .sections
            .keys()
            .map(String::as_str)
            .filter(|name| !sections::ORDER.contains(name));

        for name in sections::ORDER.iter().copied().chain(extras) {
            if let Some(content) = self.sections.get(name) {
                out.push_str(&format!("## {}\n\n{}\n\n", name, content));
            }
        }
        out.trim().to_string()
    }

    /// Render with the results table substituted.
    ///
    /// Templates that never mention the placeholder get a results section appended.
    pub fn render(&self, records: &[ResultRecord]) -> String {
        let table = results_table(records);
        let template = self.render_template();
        if template.contains(RESULTS_PLACEHOLDER) {
            template.replace(RESULTS_PLACEHOLDER, &table)
        } else {
            format!("{}\n\n## {}\n\n{}", template, sections::RESULTS, table)
        }
    }
}

/// Markdown table of known records.
pub fn results_table(records: &[ResultRecord]) -> String {
    if records.is_empty() {
        return "No experiment results available yet.".to_string();
    }

    let mut lines = vec![
        "| Experiment | ID Acc | OOD Acc | Worst-Group Acc | Gap |".to_string(),
        "|------------|--------|---------|-----------------|-----|".to_string(),
    ];
    for r in records {
        let wga = r
            .ood
            .worst_group_accuracy
            .map(|w| format!("{:.1}%", w * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        lines.push(format!(
            "| {} | {:.1}% | {:.1}% | {} | {:.1}% |",
            r.config.summary(),
            r.id.accuracy * 100.0,
            r.ood.accuracy * 100.0,
            wga,
            r.gap() * 100.0
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IdMetrics, OodMetrics, StrategyConfig};

    fn rec(name: &str) -> ResultRecord {
        ResultRecord {
            config: StrategyConfig::new(name),
            id: IdMetrics { accuracy: 0.65, auc: 0.7 },
            ood: OodMetrics {
                accuracy: 0.6,
                auc: 0.6,
                group_accuracy: Default::default(),
                worst_group_accuracy: Some(0.55),
            },
            meta_id: None,
            meta_ood: None,
        }
    }

    #[test]
    fn test_builtin_renders_results() {
        let text = StrategyPrompt::builtin().render(&[rec("baseline")]);
        assert!(text.starts_with("## Role"));
        assert!(!text.contains(RESULTS_PLACEHOLDER));
        assert!(text.contains("| baseline [C=1.0000] | 65.0% | 60.0% | 55.0% | 5.0% |"));
        let role = text.find("## Role").unwrap();
        let schema = text.find("## Output_schema").unwrap();
        assert!(role < schema);
    }

    #[test]
    fn test_empty_results() {
        let text = StrategyPrompt::builtin().render(&[]);
        assert!(text.contains("No experiment results available yet."));
    }

    #[test]
    fn test_from_markdown() {
        let md = "preamble\n## Role\nYou are a tester.\n\n## Notes\nextra\n## Results\n{{EXPERIMENT_RESULTS}}\n";
        let prompt = StrategyPrompt::from_markdown(md);
        assert_eq!(prompt.section("Role"), Some("You are a tester."));
        assert_eq!(prompt.section("Notes"), Some("extra"));

        let text = prompt.render(&[rec("x")]);
        // canonical sections first, extras after
        assert!(text.find("## Results").unwrap() < text.find("## Notes").unwrap());
        assert!(text.contains("| x [C=1.0000]"));
    }

    #[test]
    fn test_template_without_placeholder_gets_results_appended() {
        let prompt = StrategyPrompt::default().with_section("Task", "Do it.");
        let text = prompt.render(&[rec("y")]);
        assert!(text.ends_with("| y [C=1.0000] | 65.0% | 60.0% | 55.0% | 5.0% |"));
    }

    #[test]
    fn test_load_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "Just propose things.\n{{EXPERIMENT_RESULTS}}").unwrap();
        let prompt = StrategyPrompt::load(&path).unwrap();
        assert!(prompt.render(&[]).contains("No experiment results available yet."));
    }
}
