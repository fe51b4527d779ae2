//! Configuration loading from oodsearch.toml.
//!
//! A missing file means defaults; a file that exists but fails to parse is an
//! error. Command-line flags override file values. API keys never live here:
//! they come from the environment (with `.env` loaded at startup).
//!
//! ## Example
//!
//! ```toml
//! [search]
//! max-steps = 5
//! use-llm = true
//! threshold = 0.8
//! seed = 42
//!
//! [selection]
//! rule = "baseline-floor"
//! baseline-wga = 0.526
//! baseline-ood = 0.586
//!
//! [data]
//! dataset = "diabetes"
//! path = "data"
//!
//! [store]
//! dir = "experiments"
//!
//! [proposer]
//! backend = "chat"
//! model = "llama-3.3-70b-versatile"
//! timeout-secs = 60
//!
//! [judge]
//! kind = "rubric"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::data::Dataset;
use crate::search::judge::DEFAULT_SUCCESS_THRESHOLD;
use crate::search::llm::{Backend, DEFAULT_API_KEY_ENV, GeneratorSettings};
use crate::search::selection::{BaselineFloors, ScoreWeights, SelectionPolicy, SelectionRule};

pub const CONFIG_FILE: &str = "oodsearch.toml";
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_STEPS: usize = 3;

/// Which judge produces the acceptance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JudgeKind {
    #[default]
    Rubric,
    Llm,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,
    pub max_steps: usize,
    pub use_llm: bool,
    pub success_threshold: f64,
    pub seed: u64,
    pub advisors: bool,
    pub selection: SelectionPolicy,
    pub dataset: Dataset,
    /// CSV file or directory holding the default file name
    pub data_path: PathBuf,
    pub store_dir: PathBuf,
    pub generator: GeneratorSettings,
    /// Markdown strategy prompt; built-in template when unset
    pub prompt_path: Option<PathBuf>,
    pub judge: JudgeKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            max_steps: DEFAULT_MAX_STEPS,
            use_llm: false,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            seed: DEFAULT_SEED,
            advisors: false,
            selection: SelectionPolicy::default(),
            dataset: Dataset::Diabetes,
            data_path: PathBuf::from("data"),
            store_dir: PathBuf::from("experiments"),
            generator: GeneratorSettings::default(),
            prompt_path: None,
            judge: JudgeKind::Rubric,
        }
    }
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    search: Option<RawSearch>,
    selection: Option<RawSelection>,
    data: Option<RawData>,
    store: Option<RawStore>,
    proposer: Option<RawProposer>,
    judge: Option<RawJudge>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawSearch {
    max_steps: Option<usize>,
    use_llm: Option<bool>,
    threshold: Option<f64>,
    seed: Option<u64>,
    advisors: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawSelection {
    rule: Option<String>,
    baseline_wga: Option<f64>,
    baseline_ood: Option<f64>,
    tolerance: Option<f64>,
    alpha: Option<f64>,
    beta: Option<f64>,
    gamma: Option<f64>,
    margin: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawData {
    dataset: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawStore {
    dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawProposer {
    backend: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    api_key_env: Option<String>,
    timeout_secs: Option<u64>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawJudge {
    kind: Option<String>,
}

impl std::str::FromStr for JudgeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rubric" => Ok(JudgeKind::Rubric),
            "llm" => Ok(JudgeKind::Llm),
            _ => Err(format!("Unknown judge kind: {}. Use rubric or llm", s)),
        }
    }
}

impl Config {
    /// Load `oodsearch.toml` from `directory`, or defaults if there is none.
    pub fn load(directory: &Path) -> Result<Self> {
        let path = directory.join(CONFIG_FILE);
        if path.exists() {
            Self::load_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content, Some(path.to_path_buf()))
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str, source: Option<PathBuf>) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        Self::from_raw(raw, source)
    }

    fn from_raw(raw: RawConfig, source: Option<PathBuf>) -> Result<Self> {
        let defaults = Self::default();
        let search = raw.search.unwrap_or_default();
        let sel = raw.selection.unwrap_or_default();
        let data = raw.data.unwrap_or_default();
        let store = raw.store.unwrap_or_default();
        let prop = raw.proposer.unwrap_or_default();
        let judge = raw.judge.unwrap_or_default();

        let floor_defaults = BaselineFloors::default();
        let weight_defaults = ScoreWeights::default();
        let selection = SelectionPolicy {
            floors: BaselineFloors {
                wga: sel.baseline_wga.unwrap_or(floor_defaults.wga),
                ood: sel.baseline_ood.unwrap_or(floor_defaults.ood),
                tolerance: sel.tolerance.unwrap_or(floor_defaults.tolerance),
            },
            weights: ScoreWeights {
                alpha: sel.alpha.unwrap_or(weight_defaults.alpha),
                beta: sel.beta.unwrap_or(weight_defaults.beta),
                gamma: sel.gamma.unwrap_or(weight_defaults.gamma),
            },
            margin: sel.margin,
            rule: match sel.rule {
                Some(r) => r.parse::<SelectionRule>().map_err(|e| anyhow!(e))?,
                None => SelectionRule::default(),
            },
        };

        let generator = GeneratorSettings {
            backend: match prop.backend {
                Some(b) => b.parse::<Backend>().map_err(|e| anyhow!(e))?,
                None => Backend::default(),
            },
            model: prop.model,
            endpoint: prop.endpoint,
            api_key_env: prop
                .api_key_env
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            timeout: prop
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.generator.timeout),
        };

        Ok(Self {
            source,
            max_steps: search.max_steps.unwrap_or(defaults.max_steps),
            use_llm: search.use_llm.unwrap_or(defaults.use_llm),
            success_threshold: search.threshold.unwrap_or(defaults.success_threshold),
            seed: search.seed.unwrap_or(defaults.seed),
            advisors: search.advisors.unwrap_or(defaults.advisors),
            selection,
            dataset: match data.dataset {
                Some(d) => d.parse::<Dataset>().map_err(|e| anyhow!(e))?,
                None => defaults.dataset,
            },
            data_path: data.path.map(PathBuf::from).unwrap_or(defaults.data_path),
            store_dir: store.dir.map(PathBuf::from).unwrap_or(defaults.store_dir),
            generator,
            prompt_path: prop.prompt.map(PathBuf::from),
            judge: match judge.kind {
                Some(k) => k.parse::<JudgeKind>().map_err(|e| anyhow!(e))?,
                None => defaults.judge,
            },
        })
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();
        match &self.source {
            Some(source) => lines.push(format!("   Config: {}", source.display())),
            None => lines.push("   Config: (defaults)".to_string()),
        }
        lines.push(format!(
            "   Dataset: {} ({})",
            self.dataset,
            self.dataset.resolve(&self.data_path).display()
        ));
        lines.push(format!("   Results: {}", self.store_dir.display()));
        lines.push(format!(
            "   Steps: {}  Threshold: {:.2}  Seed: {}",
            self.max_steps, self.success_threshold, self.seed
        ));
        if self.use_llm {
            lines.push(format!(
                "   Proposer: llm via {}{}",
                self.generator.backend,
                self.generator
                    .model
                    .as_deref()
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            ));
        } else {
            lines.push("   Proposer: heuristic".to_string());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.source.is_none());
        assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(config.seed, 42);
        assert_eq!(config.selection, SelectionPolicy::default());
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
[search]
max-steps = 7
use-llm = true
threshold = 0.75

[selection]
rule = "gap-reduction"
baseline-wga = 0.5

[data]
dataset = "compas"
path = "/data/compas.csv"

[proposer]
backend = "gemini"
timeout-secs = 5

[judge]
kind = "llm"
"#;
        let config = Config::parse(toml, None).unwrap();
        assert_eq!(config.max_steps, 7);
        assert!(config.use_llm);
        assert_eq!(config.success_threshold, 0.75);
        assert_eq!(config.selection.rule, SelectionRule::GapReduction);
        assert_eq!(config.selection.floors.wga, 0.5);
        assert_eq!(config.selection.floors.ood, 0.586);
        assert_eq!(config.dataset, Dataset::Compas);
        assert_eq!(
            config.generator.backend,
            Backend::Cli(crate::search::llm::Agent::Gemini)
        );
        assert_eq!(config.generator.timeout, Duration::from_secs(5));
        assert_eq!(config.judge, JudgeKind::Llm);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[search]\nmax-steps = \"many\"").unwrap();
        assert!(Config::load(dir.path()).is_err());

        assert!(Config::parse("[search]\nmax-stepz = 1", None).is_err());
        assert!(Config::parse("[data]\ndataset = \"mnist\"", None).is_err());
    }
}
