//! oodsearch - Robustness-aware training strategy search
//!
//! Searches over training strategies for a logistic-regression classifier
//! evaluated under domain shift. Each strategy is trained on the in-domain
//! partition, scored on an out-of-domain partition, and judged by how well it
//! protects the worst-performing demographic group.
//!
//! # Architecture
//!
//! ```text
//! CSV → Frame → DatasetSplitter → FeatureEncoder → LogisticRegression → ResultRecord
//!                 (ID / OOD)        (one-hot,          (weighted Adam)        │
//!                                    standardize)                             ▼
//!        Proposer (heuristic | LLM) ◀──── SearchLoop ────▶ SelectionPolicy, Judge
//!                                              │
//!                                              ▼
//!                                   ResultStore (run_<name>.json)
//! ```
//!
//! # Modules
//!
//! - [`data`]: CSV loading, ID/OOD splits, demographic group ids, encoding
//! - [`model`]: logistic regression and evaluation metrics
//! - [`experiment`]: training one strategy end to end, persisting results
//! - [`search`]: proposers, selection policy, judges, the loop itself
//! - [`config`]: `oodsearch.toml`

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod model;
pub mod search;
pub mod types;

pub use config::Config;
pub use error::{Result, SearchError};
pub use types::{
    ClassWeight, GroupId, IdMetrics, OodMetrics, RegStrength, ResultRecord, StrategyConfig,
};

pub use data::{Dataset, DatasetSplitter, Splits};
pub use experiment::{ExperimentRunner, LocalRunner, ResultStore};
pub use search::{SearchLoop, SearchOutcome, SelectionPolicy};
