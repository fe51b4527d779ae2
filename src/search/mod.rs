//! Strategy search: proposing, comparing and judging training strategies.
//!
//! # Architecture
//!
//! ```text
//!   Proposer ──configs──▶ ExperimentRunner ──records──▶ SelectionPolicy
//!   (heuristic | LLM)                                       │
//!        ▲                                                  ▼
//!        └──────────── SearchLoop ◀── acceptance ── Judge (rubric | LLM)
//! ```
//!
//! Every collaborator is a trait object injected into [`SearchLoop`], so tests
//! can drive the loop with stubs and no network or dataset.

pub mod advisors;
pub mod engine;
pub mod judge;
pub mod llm;
pub mod parse;
pub mod progress;
pub mod prompt;
pub mod proposer;
pub mod ranking;
pub mod selection;

pub use advisors::{AdvisorNotes, Advisors};
pub use engine::{
    CandidateOutcome, CandidateReport, LoopOptions, SearchLoop, SearchOutcome, SearchState,
    StepReport, StopReason,
};
pub use judge::{Judge, LlmJudge, RubricJudge};
pub use llm::{Agent, AgentCli, Backend, ChatCompletionsClient, GeneratorSettings, TextGenerator};
pub use progress::LiveProgress;
pub use prompt::StrategyPrompt;
pub use proposer::{HeuristicProposer, LlmProposer, Proposal, ProposalContext, Proposer};
pub use selection::{SelectionPolicy, SelectionRule};
