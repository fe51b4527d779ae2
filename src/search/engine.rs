//! The strategy search loop.
//!
//! ```text
//!  LoadBest ──▶ Propose ──▶ ┌─ Run ──▶ Compare ─┐ ──▶ Advance ──▶ Continue? ──┐
//!                  ▲        └────── per candidate ┘                          │
//!                  └──────────────────────── yes ────────────────────────────┘
//! ```
//!
//! | Phase    | Failure handling                                              |
//! |----------|---------------------------------------------------------------|
//! | Propose  | proposer parse/unavailable → heuristic proposer for the step  |
//! | Run      | any error or panic → candidate recorded as failed, loop goes on |
//! | Compare  | unscorable record → not better                                |
//! | Advance  | judge failures score 0.0                                      |
//!
//! Within a step the first improving candidate becomes the incumbent and later
//! candidates compete against it. The loop stops once the acceptance score
//! reaches the success threshold or the step budget is spent.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{info, warn};

use super::advisors::{AdvisorNotes, Advisors};
use super::judge::{DEFAULT_SUCCESS_THRESHOLD, Judge, RubricJudge};
use super::proposer::{HeuristicProposer, Proposal, ProposalContext, Proposer};
use super::ranking;
use super::selection::SelectionPolicy;
use crate::experiment::ExperimentRunner;
use crate::types::{ResultRecord, StrategyConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    pub max_steps: usize,
    pub success_threshold: f64,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_steps: 3,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

/// Mutable loop state; lives for one session.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub incumbent: Option<ResultRecord>,
    /// Records produced in this session
    pub history: Vec<ResultRecord>,
    pub step: usize,
    pub max_steps: usize,
    pub acceptance_score: f64,
    /// Persisted records at session start plus this session's results
    pub known: Vec<ResultRecord>,
}

impl SearchState {
    /// Initialize from persisted records; the top-ranked one becomes the incumbent.
    pub fn from_records(records: Vec<ResultRecord>, max_steps: usize) -> Self {
        let incumbent = ranking::best(&records).cloned();
        Self {
            incumbent,
            history: Vec::new(),
            step: 0,
            max_steps,
            acceptance_score: 0.0,
            known: records,
        }
    }

    fn remember(&mut self, record: &ResultRecord) {
        self.known.retain(|r| r.name() != record.name());
        self.known.push(record.clone());
        self.history.push(record.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    /// Became the incumbent
    Accepted,
    Rejected,
    /// Run failed; the message is the error or panic text
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateReport {
    pub config: StrategyConfig,
    pub outcome: CandidateOutcome,
    pub score: Option<f64>,
    pub ood_accuracy: Option<f64>,
    pub worst_group_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: usize,
    /// Proposer that produced the candidates
    pub proposer: String,
    /// Why the primary proposer was bypassed, if it was
    pub fallback_reason: Option<String>,
    pub rationale: Option<String>,
    pub candidates: Vec<CandidateReport>,
    pub incumbent: Option<String>,
    pub incumbent_ood: Option<f64>,
    pub incumbent_wga: Option<f64>,
    pub acceptance_score: f64,
    pub notes: AdvisorNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Acceptance score reached the threshold
    Threshold,
    /// Step budget exhausted
    Budget,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: Option<ResultRecord>,
    pub steps: usize,
    pub acceptance_score: f64,
    pub stop_reason: StopReason,
    pub reports: Vec<StepReport>,
    pub history: Vec<ResultRecord>,
    pub last_rationale: Option<String>,
}

impl SearchOutcome {
    pub fn best_config(&self) -> Option<&StrategyConfig> {
        self.best.as_ref().map(|r| &r.config)
    }
}

type StepObserver = Box<dyn FnMut(&StepReport)>;

/// Orchestrates proposer, runner, selection policy and judge.
pub struct SearchLoop {
    runner: Box<dyn ExperimentRunner>,
    proposer: Box<dyn Proposer>,
    fallback: HeuristicProposer,
    judge: Box<dyn Judge>,
    policy: SelectionPolicy,
    advisors: Option<Advisors>,
    options: LoopOptions,
    observer: Option<StepObserver>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SearchLoop {
    pub fn new(runner: Box<dyn ExperimentRunner>, proposer: Box<dyn Proposer>) -> Self {
        Self {
            runner,
            proposer,
            fallback: HeuristicProposer::default(),
            judge: Box::new(RubricJudge::default()),
            policy: SelectionPolicy::default(),
            advisors: None,
            options: LoopOptions::default(),
            observer: None,
        }
    }

    pub fn with_judge(mut self, judge: Box<dyn Judge>) -> Self {
        self.judge = judge;
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_advisors(mut self, advisors: Advisors) -> Self {
        self.advisors = Some(advisors);
        self
    }

    /// Called after every step, e.g. to drive a progress display.
    pub fn on_step(mut self, observer: impl FnMut(&StepReport) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Run a full session starting from the given persisted records.
    pub fn run(&mut self, records: Vec<ResultRecord>) -> SearchOutcome {
        let mut state = SearchState::from_records(records, self.options.max_steps);
        info!(
            known = state.known.len(),
            incumbent = state.incumbent.as_ref().map(|r| r.name()).unwrap_or("none"),
            max_steps = state.max_steps,
            proposer = self.proposer.name(),
            "search started"
        );

        let mut reports = Vec::new();
        let mut last_rationale = None;
        let mut stop_reason = StopReason::Budget;

        while state.step < state.max_steps {
            let report = self.step(&mut state);
            if report.rationale.is_some() {
                last_rationale = report.rationale.clone();
            }
            if let Some(observer) = self.observer.as_mut() {
                observer(&report);
            }
            reports.push(report);

            if state.acceptance_score >= self.options.success_threshold {
                info!(
                    score = state.acceptance_score,
                    threshold = self.options.success_threshold,
                    "acceptance threshold reached"
                );
                stop_reason = StopReason::Threshold;
                break;
            }
        }

        info!(
            steps = state.step,
            best = state.incumbent.as_ref().map(|r| r.name()).unwrap_or("none"),
            score = state.acceptance_score,
            "search finished"
        );

        SearchOutcome {
            best: state.incumbent,
            steps: state.step,
            acceptance_score: state.acceptance_score,
            stop_reason,
            reports,
            history: state.history,
            last_rationale,
        }
    }

    /// Propose, falling back to the heuristic on recoverable proposer failures.
    fn propose(&mut self, state: &SearchState) -> (Proposal, String, Option<String>) {
        let ctx = ProposalContext {
            step: state.step,
            max_steps: state.max_steps,
            incumbent: state.incumbent.as_ref(),
            history: &state.history,
            known: &state.known,
        };

        match self.proposer.propose(&ctx) {
            Ok(p) => (p, self.proposer.name().to_string(), None),
            Err(e) => {
                if e.is_proposer_failure() {
                    warn!(step = state.step, error = %e, "proposer failed, using heuristic fallback");
                } else {
                    warn!(step = state.step, error = %e, "unexpected proposer error, using heuristic fallback");
                }
                let p = self.fallback.proposal_for(&ctx);
                (p, self.fallback_name(), Some(e.to_string()))
            }
        }
    }

    fn fallback_name(&self) -> String {
        "heuristic (fallback)".to_string()
    }

    /// Run one candidate with errors and panics contained.
    fn run_candidate(&mut self, config: &StrategyConfig) -> Result<ResultRecord, String> {
        let runner = &mut self.runner;
        match catch_unwind(AssertUnwindSafe(|| runner.run(config))) {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    fn step(&mut self, state: &mut SearchState) -> StepReport {
        let step = state.step;
        let (proposal, proposer, fallback_reason) = self.propose(state);
        info!(
            step,
            proposer = %proposer,
            candidates = proposal.configs.len(),
            "proposal ready"
        );

        let notes = match &self.advisors {
            Some(advisors) => advisors.advise(state.incumbent.as_ref(), &proposal.configs),
            None => AdvisorNotes::default(),
        };

        let mut candidates = Vec::with_capacity(proposal.configs.len());
        for config in &proposal.configs {
            let report = match self.run_candidate(config) {
                Ok(record) => {
                    let better = self.policy.is_better(&record, state.incumbent.as_ref());
                    let score = self.policy.score(&record).ok();
                    info!(
                        step,
                        name = %config.name,
                        ood = record.ood.accuracy,
                        wga = ?record.ood.worst_group_accuracy,
                        score = ?score,
                        accepted = better,
                        "candidate evaluated"
                    );
                    let report = CandidateReport {
                        config: config.clone(),
                        outcome: if better {
                            CandidateOutcome::Accepted
                        } else {
                            CandidateOutcome::Rejected
                        },
                        score,
                        ood_accuracy: Some(record.ood.accuracy),
                        worst_group_accuracy: record.ood.worst_group_accuracy,
                    };
                    state.remember(&record);
                    if better {
                        state.incumbent = Some(record);
                    }
                    report
                }
                Err(message) => {
                    warn!(step, name = %config.name, error = %message, "candidate failed");
                    CandidateReport {
                        config: config.clone(),
                        outcome: CandidateOutcome::Failed(message),
                        score: None,
                        ood_accuracy: None,
                        worst_group_accuracy: None,
                    }
                }
            };
            candidates.push(report);
        }

        state.acceptance_score = self.judge.score(state.incumbent.as_ref());
        state.step += 1;
        info!(
            step,
            judge = self.judge.name(),
            score = state.acceptance_score,
            "step complete"
        );

        StepReport {
            step,
            proposer,
            fallback_reason,
            rationale: proposal.rationale,
            candidates,
            incumbent: state.incumbent.as_ref().map(|r| r.name().to_string()),
            incumbent_ood: state.incumbent.as_ref().map(|r| r.ood.accuracy),
            incumbent_wga: state.incumbent.as_ref().and_then(|r| r.ood.worst_group_accuracy),
            acceptance_score: state.acceptance_score,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SearchError};
    use crate::types::{IdMetrics, OodMetrics};

    fn rec(name: &str, ood: f64, wga: f64) -> ResultRecord {
        ResultRecord {
            config: StrategyConfig::new(name),
            id: IdMetrics { accuracy: ood + 0.02, auc: 0.7 },
            ood: OodMetrics {
                accuracy: ood,
                auc: 0.7,
                group_accuracy: Default::default(),
                worst_group_accuracy: Some(wga),
            },
            meta_id: None,
            meta_ood: None,
        }
    }

    /// Runner whose metrics are keyed off the config name.
    struct Table;

    impl ExperimentRunner for Table {
        fn run(&mut self, config: &StrategyConfig) -> Result<ResultRecord> {
            match config.name.as_str() {
                "boom" => panic!("exploded"),
                "bad" => Err(SearchError::DataInsufficient("one class".into())),
                "good" => Ok(rec("good", 0.62, 0.58)),
                "better" => Ok(rec("better", 0.64, 0.62)),
                other => Ok(rec(other, 0.60, 0.55)),
            }
        }
    }

    struct Fixed(Vec<&'static str>);

    impl Proposer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn propose(&mut self, _ctx: &ProposalContext<'_>) -> Result<Proposal> {
            Ok(Proposal {
                configs: self.0.iter().map(|n| StrategyConfig::new(*n)).collect(),
                rationale: Some("fixed list".into()),
            })
        }
    }

    fn lp(max_steps: usize) -> LoopOptions {
        LoopOptions {
            max_steps,
            success_threshold: 0.99,
        }
    }

    #[test]
    fn test_zero_budget_runs_nothing() {
        let mut search = SearchLoop::new(Box::new(Table), Box::new(Fixed(vec!["good"])))
            .with_options(lp(0));
        let out = search.run(vec![]);
        assert_eq!(out.steps, 0);
        assert!(out.reports.is_empty());
        assert!(out.best.is_none());
        assert_eq!(out.stop_reason, StopReason::Budget);
    }

    #[test]
    fn test_failures_are_contained() {
        let mut search = SearchLoop::new(
            Box::new(Table),
            Box::new(Fixed(vec!["boom", "bad", "good"])),
        )
        .with_options(lp(1));
        let out = search.run(vec![]);
        let outcomes: Vec<_> = out.reports[0].candidates.iter().map(|c| c.outcome.clone()).collect();
        assert!(matches!(&outcomes[0], CandidateOutcome::Failed(m) if m.contains("exploded")));
        assert!(matches!(&outcomes[1], CandidateOutcome::Failed(m) if m.contains("Insufficient")));
        assert_eq!(outcomes[2], CandidateOutcome::Accepted);
        assert_eq!(out.best.unwrap().name(), "good");
        assert_eq!(out.history.len(), 1);
    }

    #[test]
    fn test_first_improvement_then_compare_against_new_incumbent() {
        let mut search = SearchLoop::new(
            Box::new(Table),
            Box::new(Fixed(vec!["plain", "good", "plain2", "better"])),
        )
        .with_options(lp(1));
        let out = search.run(vec![]);
        let outcomes: Vec<_> = out.reports[0].candidates.iter().map(|c| c.outcome.clone()).collect();
        // "plain" is accepted first (no incumbent, positive score)
        assert_eq!(outcomes[0], CandidateOutcome::Accepted);
        assert_eq!(outcomes[1], CandidateOutcome::Accepted);
        assert_eq!(outcomes[2], CandidateOutcome::Rejected);
        assert_eq!(outcomes[3], CandidateOutcome::Accepted);
        assert_eq!(out.best.unwrap().name(), "better");
    }

    #[test]
    fn test_incumbent_loaded_from_ranking() {
        let mut search = SearchLoop::new(Box::new(Table), Box::new(Fixed(vec![])))
            .with_options(lp(2));
        let out = search.run(vec![rec("low", 0.55, 0.5), rec("high", 0.7, 0.6)]);
        assert_eq!(out.best.unwrap().name(), "high");
        assert_eq!(out.steps, 2);
        assert!(out.reports.iter().all(|r| r.candidates.is_empty()));
    }

    #[test]
    fn test_threshold_stops_early() {
        let mut search = SearchLoop::new(Box::new(Table), Box::new(Fixed(vec!["better"])))
            .with_options(LoopOptions {
                max_steps: 5,
                success_threshold: 0.5,
            });
        let out = search.run(vec![]);
        assert_eq!(out.steps, 1);
        assert_eq!(out.stop_reason, StopReason::Threshold);
        assert!(out.acceptance_score >= 0.5);
    }

    #[test]
    fn test_observer_sees_every_step() {
        let seen = std::rc::Rc::new(std::cell::Cell::new(0usize));
        let counter = seen.clone();
        let mut search = SearchLoop::new(Box::new(Table), Box::new(Fixed(vec!["x"])))
            .with_options(lp(3))
            .on_step(move |_| counter.set(counter.get() + 1));
        search.run(vec![]);
        assert_eq!(seen.get(), 3);
    }
}
