//! oodsearch CLI - robustness-aware training strategy search
//!
//! Runs the search loop on one dataset:
//!
//! 1. Load `oodsearch.toml` (or defaults), then apply flag overrides
//! 2. Load persisted results; the best one becomes the incumbent
//! 3. Propose strategies (heuristic, or an LLM with heuristic fallback)
//! 4. Train and evaluate each candidate, keeping improvements
//! 5. Judge the incumbent; stop at the threshold or when the budget runs out
//!
//! Every record is written to the experiments directory as it completes, so an
//! interrupted session loses at most the candidate in flight.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use oodsearch::config::{Config, JudgeKind};
use oodsearch::data::Dataset;
use oodsearch::experiment::{LocalRunner, ResultStore};
use oodsearch::search::engine::{CandidateOutcome, LoopOptions, SearchOutcome, StopReason};
use oodsearch::search::llm::Backend;
use oodsearch::search::progress::plot_search_progress;
use oodsearch::search::{
    Advisors, HeuristicProposer, Judge, LiveProgress, LlmJudge, LlmProposer, Proposer,
    RubricJudge, SearchLoop, StrategyPrompt,
};

/// Robustness-aware training strategy search
///
/// Trains logistic-regression strategies on the in-domain split and keeps
/// the ones that hold up on a shifted out-of-domain split, with the
/// worst-performing demographic group weighted most heavily.
///
/// Examples:
///   oodsearch                               # 3 heuristic steps on diabetes
///   oodsearch --max-steps 6 --use-llm       # LLM proposals via GROQ_API_KEY
///   oodsearch --dataset compas --data data/ # Different dataset
///   oodsearch --use-llm --backend claude    # Proposals from a local agent CLI
#[derive(Parser, Debug)]
#[command(name = "oodsearch")]
#[command(version)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Number of search steps to run
    ///
    /// Each step proposes a batch of strategies and evaluates them all.
    /// Zero runs no steps and just reports the stored best.
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Ask an LLM for proposals
    ///
    /// Falls back to the built-in heuristic for any step where the model
    /// cannot be reached or answers with unusable JSON.
    #[arg(long)]
    pub use_llm: bool,

    /// Config file (default: ./oodsearch.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Dataset: diabetes or compas
    #[arg(long)]
    pub dataset: Option<Dataset>,

    /// CSV file, or a directory holding the dataset's default file name
    #[arg(long, value_name = "PATH")]
    pub data: Option<PathBuf>,

    /// Directory for run_<name>.json result files
    #[arg(long, value_name = "DIR")]
    pub experiments: Option<PathBuf>,

    /// LLM backend: chat (OpenAI-compatible HTTP), claude, gemini or codex
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Model name passed to the backend
    #[arg(long)]
    pub model: Option<String>,

    /// Per-request timeout for LLM calls
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Score the incumbent with an LLM judge instead of the rubric
    #[arg(long)]
    pub llm_judge: bool,

    /// Record research and critique notes from an LLM each step
    ///
    /// Notes are shown in verbose output and never change what runs.
    #[arg(long)]
    pub advisors: bool,

    /// Acceptance score that ends the search early
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Write a PNG chart of the session (requires --features plotters)
    #[arg(long, value_name = "FILE")]
    pub plot: Option<PathBuf>,

    /// Verbose output
    ///
    /// Enables debug logging (raw LLM responses, per-candidate metrics)
    /// and prints advisor notes. RUST_LOG takes precedence when set.
    #[arg(short, long)]
    pub verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "oodsearch=debug" } else { "oodsearch=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file and layer flag overrides on top.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_file(path)?,
        None => Config::load(&std::env::current_dir()?)?,
    };

    if let Some(n) = cli.max_steps {
        config.max_steps = n;
    }
    config.use_llm |= cli.use_llm;
    config.advisors |= cli.advisors;
    if cli.llm_judge {
        config.judge = JudgeKind::Llm;
    }
    if let Some(t) = cli.threshold {
        config.success_threshold = t;
    }
    if let Some(d) = cli.dataset {
        config.dataset = d;
    }
    if let Some(p) = &cli.data {
        config.data_path = p.clone();
    }
    if let Some(p) = &cli.experiments {
        config.store_dir = p.clone();
    }
    if let Some(b) = cli.backend {
        config.generator.backend = b;
    }
    if let Some(m) = &cli.model {
        config.generator.model = Some(m.clone());
    }
    if let Some(s) = cli.timeout_secs {
        config.generator.timeout = std::time::Duration::from_secs(s);
    }
    Ok(config)
}

fn build_proposer(config: &Config) -> Result<Box<dyn Proposer>> {
    if !config.use_llm {
        return Ok(Box::new(HeuristicProposer::default()));
    }
    let prompt = match &config.prompt_path {
        Some(path) => StrategyPrompt::load(path)
            .with_context(|| format!("Failed to load prompt {}", path.display()))?,
        None => StrategyPrompt::builtin(),
    };
    match config.generator.build() {
        Ok(generator) => Ok(Box::new(LlmProposer::new(generator, prompt))),
        Err(e) => {
            eprintln!(
                "{} {} (using heuristic proposals)",
                "⚠️".yellow(),
                e.to_string().yellow()
            );
            Ok(Box::new(HeuristicProposer::default()))
        }
    }
}

fn build_judge(config: &Config) -> Box<dyn Judge> {
    match config.judge {
        JudgeKind::Rubric => Box::new(RubricJudge::default()),
        JudgeKind::Llm => match config.generator.build() {
            Ok(generator) => Box::new(LlmJudge::new(generator)),
            Err(e) => {
                eprintln!("{} LLM judge unavailable ({}), using rubric", "⚠️".yellow(), e);
                Box::new(RubricJudge::default())
            }
        },
    }
}

fn print_outcome(outcome: &SearchOutcome, verbose: bool) {
    println!("{}", " BEST STRATEGY ".bold().on_blue());
    match &outcome.best {
        None => println!("  {}", "No scorable strategy yet.".dimmed()),
        Some(best) => {
            println!("  {}", best.config.summary().bold());
            println!(
                "  ID acc {:.4}  OOD acc {:.4}  gap {:.4}",
                best.id.accuracy,
                best.ood.accuracy,
                best.gap()
            );
            match best.ood.worst_group_accuracy {
                Some(w) => println!("  Worst-group acc {:.4}", w),
                None => println!("  Worst-group acc {}", "n/a".dimmed()),
            }
            for (group, acc) in &best.ood.group_accuracy {
                println!("    {:<24} {:.4}", group.to_string(), acc);
            }
        }
    }

    let stop = match outcome.stop_reason {
        StopReason::Threshold => "threshold reached".green().to_string(),
        StopReason::Budget => "step budget spent".yellow().to_string(),
    };
    println!(
        "\n  {} steps, acceptance score {:.3} ({})",
        outcome.steps, outcome.acceptance_score, stop
    );

    let failed = outcome
        .reports
        .iter()
        .flat_map(|r| &r.candidates)
        .filter(|c| matches!(c.outcome, CandidateOutcome::Failed(_)))
        .count();
    if failed > 0 {
        println!("  {} candidate runs failed (see log)", failed.to_string().red());
    }
    if let Some(rationale) = &outcome.last_rationale {
        println!("\n  {} {}", "Rationale:".bold(), rationale);
    }

    if verbose {
        for report in &outcome.reports {
            if let Some(reason) = &report.fallback_reason {
                println!("  step {}: fallback ({})", report.step, reason.dimmed());
            }
            if let Some(research) = &report.notes.research {
                println!("\n  {} step {}\n{}", "Research:".cyan(), report.step, research);
            }
            if let Some(critique) = &report.notes.critique {
                println!("\n  {} step {}\n{}", "Critique:".cyan(), report.step, critique);
            }
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = resolve_config(&cli)?;

    println!();
    println!("{}", " OODSEARCH STRATEGY SEARCH ".bold().on_magenta());
    println!();
    println!("{}", config.display_summary());
    println!();

    let store = ResultStore::open(&config.store_dir)
        .with_context(|| format!("Failed to open {}", config.store_dir.display()))?;
    let records = store.load_all()?;

    let runner = LocalRunner::new(
        config.dataset.splitter(&config.data_path, config.seed),
        config.seed,
    )
    .with_store(store);

    let progress = Rc::new(RefCell::new(LiveProgress::new()));
    let observer = Rc::clone(&progress);
    let total = config.max_steps;

    let mut search = SearchLoop::new(Box::new(runner), build_proposer(&config)?)
        .with_judge(build_judge(&config))
        .with_policy(config.selection.clone())
        .with_options(LoopOptions {
            max_steps: config.max_steps,
            success_threshold: config.success_threshold,
        })
        .on_step(move |report| {
            let mut progress = observer.borrow_mut();
            progress.record(report);
            progress.display(report.step + 1, total);
        });

    if config.advisors {
        match config.generator.build() {
            Ok(generator) => search = search.with_advisors(Advisors::new(generator)),
            Err(e) => eprintln!("{} advisors unavailable ({})", "⚠️".yellow(), e),
        }
    }

    let outcome = search.run(records);

    progress.borrow().final_summary();
    print_outcome(&outcome, cli.verbose);

    if let Some(path) = &cli.plot {
        plot_search_progress(&outcome.reports, &path.to_string_lossy())
            .map_err(|e| anyhow!("Failed to plot: {}", e))?;
    }

    Ok(())
}
