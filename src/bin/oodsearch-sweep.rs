//! oodsearch-sweep: run the starter strategy grid
//!
//! Trains the fixed set of starter strategies, persists each record, then
//! prints every stored result ranked by OOD accuracy.
//!
//! ## Usage
//!
//! ```bash
//! oodsearch-sweep                                  # diabetes, ./data, ./experiments
//! oodsearch-sweep --dataset compas --data data/compas.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use oodsearch::config::Config;
use oodsearch::data::Dataset;
use oodsearch::experiment::{ExperimentRunner, LocalRunner, ResultStore};
use oodsearch::search::prompt::results_table;
use oodsearch::search::ranking;
use oodsearch::types::{ClassWeight, StrategyConfig};

#[derive(Parser)]
#[command(name = "oodsearch-sweep")]
#[command(about = "Run the starter strategy grid and print ranked results")]
struct Args {
    /// Config file (default: ./oodsearch.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset: diabetes or compas
    #[arg(long)]
    dataset: Option<Dataset>,

    /// CSV file or directory holding it
    #[arg(long)]
    data: Option<PathBuf>,

    /// Directory for run_<name>.json result files
    #[arg(long)]
    experiments: Option<PathBuf>,

    /// Seed for splits and subsampling
    #[arg(long)]
    seed: Option<u64>,
}

/// Starter grid: class weighting, undersampling, and group reweighting.
fn starter_grid() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig::new("baseline"),
        StrategyConfig::new("class_balanced").with_class_weight(ClassWeight::Balanced),
        StrategyConfig::new("undersample").with_undersampling(true),
        StrategyConfig::new("undersample_balanced")
            .with_undersampling(true)
            .with_class_weight(ClassWeight::Balanced),
        StrategyConfig::new("group_dro").with_group_dro(true),
    ]
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oodsearch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load_file(path)?,
        None => Config::load(&std::env::current_dir()?)?,
    };
    if let Some(d) = args.dataset {
        config.dataset = d;
    }
    if let Some(p) = args.data {
        config.data_path = p;
    }
    if let Some(p) = args.experiments {
        config.store_dir = p;
    }
    if let Some(s) = args.seed {
        config.seed = s;
    }

    println!();
    println!("{}", " OODSEARCH STARTER SWEEP ".bold().on_magenta());
    println!();

    let store = ResultStore::open(&config.store_dir)
        .with_context(|| format!("Failed to open {}", config.store_dir.display()))?;
    let mut runner = LocalRunner::new(
        config.dataset.splitter(&config.data_path, config.seed),
        config.seed,
    )
    .with_store(store.clone());

    for strategy in starter_grid() {
        match runner.run(&strategy) {
            Ok(record) => println!(
                "  {} {:<22} OOD {:.4}  WGA {}",
                "✓".green(),
                record.name(),
                record.ood.accuracy,
                record
                    .ood
                    .worst_group_accuracy
                    .map(|w| format!("{:.4}", w))
                    .unwrap_or_else(|| "n/a".to_string())
            ),
            Err(e) => println!("  {} {:<22} {}", "✗".red(), strategy.name, e.to_string().red()),
        }
    }

    let records = ranking::rank_owned(store.load_all()?);
    println!();
    println!("{}", results_table(&records));
    println!();
    println!("{}", ranking::summarize_best(&records));
    Ok(())
}
