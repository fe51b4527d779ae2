//! Experiment runner: one strategy config in, one persisted result record out.
//!
//! ```text
//! cached Splits ─▶ subsample ─▶ undersample ─▶ encode (fit on train)
//!                                                   │
//!          record ◀─ metrics ◀─ predict ◀─ fit (class × group weights)
//! ```
//!
//! Partitions and group labels are loaded once per runner and reused for
//! every config. Sampling is seeded, so a config reproduces its record.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::store::ResultStore;
use crate::data::{DatasetSplitter, FeatureEncoder, Frame, Partition, Splits};
use crate::error::{Result, SearchError};
use crate::model::metrics::{accuracy, group_accuracy, roc_auc, worst_group_accuracy};
use crate::model::{LogisticRegression, TrainOptions, balanced_class_weights};
use crate::types::{ClassWeight, GroupId, IdMetrics, MetaRow, OodMetrics, ResultRecord, StrategyConfig};

/// Anything that turns a config into a result record.
pub trait ExperimentRunner {
    fn run(&mut self, config: &StrategyConfig) -> Result<ResultRecord>;
}

/// Splits plus everything derived from them that does not depend on the config.
struct Prepared {
    splits: Splits,
    ood_groups: Vec<GroupId>,
    meta_id: Vec<MetaRow>,
    meta_ood: Vec<MetaRow>,
}

/// In-process runner over a dataset splitter.
pub struct LocalRunner {
    splitter: Box<dyn DatasetSplitter>,
    store: Option<ResultStore>,
    seed: u64,
    train_options: TrainOptions,
    record_meta: bool,
    cache: Option<Prepared>,
}

impl LocalRunner {
    pub fn new(splitter: Box<dyn DatasetSplitter>, seed: u64) -> Self {
        Self {
            splitter,
            store: None,
            seed,
            train_options: TrainOptions::default(),
            record_meta: true,
            cache: None,
        }
    }

    /// Persist every record to `store`.
    pub fn with_store(mut self, store: ResultStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Include per-row group metadata in records.
    pub fn with_meta(mut self, enabled: bool) -> Self {
        self.record_meta = enabled;
        self
    }
}

fn meta_rows(frame: &Frame, columns: &[&'static str]) -> Vec<MetaRow> {
    (0..frame.len())
        .map(|i| {
            columns
                .iter()
                .map(|&name| {
                    let value = match frame.column(name) {
                        Some(crate::data::Column::Numeric(v)) => v[i]
                            .and_then(serde_json::Number::from_f64)
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null),
                        Some(col) => col
                            .text(i)
                            .map(serde_json::Value::String)
                            .unwrap_or(serde_json::Value::Null),
                        None => serde_json::Value::Null,
                    };
                    (name.to_string(), value)
                })
                .collect()
        })
        .collect()
}

fn prepare(splitter: &dyn DatasetSplitter) -> Result<Prepared> {
    let splits = splitter.make_splits()?;
    info!(
        dataset = splitter.name(),
        train = splits.train.len(),
        id_test = splits.id_test.len(),
        ood_test = splits.ood_test.len(),
        "loaded splits"
    );
    let ood_groups = splitter.compute_group_id(&splits.ood_test.features);
    let columns = splitter.group_columns();
    Ok(Prepared {
        meta_id: meta_rows(&splits.id_test.features, columns),
        meta_ood: meta_rows(&splits.ood_test.features, columns),
        ood_groups,
        splits,
    })
}

/// Training rows after subsampling and majority undersampling.
fn sample_train_rows(labels: &[u8], config: &StrategyConfig, rng: &mut StdRng) -> Vec<usize> {
    let mut rows: Vec<usize> = (0..labels.len()).collect();

    if config.sample_frac < 1.0 {
        let n = (labels.len() as f64 * config.sample_frac).floor() as usize;
        rows.shuffle(rng);
        rows.truncate(n);
        rows.sort_unstable();
    }

    if config.undersample_majority {
        let (mut pos, mut neg): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&i| labels[i] == 1);
        let (majority, minority) = if neg.len() >= pos.len() {
            (&mut neg, &pos)
        } else {
            (&mut pos, &neg)
        };
        if !minority.is_empty() && majority.len() > minority.len() {
            majority.shuffle(rng);
            majority.truncate(minority.len());
            let mut kept: Vec<usize> = majority.iter().chain(minority.iter()).copied().collect();
            kept.sort_unstable();
            rows = kept;
        }
    }

    rows
}

/// Per-row training weights: class balancing times inverse group frequency.
fn sample_weights(
    labels: &[u8],
    config: &StrategyConfig,
    groups: Option<&[GroupId]>,
) -> Vec<f64> {
    let class_w = match config.class_weight {
        ClassWeight::Balanced => balanced_class_weights(labels),
        ClassWeight::None => [1.0, 1.0],
    };
    let mut weights: Vec<f64> = labels.iter().map(|&y| class_w[usize::from(y)]).collect();

    if let Some(groups) = groups {
        let mut counts: BTreeMap<&GroupId, usize> = BTreeMap::new();
        for g in groups {
            *counts.entry(g).or_default() += 1;
        }
        for (w, g) in weights.iter_mut().zip(groups) {
            *w /= counts[g] as f64;
        }
    }
    weights
}

fn execute(
    prepared: &Prepared,
    splitter: &dyn DatasetSplitter,
    config: &StrategyConfig,
    seed: u64,
    train_options: &TrainOptions,
) -> Result<(ResultRecord, usize)> {
    let splits = &prepared.splits;
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = sample_train_rows(&splits.train.labels, config, &mut rng);
    let train: Partition = splits.train.take(&rows);
    if train.is_empty() {
        return Err(SearchError::DataInsufficient(format!(
            "{}: no training rows after sampling",
            config.name
        )));
    }

    let encoder = FeatureEncoder::fit(&train.features);
    let x_train = encoder.transform(&train.features);
    let x_id = encoder.transform(&splits.id_test.features);
    let x_ood = encoder.transform(&splits.ood_test.features);

    let train_groups = config
        .use_group_dro
        .then(|| splitter.compute_group_id(&train.features));
    let weights = sample_weights(&train.labels, config, train_groups.as_deref());

    let options = TrainOptions {
        c: config.effective_c(),
        ..train_options.clone()
    };
    let model = LogisticRegression::fit(&x_train, &train.labels, &weights, &options)?;
    debug!(
        name = %config.name,
        features = encoder.n_features(),
        iterations = model.iterations,
        "trained classifier"
    );

    let id_proba = model.predict_proba(&x_id);
    let ood_proba = model.predict_proba(&x_ood);
    let group_acc = group_accuracy(&prepared.ood_groups, &splits.ood_test.labels, &ood_proba);
    let worst = worst_group_accuracy(&group_acc);

    let record = ResultRecord {
        config: config.clone(),
        id: IdMetrics {
            accuracy: accuracy(&splits.id_test.labels, &id_proba),
            auc: roc_auc(&splits.id_test.labels, &id_proba),
        },
        ood: OodMetrics {
            accuracy: accuracy(&splits.ood_test.labels, &ood_proba),
            auc: roc_auc(&splits.ood_test.labels, &ood_proba),
            group_accuracy: group_acc,
            worst_group_accuracy: worst,
        },
        meta_id: None,
        meta_ood: None,
    };
    Ok((record, train.len()))
}

impl ExperimentRunner for LocalRunner {
    fn run(&mut self, config: &StrategyConfig) -> Result<ResultRecord> {
        config.validate()?;

        if self.cache.is_none() {
            self.cache = Some(prepare(self.splitter.as_ref())?);
        }
        let Some(prepared) = self.cache.as_ref() else {
            return Err(SearchError::Dataset(anyhow::anyhow!("dataset splits not loaded")));
        };

        let (mut record, n_train) = execute(
            prepared,
            self.splitter.as_ref(),
            config,
            self.seed,
            &self.train_options,
        )?;
        if self.record_meta {
            record.meta_id = Some(prepared.meta_id.clone());
            record.meta_ood = Some(prepared.meta_ood.clone());
        }

        info!(
            name = %config.name,
            train_rows = n_train,
            id_acc = record.id.accuracy,
            ood_acc = record.ood.accuracy,
            wga = ?record.ood.worst_group_accuracy,
            "experiment finished"
        );

        if let Some(store) = &self.store {
            store.save(&record)?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;

    /// Synthetic dataset: label follows `x`, OOD shifts `x`, groups from `g`.
    struct Synthetic {
        single_class: bool,
    }

    fn partition(n: usize, shift: f64, single_class: bool) -> Partition {
        let mut xs = Vec::new();
        let mut gs = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let x = (i % 20) as f64 - 9.5 + shift;
            xs.push(Some(x));
            gs.push(match i % 3 {
                0 => Some("a".to_string()),
                1 => Some("b".to_string()),
                _ => None,
            });
            labels.push(if single_class { 0 } else { u8::from(x + (i % 7) as f64 * 0.3 > 0.0) });
        }
        Partition {
            features: Frame::from_columns(vec![
                ("x".into(), Column::Numeric(xs)),
                ("g".into(), Column::Categorical(gs)),
            ])
            .unwrap(),
            labels,
        }
    }

    impl DatasetSplitter for Synthetic {
        fn name(&self) -> &str {
            "synthetic"
        }

        fn make_splits(&self) -> anyhow::Result<Splits> {
            Ok(Splits {
                train: partition(200, 0.0, self.single_class),
                id_test: partition(60, 0.0, false),
                ood_test: partition(60, 2.0, false),
            })
        }

        fn compute_group_id(&self, frame: &Frame) -> Vec<GroupId> {
            let col = frame.column("g");
            (0..frame.len())
                .map(|i| match col.and_then(|c| c.text(i)) {
                    Some(g) => GroupId::Known(g),
                    None => GroupId::Unknown,
                })
                .collect()
        }

        fn group_columns(&self) -> &[&'static str] {
            &["g"]
        }
    }

    fn runner() -> LocalRunner {
        LocalRunner::new(Box::new(Synthetic { single_class: false }), 42)
    }

    #[test]
    fn test_run_produces_record() {
        let mut runner = runner();
        let rec = runner.run(&StrategyConfig::new("baseline")).unwrap();
        assert!(rec.id.accuracy > 0.7);
        assert!(!rec.id.auc.is_nan());
        assert!(rec.ood.group_accuracy.contains_key(&GroupId::Unknown));

        let wga = rec.ood.worst_group_accuracy.unwrap();
        for (g, &acc) in &rec.ood.group_accuracy {
            if !g.is_sentinel() {
                assert!(wga <= acc);
            }
        }
        assert_eq!(rec.meta_ood.as_ref().unwrap().len(), 60);
        assert_eq!(rec.meta_ood.as_ref().unwrap()[2]["g"], serde_json::Value::Null);
    }

    #[test]
    fn test_run_is_reproducible() {
        let cfg = StrategyConfig::new("frac")
            .with_sample_frac(0.6)
            .with_undersampling(true)
            .with_group_dro(true);
        let a = runner().run(&cfg).unwrap();
        let b = runner().run(&cfg).unwrap();
        assert_eq!(a.ood, b.ood);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_single_class_training_fails() {
        let mut runner = LocalRunner::new(Box::new(Synthetic { single_class: true }), 42);
        let err = runner.run(&StrategyConfig::new("x")).unwrap_err();
        assert!(matches!(err, SearchError::DataInsufficient(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = runner()
            .run(&StrategyConfig::new("x").with_l2_c(-1.0))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidConfig(_)));
    }

    #[test]
    fn test_runner_persists_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let mut runner = runner().with_store(store.clone()).with_meta(false);
        runner.run(&StrategyConfig::new("saved")).unwrap();
        let back = store.load("saved").unwrap().unwrap();
        assert!(back.meta_id.is_none());
    }

    #[test]
    fn test_sampling_rules() {
        let labels: Vec<u8> = (0..100).map(|i| u8::from(i < 20)).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let cfg = StrategyConfig::new("s").with_sample_frac(0.5);
        assert_eq!(sample_train_rows(&labels, &cfg, &mut rng).len(), 50);

        let cfg = StrategyConfig::new("u").with_undersampling(true);
        let rows = sample_train_rows(&labels, &cfg, &mut rng);
        assert_eq!(rows.len(), 40);
        assert_eq!(rows.iter().filter(|&&i| labels[i] == 1).count(), 20);

        // No minority rows: undersampling is a no-op
        let zeros = vec![0u8; 10];
        assert_eq!(sample_train_rows(&zeros, &cfg, &mut rng).len(), 10);
    }

    #[test]
    fn test_group_dro_weights() {
        let labels = [0, 1, 0, 1];
        let groups = vec![
            GroupId::Known("a".into()),
            GroupId::Known("a".into()),
            GroupId::Known("a".into()),
            GroupId::Known("b".into()),
        ];
        let cfg = StrategyConfig::new("d")
            .with_group_dro(true)
            .with_class_weight(ClassWeight::Balanced);
        let w = sample_weights(&labels, &cfg, Some(&groups));
        assert!((w[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((w[3] - 1.0).abs() < 1e-12);
    }
}
