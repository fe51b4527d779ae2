//! Dataset splitters: train / ID-test / OOD-test partitions plus group labels.
//!
//! | Dataset    | OOD partition                          | Groups          |
//! |------------|----------------------------------------|-----------------|
//! | `diabetes` | `admission_source_id == 1` (emergency) | sex × prior ER  |
//! | `compas`   | latest 20% by `c_days_from_compas`     | race × sex      |
//!
//! Splits are deterministic given the seed. Group labels are computed from
//! raw feature columns so every partition is labeled identically.

use std::path::PathBuf;

use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::frame::{Column, Frame};
use crate::types::GroupId;

/// Features and 0/1 labels for one partition.
#[derive(Debug, Clone)]
pub struct Partition {
    pub features: Frame,
    pub labels: Vec<u8>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn take(&self, indices: &[usize]) -> Partition {
        Partition {
            features: self.features.take(indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Splits {
    pub train: Partition,
    pub id_test: Partition,
    pub ood_test: Partition,
}

/// Source of fixed partitions and the group definition for one dataset.
pub trait DatasetSplitter {
    fn name(&self) -> &str;

    fn make_splits(&self) -> Result<Splits>;

    /// One label per row, sentinels for missing or invalid attributes.
    fn compute_group_id(&self, frame: &Frame) -> Vec<GroupId>;

    /// Raw columns recorded as per-row metadata in result records.
    fn group_columns(&self) -> &[&'static str];
}

/// Stratified split of `0..labels.len()` into (keep, held_out).
///
/// Each label class contributes `round(n_class * held_out_frac)` rows to the
/// held-out side.
pub fn stratified_split(labels: &[u8], held_out_frac: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keep = Vec::new();
    let mut held_out = Vec::new();

    for class in [0u8, 1u8] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let n_out = (idx.len() as f64 * held_out_frac).round() as usize;
        held_out.extend_from_slice(&idx[..n_out]);
        keep.extend_from_slice(&idx[n_out..]);
    }

    keep.shuffle(&mut rng);
    held_out.shuffle(&mut rng);
    (keep, held_out)
}

// =============================================================================
// Diabetes readmission
// =============================================================================

/// UCI diabetes readmission. ID = non-emergency admissions, OOD = emergency.
#[derive(Debug, Clone)]
pub struct DiabetesSplitter {
    pub path: PathBuf,
    pub seed: u64,
    pub test_size: f64,
}

impl DiabetesSplitter {
    pub const LABEL: &'static str = "readmitted";
    pub const DOMAIN: &'static str = "admission_source_id";
    /// `admission_source_id` of the emergency room
    pub const ER_SOURCE_ID: f64 = 1.0;
    /// Row identifiers, never used as features
    pub const ID_COLUMNS: &'static [&'static str] = &["encounter_id", "patient_nbr"];

    pub fn new(path: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            path: path.into(),
            seed,
            test_size: 0.2,
        }
    }

    /// Label encoding plus derived `sex` / `er_flag` columns.
    pub fn prepare(raw: Frame) -> Result<(Frame, Vec<u8>)> {
        let label_col = raw.require(Self::LABEL)?;
        let keep: Vec<usize> = (0..raw.len())
            .filter(|&i| label_col.text(i).is_some())
            .collect();
        let mut frame = raw.take(&keep);

        let label_col = frame.require(Self::LABEL)?;
        let labels: Vec<u8> = (0..frame.len())
            .map(|i| match label_col.text(i).as_deref() {
                Some("NO") => 0,
                _ => 1,
            })
            .collect();

        let gender = frame.require("gender")?;
        let sex: Vec<Option<String>> = (0..frame.len()).map(|i| gender.text(i)).collect();
        let emergency = frame.require("number_emergency")?;
        let er_flag: Vec<Option<f64>> = (0..frame.len())
            .map(|i| emergency.number(i).map(|n| if n > 0.0 { 1.0 } else { 0.0 }))
            .collect();

        frame.push_column("sex", Column::Categorical(sex))?;
        frame.push_column("er_flag", Column::Numeric(er_flag))?;

        let mut drop = vec![Self::LABEL];
        drop.extend_from_slice(Self::ID_COLUMNS);
        Ok((frame.without(&drop), labels))
    }

    /// Split prepared rows into (id, ood) row indices by admission source.
    fn domain_split(frame: &Frame) -> Result<(Vec<usize>, Vec<usize>)> {
        let domain = frame.require(Self::DOMAIN)?;
        let (ood, id): (Vec<usize>, Vec<usize>) =
            (0..frame.len()).partition(|&i| domain.number(i) == Some(Self::ER_SOURCE_ID));
        Ok((id, ood))
    }

    pub fn splits_from_frame(&self, raw: Frame) -> Result<Splits> {
        let (frame, labels) = Self::prepare(raw)?;
        let (id_rows, ood_rows) = Self::domain_split(&frame)?;
        if id_rows.is_empty() || ood_rows.is_empty() {
            bail!(
                "Domain split is empty (ID rows: {}, OOD rows: {})",
                id_rows.len(),
                ood_rows.len()
            );
        }

        let all = Partition { features: frame, labels };
        let id = all.take(&id_rows);
        let ood_test = all.take(&ood_rows);

        let (train_rows, test_rows) = stratified_split(&id.labels, self.test_size, self.seed);
        Ok(Splits {
            train: id.take(&train_rows),
            id_test: id.take(&test_rows),
            ood_test,
        })
    }
}

impl DatasetSplitter for DiabetesSplitter {
    fn name(&self) -> &str {
        "diabetes"
    }

    fn make_splits(&self) -> Result<Splits> {
        let raw = Frame::from_csv(&self.path)?;
        self.splits_from_frame(raw)
    }

    fn compute_group_id(&self, frame: &Frame) -> Vec<GroupId> {
        let (Some(sex), Some(emergency)) = (frame.column("sex"), frame.column("number_emergency"))
        else {
            return vec![GroupId::Unknown; frame.len()];
        };

        (0..frame.len())
            .map(|i| {
                let er = match emergency.number(i) {
                    Some(n) if n > 0.0 => "ER",
                    Some(_) => "NON_ER",
                    None => return GroupId::Unknown,
                };
                match sex.text(i).as_deref() {
                    None => GroupId::Unknown,
                    Some(s @ ("Male" | "Female")) => GroupId::Known(format!("{}_{}", s, er)),
                    Some(_) => GroupId::Invalid,
                }
            })
            .collect()
    }

    fn group_columns(&self) -> &[&'static str] {
        &["sex", "er_flag"]
    }
}

// =============================================================================
// COMPAS recidivism
// =============================================================================

/// ProPublica COMPAS two-year recidivism, split by time.
#[derive(Debug, Clone)]
pub struct CompasSplitter {
    pub path: PathBuf,
    pub seed: u64,
    /// Leading fraction (by time) forming the ID pool
    pub id_fraction: f64,
    /// Fraction of the ID pool discarded before the train/test split
    pub pool_holdout: f64,
    pub test_size: f64,
}

impl CompasSplitter {
    pub const TIME: &'static str = "c_days_from_compas";
    pub const FEATURES: &'static [&'static str] = &[
        "sex",
        "age",
        "race",
        "juv_fel_count",
        "decile_score",
        "juv_misd_count",
        "juv_other_count",
        "priors_count",
        "c_days_from_compas",
        "c_charge_degree",
        "c_charge_desc",
    ];

    pub fn new(path: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            path: path.into(),
            seed,
            id_fraction: 0.8,
            pool_holdout: 0.3,
            test_size: 0.3,
        }
    }

    /// Standard screening filters; returns kept rows and recidivism labels.
    pub fn prepare(raw: &Frame) -> Result<(Frame, Vec<u8>)> {
        let screening = raw.require("days_b_screening_arrest")?;
        let is_recid = raw.require("is_recid")?;
        let degree = raw.require("c_charge_degree")?;
        let score_text = raw.column("score_text");

        let keep: Vec<usize> = (0..raw.len())
            .filter(|&i| {
                let in_window = screening
                    .number(i)
                    .is_some_and(|d| (-30.0..=30.0).contains(&d));
                let recid_known = is_recid.number(i) != Some(-1.0);
                let charged = degree.text(i).as_deref() != Some("0");
                let scored = score_text.is_none_or(|c| c.text(i).as_deref() != Some("N/A"));
                in_window && recid_known && charged && scored
            })
            .collect();

        let labels = keep
            .iter()
            .map(|&i| u8::from(is_recid.number(i) == Some(1.0)))
            .collect();
        let frame = raw.take(&keep).select(Self::FEATURES)?;
        Ok((frame, labels))
    }

    pub fn splits_from_frame(&self, raw: Frame) -> Result<Splits> {
        let (frame, labels) = Self::prepare(&raw)?;
        let time = frame.require(Self::TIME)?;

        // Stable sort, missing times last
        let mut order: Vec<usize> = (0..frame.len()).collect();
        order.sort_by(|&a, &b| match (time.number(a), time.number(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let cut = (order.len() as f64 * self.id_fraction) as usize;
        if cut == 0 || cut == order.len() {
            bail!("Time split is empty ({} filtered rows)", order.len());
        }

        let all = Partition { features: frame, labels };
        let pool = all.take(&order[..cut]);
        let ood_test = all.take(&order[cut..]);

        let (kept, _) = stratified_split(&pool.labels, self.pool_holdout, self.seed);
        let pool = pool.take(&kept);
        let (train_rows, test_rows) = stratified_split(&pool.labels, self.test_size, self.seed);

        Ok(Splits {
            train: pool.take(&train_rows),
            id_test: pool.take(&test_rows),
            ood_test,
        })
    }
}

impl DatasetSplitter for CompasSplitter {
    fn name(&self) -> &str {
        "compas"
    }

    fn make_splits(&self) -> Result<Splits> {
        let raw = Frame::from_csv(&self.path)?;
        self.splits_from_frame(raw)
    }

    fn compute_group_id(&self, frame: &Frame) -> Vec<GroupId> {
        let race = frame.column("race");
        let sex = frame.column("sex");
        (0..frame.len())
            .map(|i| {
                let r = race.and_then(|c| c.text(i));
                let s = sex.and_then(|c| c.text(i));
                match (r, s) {
                    (Some(r), Some(s)) => GroupId::Known(format!("{}_{}", r, s)),
                    _ => GroupId::Unknown,
                }
            })
            .collect()
    }

    fn group_columns(&self) -> &[&'static str] {
        &["race", "sex"]
    }
}
