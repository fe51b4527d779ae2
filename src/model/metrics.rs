//! Evaluation metrics: accuracy, ROC AUC and per-group accuracy.
//!
//! All thresholded predictions use `p >= 0.5`.

use std::collections::BTreeMap;

use crate::types::GroupId;

pub const DECISION_THRESHOLD: f64 = 0.5;

pub fn predict_label(p: f64) -> u8 {
    u8::from(p >= DECISION_THRESHOLD)
}

/// Fraction of correct thresholded predictions (NaN on empty input).
pub fn accuracy(labels: &[u8], proba: &[f64]) -> f64 {
    if labels.is_empty() {
        return f64::NAN;
    }
    let correct = labels
        .iter()
        .zip(proba)
        .filter(|&(&y, &p)| predict_label(p) == y)
        .count();
    correct as f64 / labels.len() as f64
}

/// Rank-based ROC AUC with average ranks for ties; NaN when only one class is present.
pub fn roc_auc(labels: &[u8], proba: &[f64]) -> f64 {
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|&a, &b| proba[a].total_cmp(&proba[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && proba[order[j + 1]] == proba[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie block [i, j]
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if labels[k] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Accuracy per group, over every group present in `groups`.
pub fn group_accuracy(groups: &[GroupId], labels: &[u8], proba: &[f64]) -> BTreeMap<GroupId, f64> {
    let mut tally: BTreeMap<GroupId, (usize, usize)> = BTreeMap::new();
    for ((g, &y), &p) in groups.iter().zip(labels).zip(proba) {
        let entry = tally.entry(g.clone()).or_default();
        entry.1 += 1;
        // Inclusive `>=` like overall accuracy, so p == 0.5 is class 1 in every group.
        if predict_label(p) == y {
            entry.0 += 1;
        }
    }
    tally
        .into_iter()
        .map(|(g, (correct, total))| (g, correct as f64 / total as f64))
        .collect()
}

/// Minimum accuracy over non-sentinel groups, `None` if there are none.
pub fn worst_group_accuracy(group_acc: &BTreeMap<GroupId, f64>) -> Option<f64> {
    group_acc
        .iter()
        .filter(|(g, _)| !g.is_sentinel())
        .map(|(_, &acc)| acc)
        .reduce(f64::min)
}
