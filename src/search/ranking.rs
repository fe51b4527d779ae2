//! Ranking of result records by OOD accuracy.

use std::cmp::Ordering;

use crate::types::ResultRecord;

/// Descending by OOD accuracy; ties keep input order, NaN sorts last.
pub fn rank(records: &[ResultRecord]) -> Vec<&ResultRecord> {
    let mut ranked: Vec<&ResultRecord> = records.iter().collect();
    ranked.sort_by(|a, b| compare_ood(a.ood.accuracy, b.ood.accuracy));
    ranked
}

/// Owned variant of [`rank`].
pub fn rank_owned(mut records: Vec<ResultRecord>) -> Vec<ResultRecord> {
    records.sort_by(|a, b| compare_ood(a.ood.accuracy, b.ood.accuracy));
    records
}

fn compare_ood(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// The top-ranked record, if any.
pub fn best(records: &[ResultRecord]) -> Option<&ResultRecord> {
    rank(records).into_iter().next()
}

/// Short text summary of the top-ranked record.
pub fn summarize_best(records: &[ResultRecord]) -> String {
    match best(records) {
        None => "No experiment results yet.".to_string(),
        Some(r) => format!(
            "Best robust strategy so far: {}\n  ID accuracy:  {:.3}\n  OOD accuracy: {:.3}\n  ID-OOD gap:   {:.3}\n",
            r.name(),
            r.id.accuracy,
            r.ood.accuracy,
            r.id.accuracy - r.ood.accuracy
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::types::{IdMetrics, OodMetrics, StrategyConfig};

    fn rec(name: &str, ood: f64) -> ResultRecord {
        ResultRecord {
            config: StrategyConfig::new(name),
            id: IdMetrics { accuracy: 0.7, auc: 0.7 },
            ood: OodMetrics {
                accuracy: ood,
                auc: 0.6,
                group_accuracy: Default::default(),
                worst_group_accuracy: None,
            },
            meta_id: None,
            meta_ood: None,
        }
    }

    #[test]
    fn test_rank_is_stable_descending() {
        let records = vec![rec("a", 0.70), rec("b", 0.85), rec("c", 0.85), rec("d", 0.60)];
        let names: Vec<&str> = rank(&records).iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_nan_sorts_last() {
        let records = vec![rec("nan", f64::NAN), rec("low", 0.1), rec("high", 0.9)];
        let names: Vec<String> = rank_owned(records)
            .into_iter()
            .map(|r| r.config.name)
            .collect();
        assert_eq!(names, vec!["high", "low", "nan"]);
    }

    #[test]
    fn test_summarize_best() {
        assert_eq!(summarize_best(&[]), "No experiment results yet.");
        let text = summarize_best(&[rec("a", 0.6), rec("b", 0.65)]);
        assert!(text.contains("Best robust strategy so far: b"));
        assert!(text.contains("OOD accuracy: 0.650"));
        assert!(text.contains("ID-OOD gap:   0.050"));
    }

    proptest! {
        #[test]
        fn prop_rank_is_stable_descending_permutation(
            oods in prop::collection::vec(prop::option::of((0u32..=20).prop_map(|n| f64::from(n) / 20.0)), 0..40),
        ) {
            // Coarse grid so ties are common; `None` stands for NaN.
            let records: Vec<ResultRecord> = oods
                .iter()
                .enumerate()
                .map(|(i, o)| rec(&format!("r{:02}", i), o.unwrap_or(f64::NAN)))
                .collect();
            let ranked = rank(&records);
            prop_assert_eq!(ranked.len(), records.len());

            let index_of = |r: &ResultRecord| r.name()[1..].parse::<usize>().unwrap();
            let mut seen: Vec<usize> = ranked.iter().map(|&r| index_of(r)).collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..records.len()).collect::<Vec<_>>());

            for pair in ranked.windows(2) {
                let (a, b) = (pair[0].ood.accuracy, pair[1].ood.accuracy);
                prop_assert!(!a.is_nan() || b.is_nan(), "NaN ranked before a number");
                if !b.is_nan() {
                    prop_assert!(a >= b);
                }
                let tied = a == b || (a.is_nan() && b.is_nan());
                if tied {
                    prop_assert!(index_of(pair[0]) < index_of(pair[1]));
                }
            }

            let owned: Vec<String> = rank_owned(records.clone()).into_iter().map(|r| r.config.name).collect();
            let borrowed: Vec<String> = ranked.iter().map(|r| r.config.name.clone()).collect();
            prop_assert_eq!(owned, borrowed);
        }
    }
}
