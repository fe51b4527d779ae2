//! Feature encoding fit on the training partition.
//!
//! Categorical columns become one-hot indicators over the categories seen in
//! training; an unseen or missing category encodes as all zeros. Numeric
//! columns are mean-imputed and standardized with training statistics.
//! Output rows are sparse, since one-hot blocks dominate the width.

use std::collections::BTreeMap;

use super::frame::{Column, Frame};

/// Sparse row-major design matrix.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    pub rows: Vec<Vec<(usize, f64)>>,
    pub n_features: usize,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
enum ColumnEncoding {
    Standardize { mean: f64, scale: f64, offset: usize },
    OneHot { index: BTreeMap<String, usize>, offset: usize },
}

#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    columns: Vec<(String, ColumnEncoding)>,
    n_features: usize,
}

impl FeatureEncoder {
    /// Learn statistics and category sets from `train`.
    pub fn fit(train: &Frame) -> Self {
        let mut columns = Vec::new();
        let mut offset = 0usize;

        for (name, column) in train.columns() {
            let encoding = match column {
                Column::Numeric(values) => {
                    let present: Vec<f64> = values.iter().flatten().copied().collect();
                    let n = present.len().max(1) as f64;
                    let mean = present.iter().sum::<f64>() / n;
                    let var = present.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                    let scale = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
                    let enc = ColumnEncoding::Standardize { mean, scale, offset };
                    offset += 1;
                    enc
                }
                Column::Categorical(values) => {
                    let mut index = BTreeMap::new();
                    for v in values.iter().flatten() {
                        index.entry(v.clone()).or_insert(0usize);
                    }
                    for (i, slot) in index.values_mut().enumerate() {
                        *slot = offset + i;
                    }
                    let width = index.len();
                    let enc = ColumnEncoding::OneHot { index, offset };
                    offset += width;
                    enc
                }
            };
            columns.push((name.to_string(), encoding));
        }

        Self {
            columns,
            n_features: offset,
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Encode any partition; columns absent from `frame` encode as missing.
    pub fn transform(&self, frame: &Frame) -> FeatureMatrix {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); frame.len()];

        for (name, encoding) in &self.columns {
            let column = frame.column(name);
            for (r, row) in rows.iter_mut().enumerate() {
                match encoding {
                    ColumnEncoding::Standardize { mean, scale, offset } => {
                        let x = column.and_then(|c| c.number(r)).unwrap_or(*mean);
                        let z = (x - mean) / scale;
                        if z != 0.0 {
                            row.push((*offset, z));
                        }
                    }
                    ColumnEncoding::OneHot { index, .. } => {
                        if let Some(&j) = column
                            .and_then(|c| c.text(r))
                            .and_then(|v| index.get(&v))
                        {
                            row.push((j, 1.0));
                        }
                    }
                }
            }
        }

        FeatureMatrix {
            rows,
            n_features: self.n_features,
        }
    }
}
