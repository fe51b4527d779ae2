//! Classifier and evaluation metrics used by the experiment runner.

pub mod logistic;
pub mod metrics;

pub use logistic::{LogisticRegression, TrainOptions, balanced_class_weights};
