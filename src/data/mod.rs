//! Dataset loading, splitting and feature encoding.
//!
//! ```text
//! CSV ──▶ Frame ──▶ DatasetSplitter ──▶ Splits { train, id_test, ood_test }
//!                                          │
//!                                          ▼
//!                      FeatureEncoder::fit(train) ──▶ FeatureMatrix
//! ```

pub mod encoding;
pub mod frame;
pub mod splits;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use encoding::{FeatureEncoder, FeatureMatrix};
pub use frame::{Column, Frame};
pub use splits::{CompasSplitter, DatasetSplitter, DiabetesSplitter, Partition, Splits};

/// Which shipped dataset to search on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dataset {
    #[default]
    Diabetes,
    Compas,
}

impl Dataset {
    /// Conventional CSV location under the data directory.
    pub fn default_file(self) -> &'static str {
        match self {
            Dataset::Diabetes => "diabetes_readmission.csv",
            Dataset::Compas => "compas-scores-two-years.csv",
        }
    }

    /// Resolve a path: a file is used as-is, a directory gets the default file name.
    pub fn resolve(self, data: &Path) -> PathBuf {
        if data.is_dir() {
            data.join(self.default_file())
        } else {
            data.to_path_buf()
        }
    }

    pub fn splitter(self, data: &Path, seed: u64) -> Box<dyn DatasetSplitter> {
        let path = self.resolve(data);
        match self {
            Dataset::Diabetes => Box::new(DiabetesSplitter::new(path, seed)),
            Dataset::Compas => Box::new(CompasSplitter::new(path, seed)),
        }
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "diabetes" => Ok(Dataset::Diabetes),
            "compas" => Ok(Dataset::Compas),
            _ => Err(format!("Unknown dataset: {}. Use diabetes or compas", s)),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Diabetes => write!(f, "diabetes"),
            Dataset::Compas => write!(f, "compas"),
        }
    }
}
