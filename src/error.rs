//! Error taxonomy for the strategy search.
//!
//! Each variant carries its own recovery rule in the search loop:
//!
//! | Variant               | Scope of failure                          |
//! |-----------------------|-------------------------------------------|
//! | `DataInsufficient`    | one candidate's run                       |
//! | `ProposerParse`       | one step's proposal (heuristic fallback)  |
//! | `ProposerUnavailable` | one step's proposal (heuristic fallback)  |
//! | `ScoringUnavailable`  | one comparison (candidate is not better)  |
//! | everything else       | one candidate's run, or startup           |

use thiserror::Error;

/// Errors raised by the search, its runner and its proposers.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The training partition degenerated to a single label class.
    #[error("Insufficient training data: {0}")]
    DataInsufficient(String),

    /// The external text generator answered with something we cannot use.
    #[error("Proposer response could not be parsed: {0}")]
    ProposerParse(String),

    /// The external text generator could not be reached (credential, network, timeout).
    #[error("Proposer unavailable: {0}")]
    ProposerUnavailable(String),

    /// A record lacks a metric the selection score needs.
    #[error("Cannot score '{name}': {reason}")]
    ScoringUnavailable { name: String, reason: String },

    /// A strategy configuration violates its field constraints.
    #[error("Invalid strategy config: {0}")]
    InvalidConfig(String),

    /// Loading or splitting the dataset failed.
    #[error("Dataset error: {0:#}")]
    Dataset(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SearchError {
    /// True for failures the loop answers with the heuristic proposer.
    pub fn is_proposer_failure(&self) -> bool {
        matches!(
            self,
            SearchError::ProposerParse(_) | SearchError::ProposerUnavailable(_)
        )
    }
}

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::DataInsufficient("only label 0".to_string());
        assert!(err.to_string().contains("Insufficient training data"));

        let err = SearchError::ScoringUnavailable {
            name: "baseline".to_string(),
            reason: "worst_group_accuracy is null".to_string(),
        };
        assert!(err.to_string().contains("baseline"));
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_proposer_failures_are_recoverable() {
        assert!(SearchError::ProposerParse("x".into()).is_proposer_failure());
        assert!(SearchError::ProposerUnavailable("x".into()).is_proposer_failure());
        assert!(!SearchError::DataInsufficient("x".into()).is_proposer_failure());
    }
}
