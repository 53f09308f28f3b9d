//! Error types for casegraph-core

use thiserror::Error;

/// Main error type for the casegraph-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No event carries the requested track id
    #[error("case not found: {0}")]
    MissingCase(String),

    /// Edge endpoints or activity ids do not form a valid case graph
    #[error("inconsistent graph for case {track_id}: {message}")]
    InconsistentGraph { track_id: String, message: String },

    /// An edge endpoint resolves to more than one event
    #[error(
        "ambiguous edge label in case {track_id}: activity {activity_id} matches {candidates} events"
    )]
    AmbiguousEdgeLabel {
        track_id: String,
        activity_id: u32,
        candidates: usize,
    },

    /// A fork whose successors never continue
    #[error("orphan fork in case {track_id} at activity {activity_id}: no branch has a successor")]
    OrphanFork { track_id: String, activity_id: u32 },

    /// A graph file line that could not be parsed
    #[error("malformed line {line}: {message}")]
    MalformedLine { line: usize, message: String },

    /// Input path pattern that is not a valid glob
    #[error("invalid path pattern: {0}")]
    InvalidPattern(String),

    /// Timestamp text in none of the accepted formats
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Query window whose start lies after its finish
    #[error("invalid query window: {0}")]
    InvalidWindow(String),
}

impl Error {
    /// Whether this error concerns a single case's structure.
    ///
    /// Structural errors skip the case; everything else aborts the batch.
    pub fn is_case_error(&self) -> bool {
        matches!(
            self,
            Error::MissingCase(_)
                | Error::InconsistentGraph { .. }
                | Error::AmbiguousEdgeLabel { .. }
                | Error::OrphanFork { .. }
        )
    }

    pub(crate) fn inconsistent(track_id: &str, message: impl Into<String>) -> Self {
        Error::InconsistentGraph {
            track_id: track_id.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for casegraph-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_errors_are_skippable() {
        assert!(Error::MissingCase("t1".to_string()).is_case_error());
        assert!(Error::OrphanFork {
            track_id: "t1".to_string(),
            activity_id: 2
        }
        .is_case_error());
        assert!(!Error::Config("bad".to_string()).is_case_error());
        assert!(!Error::MalformedLine {
            line: 3,
            message: "x".to_string()
        }
        .is_case_error());
    }

    #[test]
    fn test_malformed_line_message_names_line() {
        let err = Error::MalformedLine {
            line: 42,
            message: "expected 5 fields, found 3".to_string(),
        };
        assert_eq!(err.to_string(), "malformed line 42: expected 5 fields, found 3");
    }
}
