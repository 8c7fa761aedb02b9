//! Error types for the clause engine
//!
//! All fallible operations return `Result<T, Error>`.
//! Variants follow the failure classes a transaction can hit: structural
//! problems with the request, ledger lookups, typed condition evaluation,
//! and persistence.

use thiserror::Error;

/// Clause engine error types
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed reference, missing required field, clause not in contract
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A referenced asset does not exist on the ledger
    #[error("Asset not found: {asset_type} '{key}'")]
    NotFound { asset_type: String, key: String },

    /// `put_new` on a key that is already taken
    #[error("Asset already exists: {asset_type} '{key}'")]
    AlreadyExists { asset_type: String, key: String },

    /// Clause dependencies loop back on themselves
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Runtime kind differs from the declared kind
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// An explicitly requested condition evaluated to false
    #[error("Condition not met: {0}")]
    ConditionNotMet(String),

    /// Handler input is present but invalid
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Ledger write failed while touching the named asset
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap this error with the asset that was being written
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Persistence {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// HTTP-like status used by the dispatch surface
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest(_)
            | Error::DependencyCycle(_)
            | Error::TypeMismatch { .. }
            | Error::ConditionNotMet(_)
            | Error::InvalidData(_) => 400,
            Error::NotFound { .. } => 404,
            Error::AlreadyExists { .. } => 409,
            Error::Persistence { source, .. } => source.status(),
            Error::Serialization(_) => 500,
        }
    }

    /// True when the caller sent something the engine refuses
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

/// Result type alias for clause engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(Error::BadRequest("x".into()).status(), 400);
        assert_eq!(
            Error::NotFound {
                asset_type: "clause".into(),
                key: "k".into()
            }
            .status(),
            404
        );
        assert_eq!(
            Error::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]).status(),
            400
        );
    }

    #[test]
    fn test_context_keeps_inner_status() {
        let err = Error::AlreadyExists {
            asset_type: "payment".into(),
            key: "p".into(),
        }
        .context("Failed to save generated asset for clause 'c1'");
        assert_eq!(err.status(), 409);
        assert!(err.is_client_error());
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to save generated asset"));
        assert!(msg.contains("payment 'p'"));
    }

    #[test]
    fn test_cycle_display() {
        let err = Error::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
    }
}
