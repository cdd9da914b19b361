//! Error taxonomy for the indexer
//!
//! The sync controller decides retry-vs-exit from the variant: transient
//! failures are retried with backoff, everything else aborts the current
//! block transaction and surfaces to the operator.

use thiserror::Error;

/// Malformed or inconsistent data from the node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// **Cause**: a mandatory field is absent from the node's JSON
    #[error("missing mandatory field at {path}")]
    MissingField { path: String },

    /// **Cause**: a field is present but carries the wrong JSON type
    #[error("type mismatch at {path}: expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
    },

    /// **Cause**: a base58 hash fails its alphabet, length or prefix check
    #[error("malformed {what} `{value}`")]
    BadHash { what: &'static str, value: String },

    /// **Cause**: an RFC 3339 timestamp fails to parse
    #[error("malformed timestamp `{value}`")]
    BadTimestamp { value: String },

    /// **Cause**: an operation kind this protocol does not declare
    #[error("unknown operation kind `{kind}` at {path}")]
    UnknownOpKind { kind: String, path: String },

    /// **Cause**: block header does not chain onto the local head
    #[error("header mismatch at level {level}: {reason}")]
    HeaderMismatch { level: i64, reason: String },

    /// **Cause**: a ballot or proposal from a baker absent from the
    /// period's voter snapshot
    #[error("no voting snapshot for baker {baker} in period {period}")]
    MissingSnapshot { period: i32, baker: String },

    /// **Cause**: an operation status string outside the known set
    #[error("unknown operation status `{value}` at {path}")]
    UnknownStatus { value: String, path: String },

    /// **Cause**: a ballot names a proposal never pushed in this epoch
    #[error("ballot for unknown proposal {hash}")]
    UnknownProposal { hash: String },
}

/// Top-level failure classification (spec taxonomy: transient I/O,
/// validation, database, state corruption, unknown protocol)
#[derive(Debug, Error)]
pub enum IndexError {
    /// RPC timeout, 5xx, connection reset, database deadlock - retried
    #[error("transient: {message}")]
    Transient { message: String },

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("database: {message}")]
    Database { message: String },

    /// Invariant violation detected while or after committing - fatal
    #[error("state corruption: {message}")]
    Corruption { message: String },

    /// Block under a protocol hash not registered - requires a code update
    #[error("unknown protocol {hash}")]
    UnknownProtocol { hash: String },
}

impl IndexError {
    pub fn transient(message: impl Into<String>) -> Self {
        IndexError::Transient {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        IndexError::Database {
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        IndexError::Corruption {
            message: message.into(),
        }
    }

    /// Retry with backoff, or give up on this tick?
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Transient { .. })
    }

    /// Errors that must stop the writer entirely
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::Corruption { .. } | IndexError::UnknownProtocol { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_drives_retry_policy() {
        assert!(IndexError::transient("timeout").is_transient());
        assert!(!IndexError::database("locked").is_transient());
        assert!(IndexError::corruption("negative balance").is_fatal());
        assert!(!IndexError::Validation(ValidationError::MissingField {
            path: "header.level".into()
        })
        .is_fatal());
    }
}
