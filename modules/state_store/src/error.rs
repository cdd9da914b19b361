//! Store error type and its mapping into the indexer taxonomy

use rusqlite::ErrorCode;
use tessera_common::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{what} not found: {key}")]
    Missing { what: &'static str, key: String },

    /// A persisted value that no longer decodes (bad enum tag, bad hash)
    #[error("corrupt row: {0}")]
    Encoding(String),

    #[error("invalid filter column `{0}`")]
    BadFilterColumn(String),
}

impl StoreError {
    pub fn missing(what: &'static str, key: impl ToString) -> Self {
        StoreError::Missing {
            what,
            key: key.to_string(),
        }
    }

    pub fn encoding(err: impl std::fmt::Display) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> IndexError {
        match &err {
            // Lock contention is retried like any other transient I/O failure
            StoreError::Database(rusqlite::Error::SqliteFailure(ffi, _))
                if matches!(
                    ffi.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                IndexError::transient(err.to_string())
            }
            StoreError::Encoding(msg) => IndexError::corruption(msg.clone()),
            _ => IndexError::database(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
