//! SQLite source error types.

use rowfeed_core::SourceError;
use thiserror::Error;

/// SQLite source errors.
#[derive(Debug, Error)]
pub enum Error {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Table name is not a plain identifier.
    #[error("invalid table name: {0}")]
    InvalidTable(String),

    /// A column held a value that cannot be mapped to a record.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// The blocking query task did not complete.
    #[error("query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<Error> for SourceError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                SourceError::Unavailable(err.to_string())
            }
            Error::Sqlite(_) | Error::InvalidTable(_) => SourceError::Query(err.to_string()),
            Error::InvalidRow(_) => SourceError::Decode(err.to_string()),
            Error::Task(_) => SourceError::Unavailable(err.to_string()),
        }
    }
}
