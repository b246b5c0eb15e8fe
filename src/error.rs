use crate::reading::EntryId;

/// Why a log entry could not be turned into a [`crate::reading::Reading`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not an integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("reading {0} is outside the smallint range [-32768, 32767]")]
    ReadingOutOfRange(i64),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Uniqueness or primary-key violation raised by the bulk copy.
    #[error("unique violation: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl SinkError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                SinkError::Conflict(db.message().to_string())
            }
            _ => SinkError::Database(err),
        }
    }
}

/// Errors that stop the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("malformed entry {position}: {source}")]
    Parse {
        position: EntryId,
        #[source]
        source: ParseError,
    },
    #[error("log client error: {0}")]
    Log(#[from] redis::RedisError),
    #[error("sink error: {0}")]
    Sink(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_conflicts() {
        let err = SinkError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, SinkError::Database(sqlx::Error::PoolTimedOut)));
    }

    #[test]
    fn parse_error_names_the_entry() {
        let err = WorkerError::Parse {
            position: EntryId::from("1700000000000-3"),
            source: ParseError::MissingField("reading"),
        };
        assert_eq!(
            err.to_string(),
            "malformed entry 1700000000000-3: missing field `reading`"
        );
    }
}
