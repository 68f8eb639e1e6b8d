use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {

    #[error("assertion failed for `{attribute}`: {message}")]
    AssertFailed { attribute: String, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("cannot connect to database `{database}`: {source}")]
    DbConnectFailed {
        database: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("query failed: {source} [{statement}]")]
    DbQueryFailed {
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("transaction failed and was rolled back: {0}")]
    TransactionFailed(#[source] Box<AppError>),

    #[error("ROLLBACK FAILED ({rollback}); data may be in an indeterminate state, operator intervention required. Original failure: {cause}")]
    RollbackFailed {
        cause: Box<AppError>,
        rollback: Box<AppError>,
    },

    #[error("schema mismatch on `{table}`: {}", .drift.join("; "))]
    SchemaMismatch { table: String, drift: Vec<String> },

    #[error("timed out after {waited:?} waiting for lock {path:?}")]
    LockTimeoutExceeded { path: PathBuf, waited: Duration },

    #[error("cannot lock {path:?}: {source}")]
    LockFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file access error on {path:?}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("class `{0}` is abstract")]
    ClassIsAbstract(String),

    #[error("method `{0}` is abstract")]
    MethodIsAbstract(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification matching the failure taxonomy callers program against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AssertFailed,
    InvalidArgument,
    RuntimeError,
    ObjectNotFound,
    DbConnectFailed,
    DbQueryFailed,
    TransactionFailed,
    SchemaMismatch,
    LockTimeoutExceeded,
    LockFailure,
    FileAccessError,
    ClassIsAbstract,
    MethodIsAbstract,
    Serialization,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::AssertFailed { .. }        => ErrorKind::AssertFailed,
            AppError::InvalidArgument(_)         => ErrorKind::InvalidArgument,
            AppError::RuntimeError(_)            => ErrorKind::RuntimeError,
            AppError::ObjectNotFound(_)          => ErrorKind::ObjectNotFound,
            AppError::DbConnectFailed { .. }     => ErrorKind::DbConnectFailed,
            AppError::DbQueryFailed { .. }       => ErrorKind::DbQueryFailed,
            AppError::TransactionFailed(_)       => ErrorKind::TransactionFailed,
            AppError::RollbackFailed { .. }      => ErrorKind::TransactionFailed,
            AppError::SchemaMismatch { .. }      => ErrorKind::SchemaMismatch,
            AppError::LockTimeoutExceeded { .. } => ErrorKind::LockTimeoutExceeded,
            AppError::LockFailure { .. }         => ErrorKind::LockFailure,
            AppError::FileAccess { .. }          => ErrorKind::FileAccessError,
            AppError::ClassIsAbstract(_)         => ErrorKind::ClassIsAbstract,
            AppError::MethodIsAbstract(_)        => ErrorKind::MethodIsAbstract,
            AppError::Serialization(_)           => ErrorKind::Serialization,
        }
    }

    pub fn assert_failed(attribute: &str, message: impl Into<String>) -> Self {
        AppError::AssertFailed { attribute: attribute.to_string(), message: message.into() }
    }

    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::FileAccess { path: path.into(), source }
    }

    /// True for the "gone away / can't connect" family that warrants a reconnect.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            AppError::DbConnectFailed { .. } => true,
            AppError::DbQueryFailed { source, .. } => is_lost_connection(source),
            _ => false,
        }
    }

    /// Innermost cause, unwrapping transaction wrappers.
    pub fn root_cause(&self) -> &AppError {
        match self {
            AppError::TransactionFailed(cause) => cause.root_cause(),
            AppError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

fn is_lost_connection(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase)
        }
        _ => false,
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Serialization(format!("yaml: {e}"))
    }
}

impl From<bincode::Error> for AppError {
    fn from(e: bincode::Error) -> Self {
        AppError::Serialization(format!("bincode: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_failure_is_a_transaction_failure_with_louder_message() {
        let cause = AppError::assert_failed("name", "value is required");
        let rollback = AppError::InvalidArgument("connection closed".into());
        let err = AppError::RollbackFailed { cause: Box::new(cause), rollback: Box::new(rollback) };
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert!(err.to_string().contains("ROLLBACK FAILED"));
        assert_eq!(err.root_cause().kind(), ErrorKind::AssertFailed);

        let rolled = AppError::TransactionFailed(Box::new(AppError::ObjectNotFound("x".into())));
        assert!(rolled.to_string().contains("rolled back"));
        assert!(!rolled.to_string().contains("ROLLBACK FAILED"));
    }

    #[test]
    fn cannot_open_counts_as_lost_connection() {
        let source = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        let err = AppError::DbQueryFailed { statement: "SELECT 1".into(), source };
        assert!(err.is_connection_lost());

        let source = rusqlite::Error::QueryReturnedNoRows;
        let err = AppError::DbQueryFailed { statement: "SELECT 1".into(), source };
        assert!(!err.is_connection_lost());
    }
}
