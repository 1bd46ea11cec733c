use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Transient backend failure. The message is surfaced verbatim so callers
    /// see exactly what the backend reported after retries are exhausted.
    #[error("{0}")]
    Backend(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Session pool is closed")]
    PoolClosed,

    #[error("Unknown prepared statement id {0}")]
    UnknownStatement(u32),

    #[error("Wrong number of arguments: expected {expected}, got {got}")]
    ArgCountMismatch { expected: usize, got: usize },

    #[error("Unsupported argument type at position {position}")]
    UnsupportedArgType { position: usize },

    #[error("Access denied for user '{0}'")]
    AuthFailed(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Database '{0}' already exists")]
    DatabaseExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl DbError {
    /// Whether a bounded retry may succeed where this attempt failed.
    ///
    /// Configuration mistakes (unknown scheme, malformed URI) and state errors
    /// never heal by waiting, so they are reported on the first attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::IoError(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
