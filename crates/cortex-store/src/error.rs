use std::fmt;

/// Result type for cortex-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the store layer
#[derive(Debug)]
pub enum Error {
    /// Bad argument or out-of-range value
    Validation(String),

    /// Entity does not exist
    NotFound(String),

    /// Uniqueness violation
    Conflict(String),

    /// Write refused by retention policy
    RetentionLocked(String),

    /// Store (or an optional backend such as embeddings) is not reachable
    Unavailable(String),

    /// Database operation failed
    Database(rusqlite::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// JSON (de)serialization of a column payload failed
    Serde(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::RetentionLocked(msg) => write!(f, "Retention locked: {}", msg),
            Error::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Serde(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}

impl Error {
    /// Stable machine-readable code for tool `details` payloads
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::RetentionLocked(_) => "retention_locked",
            Error::Unavailable(_) => "unavailable",
            Error::Database(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serde(_) => "serde_error",
        }
    }
}
