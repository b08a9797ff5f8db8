use std::fmt;

/// Result type for cortex-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Store layer error
    Store(cortex_store::Error),

    /// Engine layer error
    Engine(cortex_engine::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// A bounded operation exceeded its budget
    Timeout(String),

    /// Policy refused the operation (override setter, session context)
    Forbidden(String),

    /// Invalid operation or state
    InvalidOperation(String),

    /// Internal invariant violated
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Engine(err) => write!(f, "Engine error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Engine(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<cortex_store::Error> for Error {
    fn from(err: cortex_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<cortex_engine::Error> for Error {
    fn from(err: cortex_engine::Error) -> Self {
        Error::Engine(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Stable machine-readable code for tool `details` payloads
    pub fn code(&self) -> &'static str {
        match self {
            Error::Store(err) => err.code(),
            Error::Engine(_) => "engine_error",
            Error::Io(_) => "io_error",
            Error::Config(_) => "config_error",
            Error::Timeout(_) => "timeout",
            Error::Forbidden(_) => "forbidden",
            Error::InvalidOperation(_) => "invalid_operation",
            Error::Internal(_) => "internal_error",
        }
    }
}
