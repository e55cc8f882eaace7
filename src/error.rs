//! Error types
//!
//! Every failure a traversal can hit is scoped to something: a subtree
//! (listing), a job (read/transfer/callback), or a single line (parse).
//! Scoped failures are values delivered to the consumer, never panics and
//! never log-only events.

use std::io::Error as IoError;
use thiserror::Error;

/// What went wrong, independent of where
#[derive(Error, Debug)]
pub enum WalkErrorKind {
    /// Store listing call failed; the subtree under the prefix is abandoned
    #[error("listing failed: {0}")]
    Listing(#[source] IoError),

    /// Opening or reading a source object failed
    #[error("read failed: {0}")]
    Read(#[source] IoError),

    /// Open/copy/compress/close failure while mirroring an object
    #[error("transfer failed: {0}")]
    Transfer(#[source] IoError),

    /// A line is not valid JSON (or could not be re-serialized)
    #[error("invalid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// The consumer rejected a delivery
    #[error("consumer rejected delivery: {0}")]
    Callback(#[source] CallbackError),
}

impl WalkErrorKind {
    /// Short stable name, used as a counter key in summaries and logs
    pub fn name(&self) -> &'static str {
        match self {
            WalkErrorKind::Listing(_) => "listing",
            WalkErrorKind::Read(_) => "read",
            WalkErrorKind::Transfer(_) => "transfer",
            WalkErrorKind::Parse(_) => "parse",
            WalkErrorKind::Callback(_) => "callback",
        }
    }
}

/// A failure at a path, optionally scoped to one line of that path
///
/// `line_number` is 0 when the error is not line-scoped.
#[derive(Error, Debug)]
#[error("[{path}] line {line_number}, {kind}")]
pub struct WalkError {
    pub path: String,
    pub line_number: u64,
    #[source]
    pub kind: WalkErrorKind,
}

impl WalkError {
    pub fn new(path: impl Into<String>, kind: WalkErrorKind) -> Self {
        WalkError {
            path: path.into(),
            line_number: 0,
            kind,
        }
    }

    pub fn at_line(path: impl Into<String>, line_number: u64, kind: WalkErrorKind) -> Self {
        WalkError {
            path: path.into(),
            line_number,
            kind,
        }
    }

    pub fn listing(prefix: impl Into<String>, err: IoError) -> Self {
        Self::new(prefix, WalkErrorKind::Listing(err))
    }

    pub fn transfer(key: impl Into<String>, err: IoError) -> Self {
        Self::new(key, WalkErrorKind::Transfer(err))
    }

    pub fn is_line_scoped(&self) -> bool {
        self.line_number > 0
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Returned by a consumer callback to reject a delivery
///
/// Rejection stops the job that produced the delivery; sibling jobs keep
/// running unless the operation is fail-fast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        CallbackError(message.into())
    }
}

impl From<IoError> for CallbackError {
    fn from(e: IoError) -> Self {
        CallbackError(e.to_string())
    }
}

/// Configuration errors, raised before any traversal starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    #[error("Invalid channel capacity {0}: must be at least 1")]
    InvalidChannelCapacity(usize),

    #[error("Invalid query '{spec}': expected {{PATH}}={{REGEXP}}")]
    InvalidQuery { spec: String },

    #[error("Invalid query pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid query mode '{0}': expected ALL or ANY")]
    InvalidQueryMode(String),

    #[error("Unknown store type '{0}'")]
    UnknownStoreType(String),

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] IoError),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
