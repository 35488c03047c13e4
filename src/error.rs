//! Unified error type for the crawldex library.
//!
//! Library code uses `IndexError` while the console binary continues using
//! `anyhow::Result` for convenience.
//!
//! # Error Categories
//!
//! - **Io**: File system operations (open, read, write)
//! - **Format**: Invalid shard file structure (bad header, impossible lengths)
//! - **Validation**: Invalid parameters or data (shard counts, section caps)
//! - **Overflow**: Numeric overflow or size limit exceeded

use std::fmt;
use std::path::PathBuf;

/// Unified error type for the crawldex library.
#[derive(Debug)]
pub enum IndexError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// Invalid file format (structure, impossible counts).
    Format { path: PathBuf, detail: String },

    /// Validation error (invalid parameters, data invariants).
    Validation(String),

    /// Numeric overflow or size limit exceeded.
    Overflow {
        context: String,
        limit: u64,
        actual: u64,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Io {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "I/O error during {} on '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            IndexError::Format { path, detail } => {
                write!(f, "Invalid format in '{}': {}", path.display(), detail)
            }
            IndexError::Validation(msg) => write!(f, "Validation error: {}", msg),
            IndexError::Overflow {
                context,
                limit,
                actual,
            } => {
                write!(
                    f,
                    "Overflow in {}: limit is {}, got {}",
                    context, limit, actual
                )
            }
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IndexError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io {
            path: PathBuf::new(),
            operation: "unknown",
            source: err,
        }
    }
}

/// Convenience type alias for Results using IndexError.
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Create a format error.
    pub fn format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        IndexError::Format {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        IndexError::Validation(msg.into())
    }

    /// Create an overflow error.
    pub fn overflow(context: impl Into<String>, limit: u64, actual: u64) -> Self {
        IndexError::Overflow {
            context: context.into(),
            limit,
            actual,
        }
    }
}
