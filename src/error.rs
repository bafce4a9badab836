//! Error types for archive rewriting.
//!
//! Every failure aborts the whole run: there is no partial or best-effort
//! output, so callers only need to discard the output on `Err`.

use thiserror::Error;

/// Error type for all apkzip operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or inconsistent ZIP structure.
    ///
    /// `entry` is the 1-based Central Directory record index and `offset` the
    /// absolute file offset of the offending structure, when known.
    #[error("Malformed ZIP: {message}{}", location(.entry, .offset))]
    Format {
        message: String,
        entry: Option<usize>,
        offset: Option<u64>,
    },

    /// A byte range request fell outside its source, or overflowed.
    #[error("Byte range out of bounds: offset {offset}, size {size}, source size {source_size}")]
    Range {
        offset: u64,
        size: u64,
        source_size: u64,
    },

    /// Entry data uses a compression method other than STORED or DEFLATE.
    #[error("Unsupported compression method {method} for entry {name}")]
    UnsupportedCompression { name: String, method: u16 },

    /// The output size alignment loop did not settle.
    #[error("Output size alignment did not converge after {attempts} attempts")]
    Convergence { attempts: usize },

    /// Failure reported by the signing engine.
    #[error("Signing engine error: {0:#}")]
    Engine(#[source] anyhow::Error),

    /// Underlying storage failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::Format {
            message: message.into(),
            entry: None,
            offset: None,
        }
    }

    pub(crate) fn format_at(message: impl Into<String>, entry: Option<usize>, offset: u64) -> Self {
        Error::Format {
            message: message.into(),
            entry,
            offset: Some(offset),
        }
    }

    /// Attach a 1-based Central Directory record index to a format error.
    pub(crate) fn with_entry(self, index: usize) -> Self {
        match self {
            Error::Format {
                message,
                entry: None,
                offset,
            } => Error::Format {
                message,
                entry: Some(index),
                offset,
            },
            other => other,
        }
    }

    /// Returns `true` for [`Error::Format`].
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format { .. })
    }
}

fn location(entry: &Option<usize>, offset: &Option<u64>) -> String {
    match (entry, offset) {
        (Some(entry), Some(offset)) => format!(" (record #{entry} at offset {offset})"),
        (Some(entry), None) => format!(" (record #{entry})"),
        (None, Some(offset)) => format!(" (at offset {offset})"),
        (None, None) => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
