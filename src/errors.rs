use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TagsError>;

/// Errors that end a run.  Per-file problems are not represented here; they are
/// collected as `ParseError`s in the run summary so that the remaining files
/// still get indexed.
#[derive(Debug, Error)]
pub enum TagsError {
    /// Invalid or missing configuration.  Raised before any file is processed.
    #[error("configuration error: {0}")]
    Config(String),
    /// Reading the existing tagfile or writing the output failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Interrupted or timed out before all translation units were processed.
    #[error("run cancelled before completion")]
    Cancelled,
}

impl TagsError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> TagsError {
        TagsError::Io {
            path: path.into(),
            source,
        }
    }
}

/// One translation unit could not be processed by the front end.
#[derive(Clone, Debug, Error)]
#[error("failed to parse '{path}': {message}")]
pub struct ParseError {
    pub path: String,
    pub message: String,
}

impl ParseError {
    pub fn new(path: &str, message: impl Into<String>) -> ParseError {
        ParseError {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// The macro extractor failed for a file or is not available at all.
#[derive(Debug, Error)]
pub enum MacroExtractorError {
    #[error("macro extractor '{program}' could not be run: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("macro extractor exited with {status} for '{path}'")]
    Failed { path: String, status: String },
    #[error("cannot read '{path}' for macro extraction: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}
