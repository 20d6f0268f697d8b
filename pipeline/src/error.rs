//! Error types for the file pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that stop the pipeline from starting or from running.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Watched root does not exist.
    #[error("directory not found: {0}")]
    RootNotFound(PathBuf),

    /// Watched root exists but is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A filename pattern failed to compile.
    #[error("invalid filename pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Notification subscription could not be established.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while moving a handled file to its destination.
///
/// Every variant is fatal to the run: the processor sets the abort signal
/// and stops dequeuing.
#[derive(Error, Debug)]
pub enum RelocationError {
    /// The destination path is already taken.
    #[error("File {} already exists", .0.display())]
    DestinationExists(PathBuf),

    /// The source path has no file name component.
    #[error("cannot determine file name for path: {}", .0.display())]
    MissingFileName(PathBuf),

    /// The rename itself failed.
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
