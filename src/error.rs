use std::path::PathBuf;

use thiserror::Error;

/// The error taxonomy a pipeline stage can surface. Each variant maps
/// one-to-one to an error kind from the design notes; policy options
/// turn some of these into logged warnings instead (see `config.rs`).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("source file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported import in {parent}: `{raw}`")]
    UnsupportedImport { parent: String, raw: String },

    #[error("circular import detected: {chain}")]
    CircularImport { chain: String },

    #[error("LESS compiler error: {0}")]
    CompilerError(String),

    #[error("invalid cache file format at {path}: {reason}")]
    InvalidCacheFileFormat { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
