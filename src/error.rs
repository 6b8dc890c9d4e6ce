//! Error types for corpus loading, configuration and persistence
//!
//! None of these reach the caller of `resolve` or `route`: the index builder
//! and the learning loop log them and carry on with what they have.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("corpus directory {} unreadable: {reason}", .path.display())]
    CorpusUnreadable { path: PathBuf, reason: String },

    #[error("malformed intent record in {}: {reason}", .path.display())]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("pattern {pattern:?} for intent {tag} failed to compile: {reason}")]
    PatternCompile {
        tag: String,
        pattern: String,
        reason: String,
    },

    #[error("persistence failed: {reason}")]
    Persistence { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type ResolverResult<T> = Result<T, ResolverError>;
