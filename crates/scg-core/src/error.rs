//! Errors shared by the core types.

use std::path::PathBuf;

/// Errors raised while loading contract descriptions or parsing program IDs.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid contract description: {0}")]
    InvalidSpec(#[from] serde_json::Error),

    #[error("Invalid program ID {0:?}: expected 32-44 base58 characters")]
    InvalidProgramId(String),
}
