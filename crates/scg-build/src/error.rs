use std::path::PathBuf;

use scg_core::CoreError;

/// Errors from toolchain interaction that are not themselves build failures.
///
/// A compiler error is a [`BuildResult`](crate::BuildResult) with
/// `passed == false`, not a `BuildError`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}
