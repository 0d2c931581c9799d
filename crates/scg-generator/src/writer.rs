//! Persists generated programs into the Anchor workspace.

use std::path::{Path, PathBuf};

use crate::GeneratorError;

/// What a write did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// The primary file was (re)written
    pub written: bool,
    /// The primary file already held this content
    pub unchanged: bool,
    /// Mirror paths that were updated
    pub mirrored: Vec<PathBuf>,
}

/// Writes program source to a fixed path plus optional mirrors.
#[derive(Debug, Clone)]
pub struct FileWriter {
    target: PathBuf,
    mirrors: Vec<PathBuf>,
}

impl FileWriter {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            mirrors: Vec::new(),
        }
    }

    pub fn with_mirrors(mut self, mirrors: impl IntoIterator<Item = PathBuf>) -> Self {
        self.mirrors.extend(mirrors);
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Write `code`, skipping files whose content already matches.
    pub async fn write(&self, code: &str) -> Result<WriteOutcome, GeneratorError> {
        let content = normalize(code);

        let written = write_if_changed(&self.target, &content).await?;
        let mut outcome = WriteOutcome {
            written,
            unchanged: !written,
            mirrored: Vec::new(),
        };

        for mirror in &self.mirrors {
            if write_if_changed(mirror, &content).await? {
                outcome.mirrored.push(mirror.clone());
            }
        }

        if written {
            tracing::info!(path = %self.target.display(), lines = content.lines().count(), "wrote program source");
        } else {
            tracing::debug!(path = %self.target.display(), "program source unchanged");
        }

        Ok(outcome)
    }

    /// Current content of the primary file, if present.
    pub async fn read(&self) -> Result<Option<String>, GeneratorError> {
        match tokio::fs::read_to_string(&self.target).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(GeneratorError::File {
                path: self.target.clone(),
                source,
            }),
        }
    }
}

fn normalize(code: &str) -> String {
    let mut content = code.trim_end().to_string();
    content.push('\n');
    content
}

async fn write_if_changed(path: &Path, content: &str) -> Result<bool, GeneratorError> {
    let file_error = |source: std::io::Error| GeneratorError::File {
        path: path.to_path_buf(),
        source,
    };

    match tokio::fs::read_to_string(path).await {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(file_error(e)),
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(file_error)?;
    }
    tokio::fs::write(path, content).await.map_err(file_error)?;
    Ok(true)
}
