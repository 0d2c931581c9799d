//! Program ID resolution from the Anchor workspace.
//!
//! After a successful build the program's real address lives in
//! `target/deploy/<program>-keypair.json`. The Solana CLI turns that keypair
//! into an address; `anchor keys list` is the fallback.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use scg_core::{extract_from_cli_output, ProgramId};
use tokio::process::Command;

use crate::error::BuildError;

/// Resolves program IDs using the Solana and Anchor CLIs.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    solana_bin: String,
    anchor_bin: String,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self {
            solana_bin: "solana".to_string(),
            anchor_bin: "anchor".to_string(),
        }
    }
}

impl KeyResolver {
    /// Use specific binaries (for non-PATH installs).
    pub fn with_binaries(solana_bin: impl Into<String>, anchor_bin: impl Into<String>) -> Self {
        Self {
            solana_bin: solana_bin.into(),
            anchor_bin: anchor_bin.into(),
        }
    }

    /// Find the deploy keypair for `program`.
    ///
    /// Prefers `<program>-keypair.json`; otherwise the most recently
    /// modified `*-keypair.json` under `target/deploy`.
    pub async fn find_keypair(
        &self,
        workspace: &Path,
        program: &str,
    ) -> Result<Option<PathBuf>, BuildError> {
        let deploy_dir = workspace.join("target").join("deploy");
        let mut entries = match tokio::fs::read_dir(&deploy_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(BuildError::File {
                    path: deploy_dir,
                    source,
                })
            }
        };

        let preferred = format!("{}-keypair.json", program);
        let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == preferred {
                return Ok(Some(entry.path()));
            }
            if name.ends_with("-keypair.json") {
                let modified = entry
                    .metadata()
                    .await
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                candidates.push((modified, entry.path()));
            }
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(candidates.into_iter().next().map(|(_, path)| path))
    }

    /// `solana address -k <keypair>`.
    pub async fn address_of(&self, keypair: &Path) -> Result<ProgramId, BuildError> {
        let output = Command::new(&self.solana_bin)
            .arg("address")
            .arg("-k")
            .arg(keypair)
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.solana_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                program: format!("{} address", self.solana_bin),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim().parse()?)
    }

    /// `anchor keys list` entry for `program`; other programs are ignored.
    pub async fn anchor_keys(
        &self,
        workspace: &Path,
        program: &str,
    ) -> Result<Option<ProgramId>, BuildError> {
        let output = Command::new(&self.anchor_bin)
            .args(["keys", "list"])
            .current_dir(workspace)
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.anchor_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let prefix = format!("{}:", program);
        let own_line = stdout.lines().find(|l| l.trim_start().starts_with(&prefix));

        Ok(own_line.and_then(extract_from_cli_output))
    }

    /// Resolve the program ID: keypair first, then `anchor keys list`.
    pub async fn resolve(
        &self,
        workspace: &Path,
        program: &str,
    ) -> Result<Option<ProgramId>, BuildError> {
        if let Some(keypair) = self.find_keypair(workspace, program).await? {
            tracing::debug!(keypair = %keypair.display(), "using program keypair");
            match self.address_of(&keypair).await {
                Ok(id) => return Ok(Some(id)),
                Err(e) => tracing::warn!(error = %e, "could not read keypair address"),
            }
        }

        match self.anchor_keys(workspace, program).await {
            Ok(id) => Ok(id),
            Err(e) => {
                tracing::warn!(error = %e, "anchor keys list failed");
                Ok(None)
            }
        }
    }
}
