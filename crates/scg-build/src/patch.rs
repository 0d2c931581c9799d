//! Deterministic fixes for classified build failures.
//!
//! Every patch is idempotent: applying it to already-patched text returns the
//! text unchanged. A patch that changes nothing is not reported as applied,
//! which is how the retry loop knows to fall back to the model.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use scg_core::{replace_declared_id, ProgramId};

use crate::classify::{Diagnosis, ErrorClass};
use crate::error::BuildError;

/// A mechanical rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch {
    /// `Account<'info, T>` fields become `Box<Account<'info, T>>`
    BoxAccounts,
    /// `idl-build` feature added to the program manifest
    EnableIdlBuild,
    /// `[workspace.resolver]` table folded into `resolver = "2"`
    WorkspaceResolver,
    /// `declare_id!` rewritten to the keypair address
    SyncDeclaredId,
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Patch::BoxAccounts => "box-accounts",
            Patch::EnableIdlBuild => "enable-idl-build",
            Patch::WorkspaceResolver => "workspace-resolver",
            Patch::SyncDeclaredId => "sync-declared-id",
        };
        f.write_str(name)
    }
}

/// Paths of the files patches may touch.
#[derive(Debug, Clone)]
pub struct ProjectFiles {
    /// `programs/<name>/src/lib.rs`
    pub source: PathBuf,
    /// `programs/<name>/Cargo.toml`
    pub program_manifest: PathBuf,
    /// Workspace `Cargo.toml`
    pub workspace_manifest: PathBuf,
}

impl ProjectFiles {
    /// Standard Anchor layout for `program` inside `workspace`.
    pub fn anchor_layout(workspace: &Path, program: &str) -> Self {
        let program_dir = workspace.join("programs").join(program);
        Self {
            source: program_dir.join("src").join("lib.rs"),
            program_manifest: program_dir.join("Cargo.toml"),
            workspace_manifest: workspace.join("Cargo.toml"),
        }
    }
}

fn account_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<pre>:\s*)(?P<boxed>Box<\s*)?\bAccount<'info,\s*(?P<ty>[A-Za-z0-9_:]+)\s*>")
            .unwrap()
    })
}

fn accounts_derive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\[derive\([^)]*\bAccounts\b[^)]*\)\]").unwrap())
}

/// Byte ranges of the bodies of `#[derive(Accounts)]` structs.
fn accounts_struct_bodies(code: &str) -> Vec<Range<usize>> {
    let mut bodies = Vec::new();

    for derive in accounts_derive_regex().find_iter(code) {
        let rest = &code[derive.end()..];
        let Some(open) = rest
            .find("struct")
            .and_then(|at| rest[at..].find('{').map(|brace| at + brace))
        else {
            continue;
        };

        let start = derive.end() + open + 1;
        let mut depth = 1usize;
        for (i, c) in code[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        bodies.push(start..start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    bodies
}

/// Box every `Account<'info, T>` field of `#[derive(Accounts)]` structs.
///
/// Function signatures and other structs are left alone.
pub fn box_large_accounts(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut last = 0;

    for body in accounts_struct_bodies(code) {
        out.push_str(&code[last..body.start]);
        let fields = account_field_regex().replace_all(&code[body.clone()], |caps: &Captures| {
            if caps.name("boxed").is_some() {
                caps[0].to_string()
            } else {
                format!("{}Box<Account<'info, {}>>", &caps["pre"], &caps["ty"])
            }
        });
        out.push_str(&fields);
        last = body.end;
    }

    out.push_str(&code[last..]);
    out
}

/// Add the `idl-build` feature to a program manifest.
pub fn enable_idl_build(manifest: &str) -> String {
    let already = manifest
        .lines()
        .any(|l| l.trim_start().starts_with("idl-build") && l.contains('='));
    if already {
        return manifest.to_string();
    }

    let mut features = vec!["\"anchor-lang/idl-build\""];
    if manifest.contains("anchor-spl") {
        features.push("\"anchor-spl/idl-build\"");
    }
    let feature_line = format!("idl-build = [{}]", features.join(", "));

    let mut lines: Vec<String> = manifest.lines().map(str::to_string).collect();
    match lines.iter().position(|l| l.trim() == "[features]") {
        Some(header) => lines.insert(header + 1, feature_line),
        None => {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push("[features]".to_string());
            lines.push(feature_line);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Fold a stray `[workspace.resolver]` table into `resolver = "2"`.
///
/// Manifests without a `[workspace]` table are returned unchanged.
pub fn ensure_workspace_resolver(manifest: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_stray_table = false;

    for line in manifest.lines() {
        let trimmed = line.trim();
        if trimmed == "[workspace.resolver]" {
            in_stray_table = true;
            continue;
        }
        if in_stray_table {
            if trimmed.starts_with('[') {
                in_stray_table = false;
            } else {
                // Drop the table's keys (and the blank line closing it)
                continue;
            }
        }
        lines.push(line);
    }

    let Some(header) = lines.iter().position(|l| l.trim() == "[workspace]") else {
        return manifest.to_string();
    };

    let section_end = lines[header + 1..]
        .iter()
        .position(|l| l.trim_start().starts_with('['))
        .map(|i| header + 1 + i)
        .unwrap_or(lines.len());
    let has_resolver = lines[header + 1..section_end]
        .iter()
        .any(|l| l.trim_start().starts_with("resolver"));

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    if !has_resolver {
        out.insert(header + 1, "resolver = \"2\"".to_string());
    }

    let mut text = out.join("\n");
    if manifest.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Point `declare_id!` at `id`.
pub fn sync_declared_id(code: &str, id: &ProgramId) -> String {
    replace_declared_id(code, id)
}

/// Apply every patch that addresses `diagnoses`.
///
/// Returns the patches that actually changed a file. Missing files are
/// skipped. `program_id` is needed for [`ErrorClass::DeclaredIdMismatch`].
pub async fn apply(
    diagnoses: &[Diagnosis],
    files: &ProjectFiles,
    program_id: Option<&ProgramId>,
) -> Result<Vec<Patch>, BuildError> {
    let mut applied = Vec::new();

    for diagnosis in diagnoses {
        let patched = match diagnosis.class {
            ErrorClass::StackOverflow => {
                rewrite(&files.source, box_large_accounts).await?.then_some(Patch::BoxAccounts)
            }
            ErrorClass::MissingIdlBuild => rewrite(&files.program_manifest, enable_idl_build)
                .await?
                .then_some(Patch::EnableIdlBuild),
            ErrorClass::DeclaredIdMismatch => match program_id {
                Some(id) => rewrite(&files.source, |code| sync_declared_id(code, id))
                    .await?
                    .then_some(Patch::SyncDeclaredId),
                None => None,
            },
            _ => None,
        };

        if let Some(patch) = patched {
            tracing::info!(%patch, class = %diagnosis.class, "applied patch");
            applied.push(patch);
        }
    }

    Ok(applied)
}

/// Normalize the workspace manifest before building.
pub async fn prepare_workspace(files: &ProjectFiles) -> Result<Option<Patch>, BuildError> {
    Ok(rewrite(&files.workspace_manifest, ensure_workspace_resolver)
        .await?
        .then_some(Patch::WorkspaceResolver))
}

/// Rewrite a file in place; `Ok(false)` if missing or unchanged.
async fn rewrite<F>(path: &Path, transform: F) -> Result<bool, BuildError>
where
    F: FnOnce(&str) -> String,
{
    let original = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "patch target missing");
            return Ok(false);
        }
        Err(source) => {
            return Err(BuildError::File {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let patched = transform(&original);
    if patched == original {
        return Ok(false);
    }

    tokio::fs::write(path, patched)
        .await
        .map_err(|source| BuildError::File {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    const ACCOUNTS: &str = r#"#[derive(Accounts)]
pub struct Withdraw<'info> {
    #[account(mut, has_one = beneficiary)]
    pub vesting: Account<'info, VestingAccount>,
    pub config: Box<Account<'info, Config>>,
    pub mint: InterfaceAccount<'info, Mint>,
    #[account(mut)]
    pub beneficiary: Signer<'info>,
}

fn helper(v: &Account<'_, VestingAccount>) {}

pub fn release<'info>(vault: Account<'info, Vault>) -> Result<()> {
    Ok(())
}

pub struct Snapshot<'info> {
    pub vault: Account<'info, Vault>,
}

#[derive(Accounts)]
#[instruction(amount: u64)]
pub struct Deposit<'info> {
    pub vault: Account<'info, Vault>,
}
"#;

    #[test]
    fn test_box_large_accounts() {
        let patched = box_large_accounts(ACCOUNTS);

        assert!(patched.contains("pub vesting: Box<Account<'info, VestingAccount>>,"));
        assert!(patched.contains("pub config: Box<Account<'info, Config>>,"));
        assert!(!patched.contains("Box<Box<"));
        assert!(patched.contains("pub mint: InterfaceAccount<'info, Mint>,"));
        assert!(patched.contains("fn helper(v: &Account<'_, VestingAccount>)"));
        assert!(patched.contains("pub fn release<'info>(vault: Account<'info, Vault>)"));
        assert!(patched.contains("pub struct Snapshot<'info> {\n    pub vault: Account<'info, Vault>,"));
        assert!(patched.contains("pub struct Deposit<'info> {\n    pub vault: Box<Account<'info, Vault>>,"));

        assert_eq!(box_large_accounts(&patched), patched);
    }

    #[test]
    fn test_enable_idl_build_existing_features() {
        let manifest = r#"[package]
name = "deploy"

[features]
no-entrypoint = []
cpi = ["no-entrypoint"]

[dependencies]
anchor-lang = "0.30.1"
anchor-spl = "0.30.1"
"#;
        let patched = enable_idl_build(manifest);
        let lines: Vec<&str> = patched.lines().collect();
        let header = lines.iter().position(|l| *l == "[features]").unwrap();
        assert_eq!(
            lines[header + 1],
            r#"idl-build = ["anchor-lang/idl-build", "anchor-spl/idl-build"]"#
        );
        assert_eq!(enable_idl_build(&patched), patched);
    }

    #[test]
    fn test_enable_idl_build_adds_section() {
        let manifest = "[package]\nname = \"deploy\"\n\n[dependencies]\nanchor-lang = \"0.30.1\"\n";
        let patched = enable_idl_build(manifest);
        assert!(patched.ends_with("[features]\nidl-build = [\"anchor-lang/idl-build\"]\n"));
    }

    #[test]
    fn test_workspace_resolver() {
        let manifest = "[workspace]\nmembers = [\n    \"programs/*\"\n]\n\n[workspace.resolver]\nversion = \"2\"\n\n[profile.release]\noverflow-checks = true\n";
        let patched = ensure_workspace_resolver(manifest);

        assert!(!patched.contains("[workspace.resolver]"));
        assert!(patched.starts_with("[workspace]\nresolver = \"2\"\nmembers"));
        assert!(patched.contains("[profile.release]\noverflow-checks = true"));
        assert_eq!(ensure_workspace_resolver(&patched), patched);
    }

    #[test]
    fn test_workspace_resolver_leaves_valid_manifest() {
        let manifest = "[workspace]\nmembers = [\"programs/*\"]\nresolver = \"2\"\n";
        assert_eq!(ensure_workspace_resolver(manifest), manifest);

        let package_only = "[package]\nname = \"x\"\n";
        assert_eq!(ensure_workspace_resolver(package_only), package_only);
    }

    #[tokio::test]
    async fn test_apply_patches_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = ProjectFiles::anchor_layout(dir.path(), "deploy");
        std::fs::create_dir_all(files.source.parent().unwrap()).unwrap();
        std::fs::write(&files.source, ACCOUNTS).unwrap();
        std::fs::write(&files.program_manifest, "[package]\nname = \"deploy\"\n").unwrap();

        let output = "Error: `idl-build` feature is missing. To solve, add\n\
                      Error: Function foo Stack offset of 4424 exceeded max offset of 4096 by 328 bytes\n\
                      error[E0382]: borrow of moved value: `x`\n";
        let diagnoses = classify(output);
        assert_eq!(diagnoses.len(), 3);

        let applied = apply(&diagnoses, &files, None).await.unwrap();
        assert_eq!(applied, vec![Patch::EnableIdlBuild, Patch::BoxAccounts]);

        let source = std::fs::read_to_string(&files.source).unwrap();
        assert!(source.contains("Box<Account<'info, VestingAccount>>"));

        // Second application changes nothing
        let again = apply(&diagnoses, &files, None).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_apply_sync_declared_id() {
        let dir = tempfile::tempdir().unwrap();
        let files = ProjectFiles::anchor_layout(dir.path(), "deploy");
        std::fs::create_dir_all(files.source.parent().unwrap()).unwrap();
        std::fs::write(
            &files.source,
            "use anchor_lang::prelude::*;\ndeclare_id!(\"11111111111111111111111111111111\");\n",
        )
        .unwrap();

        let id: ProgramId = "8a76RhBfP78tuN2WtZaP11ESgeCStcfb9E78Pf9wz4Yg".parse().unwrap();
        let diagnoses = classify("Error Code: DeclaredProgramIdMismatch");

        assert!(apply(&diagnoses, &files, None).await.unwrap().is_empty());
        let applied = apply(&diagnoses, &files, Some(&id)).await.unwrap();
        assert_eq!(applied, vec![Patch::SyncDeclaredId]);

        let source = std::fs::read_to_string(&files.source).unwrap();
        assert!(source.contains("8a76RhBfP78tuN2WtZaP11ESgeCStcfb9E78Pf9wz4Yg"));
    }

    #[tokio::test]
    async fn test_missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let files = ProjectFiles::anchor_layout(dir.path(), "deploy");
        let diagnoses = classify("Error: `idl-build` feature is missing.");

        assert!(apply(&diagnoses, &files, None).await.unwrap().is_empty());
        assert!(prepare_workspace(&files).await.unwrap().is_none());
    }
}
