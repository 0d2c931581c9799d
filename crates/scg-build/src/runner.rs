//! Build runner.
//!
//! Runs `anchor build` (or `cargo build-sbf`) in the Anchor workspace and
//! captures its output. A quick `syn` parse runs first so that truncated or
//! non-Rust model output never costs a toolchain invocation.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::result::BuildResult;

/// Stage name used for the pre-build parse.
pub const SYNTAX_STAGE: &str = "syn";

/// External build command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTool {
    /// `anchor build`
    Anchor,
    /// `cargo build-sbf`
    CargoSbf,
    /// Any other command, run in the workspace directory
    Custom { program: String, args: Vec<String> },
}

impl BuildTool {
    pub fn program(&self) -> &str {
        match self {
            BuildTool::Anchor => "anchor",
            BuildTool::CargoSbf => "cargo",
            BuildTool::Custom { program, .. } => program,
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            BuildTool::Anchor => vec!["build".to_string()],
            BuildTool::CargoSbf => vec!["build-sbf".to_string()],
            BuildTool::Custom { args, .. } => args.clone(),
        }
    }

    /// Display name, e.g. `anchor build`.
    pub fn name(&self) -> String {
        let mut name = self.program().to_string();
        for arg in self.args() {
            name.push(' ');
            name.push_str(&arg);
        }
        name
    }

    /// Parse `anchor`, `cargo-sbf`/`build-sbf`, or a whitespace-separated command line.
    pub fn parse(s: &str) -> Option<BuildTool> {
        match s.trim() {
            "" => None,
            "anchor" | "anchor build" => Some(BuildTool::Anchor),
            "sbf" | "cargo-sbf" | "build-sbf" | "cargo build-sbf" => Some(BuildTool::CargoSbf),
            other => {
                let mut parts = other.split_whitespace().map(str::to_string);
                let program = parts.next()?;
                Some(BuildTool::Custom {
                    program,
                    args: parts.collect(),
                })
            }
        }
    }
}

/// Something that can build the Anchor workspace.
///
/// The retry loop is generic over this so it can run against a real
/// toolchain or a scripted one.
pub trait ProgramBuilder {
    fn build(&self, project_dir: &Path) -> impl Future<Output = BuildResult> + Send;
}

/// Builds by spawning a [`BuildTool`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    tool: BuildTool,
    timeout: Duration,
}

impl CommandBuilder {
    pub fn new(tool: BuildTool, timeout: Duration) -> Self {
        Self { tool, timeout }
    }
}

impl ProgramBuilder for CommandBuilder {
    async fn build(&self, project_dir: &Path) -> BuildResult {
        run(&self.tool, project_dir, self.timeout).await
    }
}

/// Run a build tool in `project_dir`.
pub async fn run(tool: &BuildTool, project_dir: &Path, timeout: Duration) -> BuildResult {
    let start = Instant::now();
    let stage = tool.name();

    tracing::debug!(tool = %stage, dir = %project_dir.display(), "running build");

    let result = tokio::time::timeout(
        timeout,
        Command::new(tool.program())
            .args(tool.args())
            .current_dir(project_dir)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let duration = start.elapsed();

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{}\n{}", stdout, stderr);

            if output.status.success() {
                BuildResult::pass_with_output(stage, duration, combined)
            } else {
                let error = extract_build_error(&stderr, &stdout);
                BuildResult::fail(stage, error, duration, combined)
            }
        }
        Ok(Err(e)) => BuildResult::fail(
            stage,
            format!("Failed to run {}: {}", tool.program(), e),
            duration,
            String::new(),
        ),
        Err(_) => BuildResult::fail(
            stage,
            format!("Timeout after {:?}", timeout),
            duration,
            String::new(),
        ),
    }
}

/// Parse source with `syn` before handing it to the toolchain.
pub fn syntax_check(code: &str) -> BuildResult {
    let start = Instant::now();

    if code.trim().is_empty() {
        return BuildResult::fail(SYNTAX_STAGE, "error: empty source", start.elapsed(), String::new());
    }

    match syn::parse_file(code) {
        Ok(_) => BuildResult::pass(SYNTAX_STAGE, start.elapsed()),
        Err(e) => {
            let error = format!("error: source does not parse as Rust: {}", e);
            BuildResult::fail(SYNTAX_STAGE, error.clone(), start.elapsed(), error)
        }
    }
}

/// Extract the first error line from build output.
///
/// Anchor prints some failures (missing IDL feature, toolchain problems) on
/// stdout, so stdout is searched after stderr.
fn extract_build_error(stderr: &str, stdout: &str) -> String {
    for line in stderr.lines().chain(stdout.lines()) {
        if line.starts_with("error[E") || line.starts_with("error:") || line.starts_with("Error:") {
            return line.to_string();
        }
    }

    stderr
        .lines()
        .chain(stdout.lines())
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error() {
        let stderr = r#"
   Compiling deploy v0.1.0
error[E0382]: borrow of moved value: `x`
  --> src/lib.rs:10:5
"#;
        let error = extract_build_error(stderr, "");
        assert!(error.contains("E0382"));
    }

    #[test]
    fn test_extract_error_from_stdout() {
        let stdout = "Error: `idl-build` feature is missing. To solve, add\n";
        let error = extract_build_error("", stdout);
        assert!(error.contains("idl-build"));
    }

    #[test]
    fn test_tool_parse_and_name() {
        assert_eq!(BuildTool::parse("anchor"), Some(BuildTool::Anchor));
        assert_eq!(BuildTool::parse("cargo build-sbf"), Some(BuildTool::CargoSbf));
        assert_eq!(BuildTool::Anchor.name(), "anchor build");
        assert_eq!(BuildTool::CargoSbf.name(), "cargo build-sbf");

        let custom = BuildTool::parse("make program").unwrap();
        assert_eq!(custom.program(), "make");
        assert_eq!(custom.args(), vec!["program".to_string()]);
        assert_eq!(BuildTool::parse("   "), None);
    }

    #[test]
    fn test_syntax_check() {
        let good = r#"
use anchor_lang::prelude::*;

declare_id!("11111111111111111111111111111111");

#[program]
pub mod escrow {
    use super::*;
    pub fn initialize(_ctx: Context<Initialize>) -> Result<()> {
        Ok(())
    }
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(init, payer = user, space = 8 + 32)]
    pub state: Account<'info, State>,
    #[account(mut)]
    pub user: Signer<'info>,
    pub system_program: Program<'info, System>,
}
"#;
        assert!(syntax_check(good).passed);

        let truncated = "pub mod escrow {\n    pub fn initialize(";
        let result = syntax_check(truncated);
        assert!(!result.passed);
        assert_eq!(result.stage, SYNTAX_STAGE);

        assert!(!syntax_check("   ").passed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BuildTool::Custom {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'Compiling'; echo 'error[E0308]: mismatched types' >&2; exit 101".to_string(),
            ],
        };

        let result = run(&tool, dir.path(), Duration::from_secs(10)).await;
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("error[E0308]: mismatched types"));
        assert!(result.output.contains("Compiling"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_passes() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandBuilder::new(
            BuildTool::Custom {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo built".to_string()],
            },
            Duration::from_secs(10),
        );

        let result = builder.build(dir.path()).await;
        assert!(result.passed);
        assert!(result.output.contains("built"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BuildTool::Custom {
            program: "sleep".to_string(),
            args: vec!["5".to_string()],
        };

        let result = run(&tool, dir.path(), Duration::from_millis(100)).await;
        assert!(!result.passed);
        assert!(result.error.unwrap().starts_with("Timeout"));
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BuildTool::Custom {
            program: "definitely-not-a-real-build-tool".to_string(),
            args: vec![],
        };

        let result = run(&tool, dir.path(), Duration::from_secs(5)).await;
        assert!(!result.passed);
        assert!(result.error.unwrap().starts_with("Failed to run"));
    }
}
