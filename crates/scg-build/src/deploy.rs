//! Deploy runner.
//!
//! Runs `anchor deploy` or a deployment script, answering `y` to the
//! interactive confirmations those tools print (airdrop offers, "Continue?").

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scg_core::{extract_from_cli_output, ProgramId};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};

use crate::error::BuildError;
use crate::keys::KeyResolver;
use crate::runner::ProgramBuilder;

/// Substrings that mark a yes/no prompt.
const CONFIRMATION_PROMPTS: [&str; 3] = ["Continue?", "Would you like to airdrop", "(y/n)"];

/// How to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployCommand {
    /// `anchor deploy [--provider.cluster <cluster>]`
    Anchor { cluster: Option<String> },
    /// A shell script, run with `sh` from the workspace
    Script(PathBuf),
    /// Any other command
    Custom { program: String, args: Vec<String> },
}

impl DeployCommand {
    fn command(&self) -> Command {
        match self {
            DeployCommand::Anchor { cluster } => {
                let mut cmd = Command::new("anchor");
                cmd.arg("deploy");
                if let Some(cluster) = cluster {
                    cmd.args(["--provider.cluster", cluster]);
                }
                cmd
            }
            DeployCommand::Script(path) => {
                let mut cmd = Command::new("sh");
                cmd.arg(path);
                cmd
            }
            DeployCommand::Custom { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }

    /// `anchor deploy` only uploads what is in `target/deploy`; scripts
    /// and custom commands are expected to build for themselves.
    pub fn needs_build(&self) -> bool {
        matches!(self, DeployCommand::Anchor { .. })
    }

    pub fn name(&self) -> String {
        match self {
            DeployCommand::Anchor { cluster: Some(c) } => format!("anchor deploy ({})", c),
            DeployCommand::Anchor { cluster: None } => "anchor deploy".to_string(),
            DeployCommand::Script(path) => path.display().to_string(),
            DeployCommand::Custom { program, .. } => program.clone(),
        }
    }
}

/// Outcome of a deployment.
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub success: bool,
    /// Program ID printed by the deploy tool, if any
    pub program_id: Option<ProgramId>,
    /// Combined stdout and stderr
    pub output: String,
    pub exit_code: Option<i32>,
    /// Number of prompts answered with `y`
    pub confirmations: u32,
    pub duration: Duration,
    /// Set on timeout or abnormal exit
    pub error: Option<String>,
}

/// Runs deployments in an Anchor workspace.
#[derive(Debug, Clone)]
pub struct DeployRunner {
    command: DeployCommand,
    timeout: Duration,
}

impl DeployRunner {
    pub fn new(command: DeployCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn command(&self) -> &DeployCommand {
        &self.command
    }

    /// Build with `builder`, then deploy. A failed build skips the deploy.
    pub async fn build_and_run<B>(&self, builder: &B, workspace: &Path) -> Result<DeployResult, BuildError>
    where
        B: ProgramBuilder,
    {
        let build = builder.build(workspace).await;
        if !build.passed {
            let error = build.error.as_deref().unwrap_or("unknown error");
            tracing::warn!(stage = %build.stage, %error, "build failed, not deploying");
            return Ok(DeployResult {
                success: false,
                program_id: None,
                error: Some(format!("Build failed ({}): {}", build.stage, error)),
                output: build.output,
                exit_code: None,
                confirmations: 0,
                duration: build.duration,
            });
        }

        let mut result = self.run(workspace).await?;
        result.duration += build.duration;
        Ok(result)
    }

    /// Run the deployment in `workspace`.
    pub async fn run(&self, workspace: &Path) -> Result<DeployResult, BuildError> {
        let start = Instant::now();
        let name = self.command.name();
        tracing::info!(command = %name, dir = %workspace.display(), "deploying");

        let mut child = self
            .command
            .command()
            .current_dir(workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BuildError::Spawn {
                program: name.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let mut stdin = child.stdin.take();

        // Drain stderr in the background so the child never blocks on it
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "scg_build::deploy::stderr", "{}", line);
                    if let Ok(mut b) = buf.lock() {
                        b.push_str(&line);
                        b.push('\n');
                    }
                }
            })
        });

        let mut output = String::new();
        let mut confirmations = 0u32;

        let outcome = tokio::time::timeout(self.timeout, async {
            if let Some(stdout) = stdout {
                answer_prompts(stdout, &mut stdin, &mut output, &mut confirmations).await?;
            }
            child.wait().await
        })
        .await;

        if let Some(task) = stderr_task {
            if outcome.is_ok() {
                let _ = task.await;
            } else {
                task.abort();
            }
        }

        let stderr = stderr_buf.lock().map(|b| b.clone()).unwrap_or_default();
        if !stderr.is_empty() {
            output.push('\n');
            output.push_str(&stderr);
        }

        let duration = start.elapsed();
        let program_id = extract_from_cli_output(&output);

        let result = match outcome {
            Ok(Ok(status)) => DeployResult {
                success: status.success(),
                program_id,
                exit_code: status.code(),
                confirmations,
                duration,
                error: (!status.success()).then(|| format!("{} exited with {}", name, status)),
                output,
            },
            Ok(Err(e)) => return Err(BuildError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                DeployResult {
                    success: false,
                    program_id,
                    exit_code: None,
                    confirmations,
                    duration,
                    error: Some(format!("Timeout after {:?}", self.timeout)),
                    output,
                }
            }
        };

        if result.success {
            tracing::info!(program_id = ?result.program_id.as_ref().map(ProgramId::as_str), "deploy succeeded");
        } else {
            tracing::warn!(error = ?result.error, "deploy failed");
        }

        Ok(result)
    }
}

/// Address of the newest `*-keypair.json` under `target/deploy`.
///
/// Used when the deploy tool did not print a program ID.
pub async fn program_id_from_keypair(workspace: &Path) -> Result<Option<ProgramId>, BuildError> {
    let keys = KeyResolver::default();
    match keys.find_keypair(workspace, "").await? {
        Some(keypair) => keys.address_of(&keypair).await.map(Some),
        None => Ok(None),
    }
}

/// Whether `text` contains a yes/no prompt.
pub fn is_confirmation_prompt(text: &str) -> bool {
    CONFIRMATION_PROMPTS.iter().any(|p| text.contains(p))
}

/// Copy `reader` into `output`, writing `y` to `stdin` at each prompt.
///
/// Prompts usually lack a trailing newline, so the partial line is checked
/// after every read as well as each completed line.
async fn answer_prompts<R>(
    reader: R,
    stdin: &mut Option<ChildStdin>,
    output: &mut String,
    confirmations: &mut u32,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = [0u8; 4096];
    let mut pending = String::new();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let chunk = String::from_utf8_lossy(&buf[..n]);
        output.push_str(&chunk);
        pending.push_str(&chunk);

        while let Some(pos) = pending.find('\n') {
            let line: String = pending.drain(..=pos).collect();
            let line = line.trim_end();
            tracing::info!(target: "scg_build::deploy::stdout", "{}", line);
            if is_confirmation_prompt(line) {
                confirm(stdin, confirmations).await;
            }
        }

        if is_confirmation_prompt(&pending) {
            tracing::info!(target: "scg_build::deploy::stdout", "{}", pending);
            confirm(stdin, confirmations).await;
            pending.clear();
        }
    }

    Ok(())
}

async fn confirm(stdin: &mut Option<ChildStdin>, confirmations: &mut u32) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };

    let written = async {
        pipe.write_all(b"y\n").await?;
        pipe.flush().await
    }
    .await;

    match written {
        Ok(()) => *confirmations += 1,
        Err(e) => {
            // The child closed stdin; further prompts cannot be answered
            tracing::debug!(error = %e, "stdin closed");
            stdin.take();
        }
    }
}
