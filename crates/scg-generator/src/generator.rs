//! Contract generator with a build-fix loop.
//!
//! Implements the generate → build → classify → patch/fix cycle. Each attempt
//! spends exactly one syntax check and at most one build and one model call;
//! deterministic patches are tried before asking the model again.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use scg_build::classify::classify;
use scg_build::patch;
use scg_build::{
    syntax_check, BuildError, BuildResult, Diagnosis, KeyResolver, Patch, ProgramBuilder,
    ProjectFiles,
};
use scg_core::{
    extract_declared_id, replace_declared_id, ContractKind, ContractSpec, CoreError, ProgramId,
};

use crate::client::{ClientError, CompletionModel};
use crate::config::AppConfig;
use crate::prompt::{extract_code_block, PromptBuilder};
use crate::templates;
use crate::writer::FileWriter;

/// Generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Maximum attempts (each attempt is one syntax check plus at most one build)
    pub max_attempts: u32,
    /// Timeout for a single toolchain build
    pub build_timeout: Duration,
    /// Whether to print progress
    pub verbose: bool,
    /// Try deterministic patches before asking the model
    pub apply_patches: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            build_timeout: Duration::from_secs(300),
            verbose: false,
            apply_patches: true,
        }
    }
}

impl GeneratorConfig {
    /// Quick config for fast iteration.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            build_timeout: Duration::from_secs(120),
            verbose: true,
            ..Default::default()
        }
    }

    /// Thorough config for stubborn contracts.
    pub fn thorough() -> Self {
        Self {
            max_attempts: 10,
            build_timeout: Duration::from_secs(600),
            verbose: true,
            ..Default::default()
        }
    }
}

/// Where an attempt's code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptAction {
    /// Fresh generation from the contract description
    Generate,
    /// Model rewrite of existing code against new requirements
    Update,
    /// Code supplied by the caller (existing source file)
    Supplied,
    /// Deterministic patch, no model call
    Patch,
    /// Model fix of the previous attempt
    Fix,
}

impl std::fmt::Display for AttemptAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptAction::Generate => "generate",
            AttemptAction::Update => "update",
            AttemptAction::Supplied => "supplied",
            AttemptAction::Patch => "patch",
            AttemptAction::Fix => "fix",
        };
        f.write_str(s)
    }
}

/// Record of a single attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Attempt number (1-indexed)
    pub attempt: u32,
    pub action: AttemptAction,
    /// Code that was checked and built
    pub code: String,
    /// Syntax check result if that failed, otherwise the build result
    pub build: BuildResult,
    /// Classified failures (empty when the build passed)
    pub diagnoses: Vec<Diagnosis>,
    /// Patches applied to produce this attempt
    pub patches: Vec<Patch>,
    pub duration: Duration,
}

/// Result of a build loop.
#[derive(Debug, Clone)]
pub struct GeneratorResult {
    pub success: bool,
    /// Code from the last attempt
    pub code: Option<String>,
    /// Resolved program ID (on success)
    pub program_id: Option<ProgramId>,
    pub attempts: u32,
    pub duration: Duration,
    /// Build result from the last attempt
    pub final_build: Option<BuildResult>,
    pub attempt_history: Vec<AttemptRecord>,
}

impl GeneratorResult {
    /// Number of model calls made.
    pub fn model_calls(&self) -> usize {
        self.attempt_history
            .iter()
            .filter(|r| {
                matches!(
                    r.action,
                    AttemptAction::Generate | AttemptAction::Update | AttemptAction::Fix
                )
            })
            .count()
    }

    /// Format as a summary string.
    pub fn format_summary(&self) -> String {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        let mut summary = format!(
            "[{}] Build loop completed in {:.2}s\n",
            status,
            self.duration.as_secs_f64(),
        );

        summary.push_str(&format!("  Attempts: {}\n", self.attempts));
        summary.push_str(&format!("  Model calls: {}\n", self.model_calls()));

        if let Some(ref id) = self.program_id {
            summary.push_str(&format!("  Program ID: {}\n", id));
        }

        if let Some(ref build) = self.final_build {
            summary.push_str(&build.format_report());
        }

        if self.success {
            if let Some(ref code) = self.code {
                summary.push_str(&format!("\nBuilt {} lines of code.\n", code.lines().count()));
            }
        } else {
            summary.push_str("\nBuild loop failed.\n");
            for record in &self.attempt_history {
                let classes: Vec<&str> = record.diagnoses.iter().map(|d| d.class.name()).collect();
                summary.push_str(&format!(
                    "  #{} ({}): {} - {}{}\n",
                    record.attempt,
                    record.action,
                    record.build.stage,
                    record.build.error.as_deref().unwrap_or("passed"),
                    if classes.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", classes.join(", "))
                    }
                ));
            }
        }

        summary
    }
}

/// The Anchor workspace a generator writes into and builds.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    program: String,
    files: ProjectFiles,
    writer: FileWriter,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        let root = root.into();
        let program = program.into();
        let files = ProjectFiles::anchor_layout(&root, &program);
        let writer = FileWriter::new(files.source.clone());
        Self {
            root,
            program,
            files,
            writer,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.workspace_dir, &config.program_name)
            .with_mirrors(config.mirror_paths.iter().cloned())
    }

    pub fn with_mirrors(mut self, mirrors: impl IntoIterator<Item = PathBuf>) -> Self {
        self.writer = self.writer.with_mirrors(mirrors);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn files(&self) -> &ProjectFiles {
        &self.files
    }

    pub fn writer(&self) -> &FileWriter {
        &self.writer
    }
}

/// How the first attempt obtains its code.
enum Seed<'a> {
    Generate,
    Update { code: &'a str, requirements: &'a str },
    Supplied(String),
}

/// Model-driven contract generator with build verification.
pub struct CodeGenerator<M, B> {
    model: M,
    builder: B,
    workspace: Workspace,
    keys: KeyResolver,
    config: GeneratorConfig,
}

impl<M, B> CodeGenerator<M, B>
where
    M: CompletionModel,
    B: ProgramBuilder,
{
    pub fn new(model: M, builder: B, workspace: Workspace, config: GeneratorConfig) -> Self {
        Self {
            model,
            builder,
            workspace,
            keys: KeyResolver::default(),
            config,
        }
    }

    /// Use a specific key resolver (non-PATH Solana/Anchor installs).
    pub fn with_key_resolver(mut self, keys: KeyResolver) -> Self {
        self.keys = keys;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Generate code for `spec` and write it, without building.
    pub async fn generate_source(&self, spec: &ContractSpec) -> Result<String, GeneratorError> {
        let program_id = self.current_program_id().await?;
        let code = self.request_generation(spec, &program_id).await?;
        self.workspace.writer().write(&code).await?;
        Ok(code)
    }

    /// Generate code for `spec` and run the build loop.
    pub async fn generate(&self, spec: &ContractSpec) -> Result<GeneratorResult, GeneratorError> {
        self.run(spec, Seed::Generate).await
    }

    /// Rewrite `code` against `requirements`, then run the build loop.
    pub async fn update(
        &self,
        kind: &ContractKind,
        code: &str,
        requirements: &str,
    ) -> Result<GeneratorResult, GeneratorError> {
        let spec = ContractSpec::new(kind.clone());
        self.run(&spec, Seed::Update { code, requirements }).await
    }

    /// Build the program already in the workspace, fixing it on failure.
    pub async fn build_existing(&self, spec: &ContractSpec) -> Result<GeneratorResult, GeneratorError> {
        let code = self
            .workspace
            .writer()
            .read()
            .await?
            .ok_or_else(|| GeneratorError::MissingSource(self.workspace.files().source.clone()))?;
        self.run(spec, Seed::Supplied(code)).await
    }

    async fn run(&self, spec: &ContractSpec, seed: Seed<'_>) -> Result<GeneratorResult, GeneratorError> {
        let start = Instant::now();
        let mut attempt_history: Vec<AttemptRecord> = Vec::new();
        let mut attempts = 0;

        let program_id = self.current_program_id().await?;

        if self.config.verbose {
            println!("=== BUILD LOOP START ===");
            println!("Contract: {} ({})", spec.name, spec.kind);
            println!("Workspace: {}", self.workspace.root().display());
            println!("Program ID: {}", program_id);
            println!();
        }

        if let Some(patch) = patch::prepare_workspace(self.workspace.files()).await? {
            tracing::info!(%patch, "normalized workspace manifest");
        }

        let mut seed = Some(seed);
        let mut previous: Option<String> = None;
        let mut last_build: Option<BuildResult> = None;
        let mut diagnoses: Vec<Diagnosis> = Vec::new();
        let mut pending_sync: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            attempts = attempt;
            let attempt_start = Instant::now();

            if self.config.verbose {
                println!("=== Attempt {}/{} ===", attempt, self.config.max_attempts);
            }

            // Obtain code
            let (action, code, patches) = if let Some(synced) = pending_sync.take() {
                (AttemptAction::Patch, synced, vec![Patch::SyncDeclaredId])
            } else if let Some(seed) = seed.take() {
                match seed {
                    Seed::Generate => (
                        AttemptAction::Generate,
                        self.request_generation(spec, &program_id).await?,
                        Vec::new(),
                    ),
                    Seed::Update { code, requirements } => (
                        AttemptAction::Update,
                        self.request_update(&spec.kind, code, requirements, &program_id)
                            .await?,
                        Vec::new(),
                    ),
                    Seed::Supplied(code) => (AttemptAction::Supplied, code, Vec::new()),
                }
            } else {
                let prev = previous.take().unwrap_or_default();
                let patches = if self.config.apply_patches
                    && diagnoses.iter().any(|d| d.class.is_patchable())
                {
                    patch::apply(&diagnoses, self.workspace.files(), Some(&program_id)).await?
                } else {
                    Vec::new()
                };

                if patches.is_empty() {
                    let fixed = self
                        .request_fix(spec, &prev, last_build.as_ref(), &diagnoses, &program_id)
                        .await?;
                    (AttemptAction::Fix, fixed, patches)
                } else {
                    // Source patches land on disk; manifest patches leave it untouched
                    let code = self.workspace.writer().read().await?.unwrap_or(prev);
                    (AttemptAction::Patch, code, patches)
                }
            };

            if self.config.verbose {
                println!("{} {} lines of code", action, code.lines().count());
            }
            tracing::info!(attempt, %action, lines = code.lines().count(), "attempt started");

            // Syntax check before spending a toolchain run
            let syntax = syntax_check(&code);
            let build = if syntax.passed {
                self.workspace.writer().write(&code).await?;
                self.builder.build(self.workspace.root()).await
            } else {
                syntax
            };

            if !build.passed {
                diagnoses = classify(failure_text(&build));

                tracing::warn!(
                    attempt,
                    stage = %build.stage,
                    error = build.error.as_deref().unwrap_or("unknown"),
                    classes = ?diagnoses.iter().map(|d| d.class.name()).collect::<Vec<_>>(),
                    "build failed"
                );
                if self.config.verbose {
                    println!(
                        "❌ Failed at {}: {}",
                        build.stage,
                        build.error.as_deref().unwrap_or("unknown")
                    );
                }

                attempt_history.push(AttemptRecord {
                    attempt,
                    action,
                    code: code.clone(),
                    build: build.clone(),
                    diagnoses: diagnoses.clone(),
                    patches,
                    duration: attempt_start.elapsed(),
                });
                previous = Some(code);
                last_build = Some(build);
                continue;
            }

            diagnoses.clear();
            attempt_history.push(AttemptRecord {
                attempt,
                action,
                code: code.clone(),
                build: build.clone(),
                diagnoses: Vec::new(),
                patches,
                duration: attempt_start.elapsed(),
            });

            // Passed: the declared ID must match the deploy keypair
            let keypair_id = self
                .keys
                .resolve(self.workspace.root(), self.workspace.program())
                .await?;
            let declared_id = extract_declared_id(&code);

            if let (Some(real), Some(declared)) = (&keypair_id, &declared_id) {
                if real != declared {
                    tracing::info!(%declared, keypair = %real, "declared program ID differs from keypair, rebuilding");
                    if self.config.verbose {
                        println!("Build passed; syncing declare_id! to {}", real);
                    }
                    pending_sync = Some(patch::sync_declared_id(&code, real));
                    previous = Some(code);
                    last_build = Some(build);
                    continue;
                }
            }

            let program_id = keypair_id.or(declared_id);
            if self.config.verbose {
                println!("✅ Build passed!");
            }
            tracing::info!(attempt, program_id = ?program_id.as_ref().map(ProgramId::as_str), "build loop succeeded");

            return Ok(GeneratorResult {
                success: true,
                code: Some(code),
                program_id,
                attempts,
                duration: start.elapsed(),
                final_build: Some(build),
                attempt_history,
            });
        }

        if self.config.verbose {
            println!();
            println!("=== BUILD LOOP EXHAUSTED ===");
        }
        tracing::warn!(attempts, "build loop exhausted");

        Ok(GeneratorResult {
            success: false,
            code: pending_sync.or(previous),
            program_id: None,
            attempts,
            duration: start.elapsed(),
            final_build: last_build,
            attempt_history,
        })
    }

    /// Program ID to put in prompts: deploy keypair, then the current source, then the placeholder.
    async fn current_program_id(&self) -> Result<ProgramId, GeneratorError> {
        if let Some(id) = self
            .keys
            .resolve(self.workspace.root(), self.workspace.program())
            .await?
        {
            return Ok(id);
        }

        let existing = self.workspace.writer().read().await?;
        Ok(existing
            .as_deref()
            .and_then(extract_declared_id)
            .unwrap_or_else(ProgramId::placeholder))
    }

    async fn request_generation(
        &self,
        spec: &ContractSpec,
        program_id: &ProgramId,
    ) -> Result<String, GeneratorError> {
        let template = templates::for_kind(&spec.kind);
        let prompt = PromptBuilder::build_generation_prompt(spec, program_id, Some(template));
        self.request(prompt, program_id).await
    }

    async fn request_update(
        &self,
        kind: &ContractKind,
        code: &str,
        requirements: &str,
        program_id: &ProgramId,
    ) -> Result<String, GeneratorError> {
        let prompt = PromptBuilder::build_update_prompt(kind, code, requirements, program_id);
        self.request(prompt, program_id).await
    }

    async fn request_fix(
        &self,
        spec: &ContractSpec,
        previous_code: &str,
        previous_build: Option<&BuildResult>,
        diagnoses: &[Diagnosis],
        program_id: &ProgramId,
    ) -> Result<String, GeneratorError> {
        let prompt = match previous_build {
            Some(build) => PromptBuilder::build_fix_prompt(spec, previous_code, build, diagnoses),
            None => format!(
                "The following Anchor program does not build. Fix it:\n\n```rust\n{}\n```",
                previous_code
            ),
        };
        self.request(prompt, program_id).await
    }

    /// One model call; the returned code always declares `program_id`.
    async fn request(&self, prompt: String, program_id: &ProgramId) -> Result<String, GeneratorError> {
        tracing::debug!(chars = prompt.len(), "requesting completion");

        let response = self
            .model
            .complete(PromptBuilder::system_prompt(), &prompt)
            .await?;

        let code = extract_code_block(&response).ok_or(GeneratorError::NoCodeInResponse(response))?;

        if extract_declared_id(&code).as_ref() == Some(program_id) {
            Ok(code)
        } else {
            Ok(replace_declared_id(&code, program_id))
        }
    }
}

/// Text to classify: full output when captured, otherwise the error line.
fn failure_text(build: &BuildResult) -> &str {
    if build.output.trim().is_empty() {
        build.error.as_deref().unwrap_or_default()
    } else {
        &build.output
    }
}

/// Generator errors.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("No code block found in response: {0}")]
    NoCodeInResponse(String),

    #[error("No program source at {0}")]
    MissingSource(PathBuf),

    #[error("Failed to access {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use scg_build::ErrorClass;
    use scg_core::PLACEHOLDER_PROGRAM_ID;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const PROGRAM: &str = r#"use anchor_lang::prelude::*;

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
    #[account(mut)]
    pub state: Account<'info, State>,
    pub user: Signer<'info>,
}

#[account]
pub struct State {
    pub value: u64,
}
"#;

    const REAL_ID: &str = "8a76RhBfP78tuN2WtZaP11ESgeCStcfb9E78Pf9wz4Yg";

    fn fenced(code: &str) -> String {
        format!("Here you go:\n\n```rust\n{}\n```\n", code)
    }

    /// Model that replays scripted responses and records prompts.
    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ClientError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl CompletionModel for &ScriptedModel {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ClientError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ClientError::EmptyResponse))
        }
    }

    /// Builder that replays scripted results and snapshots the source at each build.
    struct ScriptedBuilder {
        results: Mutex<VecDeque<BuildResult>>,
        sources: Mutex<Vec<String>>,
    }

    impl ScriptedBuilder {
        fn new(results: Vec<BuildResult>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                sources: Mutex::new(Vec::new()),
            }
        }

        fn sources(&self) -> Vec<String> {
            self.sources.lock().unwrap().clone()
        }
    }

    impl ProgramBuilder for &ScriptedBuilder {
        async fn build(&self, project_dir: &Path) -> BuildResult {
            let source = project_dir.join("programs/deploy/src/lib.rs");
            self.sources
                .lock()
                .unwrap()
                .push(std::fs::read_to_string(source).unwrap_or_default());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(pass)
        }
    }

    fn pass() -> BuildResult {
        BuildResult::pass_with_output("anchor build", Duration::ZERO, "Finished release".to_string())
    }

    fn fail(output: &str) -> BuildResult {
        let error = output.lines().next().unwrap_or("error").to_string();
        BuildResult::fail("anchor build", error, Duration::ZERO, output.to_string())
    }

    fn offline_keys() -> KeyResolver {
        KeyResolver::with_binaries("solana-not-installed", "anchor-not-installed")
    }

    fn generator<'a>(
        model: &'a ScriptedModel,
        builder: &'a ScriptedBuilder,
        root: &Path,
        max_attempts: u32,
    ) -> CodeGenerator<&'a ScriptedModel, &'a ScriptedBuilder> {
        let config = GeneratorConfig {
            max_attempts,
            ..Default::default()
        };
        CodeGenerator::new(model, builder, Workspace::new(root, "deploy"), config)
            .with_key_resolver(offline_keys())
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![fenced(PROGRAM)]);
        let builder = ScriptedBuilder::new(vec![pass()]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let result = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.model_calls(), 1);
        assert_eq!(result.attempt_history[0].action, AttemptAction::Generate);
        assert_eq!(result.program_id.as_ref().unwrap().as_str(), PLACEHOLDER_PROGRAM_ID);
        assert_eq!(builder.sources(), vec![PROGRAM.to_string()]);

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("REFERENCE PROGRAM (escrow)"));
        assert!(result.format_summary().starts_with("[SUCCESS]"));
    }

    #[tokio::test]
    async fn test_fix_after_borrow_error() {
        let dir = tempfile::tempdir().unwrap();
        let fixed = PROGRAM.replace("Ok(())", "let _ = 1;\n        Ok(())");
        let model = ScriptedModel::new(vec![fenced(PROGRAM), fenced(&fixed)]);
        let builder = ScriptedBuilder::new(vec![
            fail("error[E0382]: borrow of moved value: `seeds`\n  --> programs/deploy/src/lib.rs:12:9\n"),
            pass(),
        ]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let result = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        let actions: Vec<AttemptAction> = result.attempt_history.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AttemptAction::Generate, AttemptAction::Fix]);
        assert_eq!(result.attempt_history[0].diagnoses[0].class, ErrorClass::BorrowOrMove);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains(ErrorClass::BorrowOrMove.hint()));
        assert!(prompts[1].contains("lib.rs:12:9"));
        assert!(builder.sources()[1].contains("let _ = 1;"));
    }

    #[tokio::test]
    async fn test_stack_overflow_is_patched_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![fenced(PROGRAM)]);
        let builder = ScriptedBuilder::new(vec![
            fail("Error: Function _ZN6deploy Stack offset of 4424 exceeded max offset of 4096 by 328 bytes"),
            pass(),
        ]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let result = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(result.success);
        assert_eq!(model.prompts().len(), 1);
        let second = &result.attempt_history[1];
        assert_eq!(second.action, AttemptAction::Patch);
        assert_eq!(second.patches, vec![Patch::BoxAccounts]);
        assert!(builder.sources()[1].contains("pub state: Box<Account<'info, State>>,"));
    }

    #[tokio::test]
    async fn test_patches_disabled_falls_back_to_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![fenced(PROGRAM), fenced(PROGRAM)]);
        let builder = ScriptedBuilder::new(vec![
            fail("Error: Stack offset of 4424 exceeded max offset of 4096"),
            pass(),
        ]);

        let config = GeneratorConfig {
            apply_patches: false,
            ..Default::default()
        };
        let gen = CodeGenerator::new(&model, &builder, Workspace::new(dir.path(), "deploy"), config)
            .with_key_resolver(offline_keys());
        let result = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.attempt_history[1].action, AttemptAction::Fix);
        assert!(model.prompts()[1].contains(ErrorClass::StackOverflow.hint()));
    }

    #[tokio::test]
    async fn test_syntax_error_skips_build() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![
            fenced("use anchor_lang::prelude::*;\npub fn broken("),
            fenced(PROGRAM),
        ]);
        let builder = ScriptedBuilder::new(vec![pass()]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let result = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(builder.sources().len(), 1);
        assert_eq!(result.attempt_history[0].build.stage, scg_build::runner::SYNTAX_STAGE);
        assert!(model.prompts()[1].contains("**Stage**: syn"));
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![fenced(PROGRAM); 10]);
        let builder = ScriptedBuilder::new(vec![fail("error[E0308]: mismatched types"); 10]);

        let gen = generator(&model, &builder, dir.path(), 3);
        let result = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(builder.sources().len(), 3);
        assert_eq!(model.prompts().len(), 3);
        assert!(result.program_id.is_none());
        assert!(!result.final_build.as_ref().unwrap().passed);

        let summary = generator(&model, &builder, dir.path(), 1)
            .build_existing(&ContractSpec::new(ContractKind::Escrow))
            .await
            .unwrap()
            .format_summary();
        assert!(summary.starts_with("[FAILED]"));
        assert!(summary.contains("[type-mismatch]"));
    }

    #[tokio::test]
    async fn test_no_code_in_response() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec!["I can't do that.".to_string()]);
        let builder = ScriptedBuilder::new(vec![]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let err = gen.generate(&ContractSpec::new(ContractKind::Escrow)).await.unwrap_err();
        assert!(matches!(err, GeneratorError::NoCodeInResponse(_)));
        assert!(builder.sources().is_empty());
    }

    #[tokio::test]
    async fn test_generated_code_gets_current_program_id() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("programs/deploy/src/lib.rs");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, PROGRAM.replace(PLACEHOLDER_PROGRAM_ID, REAL_ID)).unwrap();

        // The model ignores the requested ID
        let model = ScriptedModel::new(vec![fenced(PROGRAM)]);
        let builder = ScriptedBuilder::new(vec![]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let code = gen.generate_source(&ContractSpec::new(ContractKind::Escrow)).await.unwrap();

        assert!(code.contains(&format!("declare_id!(\"{}\")", REAL_ID)));
        assert!(model.prompts()[0].contains(REAL_ID));
        assert!(std::fs::read_to_string(&source).unwrap().contains(REAL_ID));
        assert!(builder.sources().is_empty());
    }

    #[tokio::test]
    async fn test_update_uses_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![fenced(PROGRAM)]);
        let builder = ScriptedBuilder::new(vec![pass()]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let result = gen
            .update(&ContractKind::TokenVesting, PROGRAM, "Add a revoke instruction")
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.attempt_history[0].action, AttemptAction::Update);
        assert!(model.prompts()[0].contains("Add a revoke instruction"));
    }

    #[tokio::test]
    async fn test_build_existing_requires_source() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![]);
        let builder = ScriptedBuilder::new(vec![]);

        let gen = generator(&model, &builder, dir.path(), 5);
        let err = gen
            .build_existing(&ContractSpec::new(ContractKind::Escrow))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::MissingSource(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_declared_id_synced_to_keypair() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("programs/deploy/src/lib.rs");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, PROGRAM).unwrap();

        let deploy = dir.path().join("target/deploy");
        std::fs::create_dir_all(&deploy).unwrap();
        std::fs::write(deploy.join("deploy-keypair.json"), "[]").unwrap();

        let bin = tempfile::tempdir().unwrap();
        let solana = bin.path().join("solana");
        std::fs::write(&solana, format!("#!/bin/sh\necho {}\n", REAL_ID)).unwrap();
        std::fs::set_permissions(&solana, std::fs::Permissions::from_mode(0o755)).unwrap();

        let model = ScriptedModel::new(vec![]);
        let builder = ScriptedBuilder::new(vec![pass(), pass()]);
        let gen = CodeGenerator::new(
            &model,
            &builder,
            Workspace::new(dir.path(), "deploy"),
            GeneratorConfig::default(),
        )
        .with_key_resolver(KeyResolver::with_binaries(
            solana.to_string_lossy(),
            "anchor-not-installed",
        ));

        let result = gen
            .build_existing(&ContractSpec::new(ContractKind::Escrow))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.program_id.as_ref().unwrap().as_str(), REAL_ID);
        assert_eq!(result.model_calls(), 0);

        let actions: Vec<AttemptAction> = result.attempt_history.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AttemptAction::Supplied, AttemptAction::Patch]);
        assert_eq!(result.attempt_history[1].patches, vec![Patch::SyncDeclaredId]);
        assert!(builder.sources()[1].contains(REAL_ID));
    }
}
