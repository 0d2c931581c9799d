//! CLI for generating, building and deploying Anchor contracts.
//!
//! # Usage
//!
//! ```bash
//! # Generate a contract into the workspace (no build)
//! scg generate --type escrow --schema escrow.json
//!
//! # Generate, then build and fix until it compiles
//! scg buildloop --type token_vesting --max-attempts 8
//!
//! # Change an existing contract
//! scg update --id 3f2a --requirements "Add a cancel instruction for the depositor"
//!
//! # Build the current program, fixing failures
//! scg build
//!
//! # Deploy and record the program ID
//! scg deploy --id 3f2a --cluster devnet
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use scg_build::{program_id_from_keypair, CommandBuilder, DeployCommand, DeployRunner};
use scg_core::{extract_declared_id, ContractKind, ContractSpec};
use scg_generator::{
    AppConfig, CodeGenerator, ContractRecord, ContractStatus, ContractStore, GeneratorConfig,
    GeneratorResult, LlmClient, Workspace,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "scg",
    about = "Generate Solana Anchor contracts with an LLM and build them until they compile",
    version,
    propagate_version = true
)]
struct Cli {
    /// Anchor workspace (default: ./deploy)
    #[arg(long, global = true, env = "SCG_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Config file (default: <workspace>/scg.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only print warnings and results
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a contract and write it to the workspace without building
    Generate {
        #[command(flatten)]
        contract: ContractArgs,
    },

    /// Rewrite an existing contract against new requirements, then build it
    Update {
        /// Stored contract to update (default: the workspace source)
        #[arg(long)]
        id: Option<String>,

        /// Contract type of the workspace source
        #[arg(long = "type", default_value = "escrow")]
        kind: String,

        /// Requirements text
        #[arg(long, conflicts_with = "requirements_file", required_unless_present = "requirements_file")]
        requirements: Option<String>,

        /// File containing the requirements
        #[arg(long)]
        requirements_file: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Build the workspace program, fixing failures
    Build {
        /// Stored contract to build (default: the workspace source)
        #[arg(long)]
        id: Option<String>,

        /// Contract type used for fix prompts
        #[arg(long = "type", default_value = "escrow")]
        kind: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Generate a contract, then build and fix it until it compiles
    Buildloop {
        #[command(flatten)]
        contract: ContractArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Build and deploy the workspace program
    Deploy {
        /// Stored contract to deploy (its code is written first)
        #[arg(long)]
        id: Option<String>,

        /// Cluster passed to `anchor deploy`
        #[arg(long)]
        cluster: Option<String>,

        /// Deployment script to run instead of `anchor deploy`
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// List stored contracts
    List,

    /// Show a stored contract
    Show {
        /// Contract id (or unique prefix)
        id: String,

        /// Omit the source code
        #[arg(long)]
        no_code: bool,
    },
}

#[derive(clap::Args)]
struct ContractArgs {
    /// Contract type (escrow, token_vesting, crowdfunding, or any name)
    #[arg(long = "type", default_value = "escrow")]
    kind: String,

    /// JSON schema with parameters (or a full contract description)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Contract name
    #[arg(long)]
    name: Option<String>,
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// Maximum build attempts
    #[arg(long, env = "SCG_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Quick preset (3 attempts, short build timeout)
    #[arg(long, conflicts_with = "thorough")]
    quick: bool,

    /// Thorough preset (10 attempts, long build timeout)
    #[arg(long)]
    thorough: bool,

    /// Always ask the model instead of applying deterministic patches
    #[arg(long)]
    no_patches: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let app = AppConfig::load(cli.config.as_deref(), cli.workspace.clone())
        .context("loading configuration")?;
    let verbose = !cli.quiet;

    match cli.command {
        Commands::Generate { contract } => {
            let spec = contract.load()?;
            let generator = generator(&app, &RunArgs::default(), verbose)?;
            let code = generator.generate_source(&spec).await?;

            let mut store = ContractStore::open(app.store_file())?;
            let mut record = ContractRecord::new(spec.kind.clone(), spec.name.clone(), code.as_str());
            record.program_id = extract_declared_id(&code);
            let id = store.insert(record);
            store.save()?;

            println!(
                "Generated {} ({} lines) -> {}",
                spec.name,
                code.lines().count(),
                generator.workspace().writer().target().display()
            );
            println!("Contract id: {}", id);
            Ok(true)
        }

        Commands::Update {
            id,
            kind,
            requirements,
            requirements_file,
            run,
        } => {
            let requirements = match (requirements, requirements_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("--requirements or --requirements-file is required"),
            };

            let mut store = ContractStore::open(app.store_file())?;
            let (record_id, kind, code) = match id {
                Some(ref prefix) => {
                    let record = find(&store, prefix)?;
                    (Some(record.id), record.kind.clone(), record.code.clone())
                }
                None => {
                    let path = app.program_source_path();
                    let code = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    (None, parse_kind(&kind), code)
                }
            };

            let generator = generator(&app, &run, verbose)?;
            let result = generator.update(&kind, &code, &requirements).await?;
            print_result(&result, verbose);

            let name = kind.as_str().to_string();
            record_result(&mut store, record_id, kind, name, &result)?;
            Ok(result.success)
        }

        Commands::Build { id, kind, run } => {
            let mut store = ContractStore::open(app.store_file())?;
            let mut spec = ContractSpec::new(parse_kind(&kind));

            let record_id = match id {
                Some(ref prefix) => {
                    let record = find(&store, prefix)?;
                    spec = ContractSpec::new(record.kind.clone());
                    spec.name = record.name.clone();
                    write_source(&app, &record.code).await?;
                    Some(record.id)
                }
                None => None,
            };

            let generator = generator(&app, &run, verbose)?;
            let result = generator.build_existing(&spec).await?;
            print_result(&result, verbose);

            if record_id.is_some() {
                record_result(&mut store, record_id, spec.kind, spec.name, &result)?;
            }
            Ok(result.success)
        }

        Commands::Buildloop { contract, run } => {
            let spec = contract.load()?;
            let generator = generator(&app, &run, verbose)?;
            let result = generator.generate(&spec).await?;
            print_result(&result, verbose);

            let mut store = ContractStore::open(app.store_file())?;
            let id = record_result(&mut store, None, spec.kind, spec.name, &result)?;
            if let Some(id) = id {
                println!("Contract id: {}", id);
            }
            Ok(result.success)
        }

        Commands::Deploy {
            id,
            cluster,
            script,
        } => {
            let mut store = ContractStore::open(app.store_file())?;
            let record_id = match id {
                Some(ref prefix) => {
                    let record = find(&store, prefix)?;
                    write_source(&app, &record.code).await?;
                    Some(record.id)
                }
                None => None,
            };

            let command = match (script, cluster) {
                (Some(script), _) => DeployCommand::Script(script),
                (None, Some(cluster)) => DeployCommand::Anchor {
                    cluster: Some(cluster),
                },
                (None, None) => app.deploy_command(),
            };

            let runner = DeployRunner::new(command, app.deploy_timeout());
            let mut result = if runner.command().needs_build() {
                let builder = CommandBuilder::new(app.build_tool()?, app.build_timeout());
                runner.build_and_run(&builder, &app.workspace_dir).await?
            } else {
                runner.run(&app.workspace_dir).await?
            };
            if result.success && result.program_id.is_none() {
                result.program_id = program_id_from_keypair(&app.workspace_dir)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "could not read program keypair");
                        None
                    });
            }

            if let Some(id) = record_id {
                let status = if result.success {
                    ContractStatus::Deployed
                } else {
                    ContractStatus::Failed
                };
                store.set_status(&id, status)?;
                if let Some(ref program_id) = result.program_id {
                    store.set_program_id(&id, program_id.clone())?;
                }
                store.save()?;
            }

            if result.success {
                println!(
                    "Deployed in {:.2}s ({} prompts confirmed)",
                    result.duration.as_secs_f64(),
                    result.confirmations
                );
                if let Some(ref program_id) = result.program_id {
                    println!("Program ID: {}", program_id);
                }
            } else {
                eprintln!("Deploy failed: {}", result.error.as_deref().unwrap_or("unknown error"));
                if verbose {
                    eprintln!("{}", result.output);
                }
            }
            Ok(result.success)
        }

        Commands::List => {
            let store = ContractStore::open(app.store_file())?;
            if store.is_empty() {
                println!("No contracts in {}", app.store_file().display());
                return Ok(true);
            }

            println!(
                "{:<36}  {:<16}  {:<20}  {:<9}  PROGRAM ID",
                "ID", "TYPE", "NAME", "STATUS"
            );
            for record in store.list() {
                println!(
                    "{:<36}  {:<16}  {:<20}  {:<9}  {}",
                    record.id.to_string(),
                    record.kind.as_str(),
                    record.name,
                    record.status.to_string(),
                    record.program_id.as_ref().map(|p| p.as_str()).unwrap_or("-")
                );
            }
            Ok(true)
        }

        Commands::Show { id, no_code } => {
            let store = ContractStore::open(app.store_file())?;
            let record = find(&store, &id)?;

            println!("ID:         {}", record.id);
            println!("Type:       {}", record.kind);
            println!("Name:       {}", record.name);
            println!("Status:     {}", record.status);
            println!(
                "Program ID: {}",
                record.program_id.as_ref().map(|p| p.as_str()).unwrap_or("-")
            );
            println!("Created:    {}", record.created_at.to_rfc3339());
            println!("Updated:    {}", record.updated_at.to_rfc3339());
            if !no_code {
                println!();
                println!("{}", record.code);
            }
            Ok(true)
        }
    }
}

impl ContractArgs {
    fn load(&self) -> anyhow::Result<ContractSpec> {
        let kind = parse_kind(&self.kind);
        let mut spec = match self.schema {
            Some(ref path) => ContractSpec::from_file(path, kind)
                .with_context(|| format!("loading schema {}", path.display()))?,
            None => ContractSpec::new(kind),
        };
        if let Some(ref name) = self.name {
            spec.name = name.clone();
        }
        Ok(spec)
    }
}

fn parse_kind(s: &str) -> ContractKind {
    match s.parse() {
        Ok(kind) => kind,
        Err(never) => match never {},
    }
}

fn generator(
    app: &AppConfig,
    run: &RunArgs,
    verbose: bool,
) -> anyhow::Result<CodeGenerator<LlmClient, CommandBuilder>> {
    let mut config = if run.quick {
        GeneratorConfig::quick()
    } else if run.thorough {
        GeneratorConfig::thorough()
    } else {
        GeneratorConfig {
            max_attempts: app.max_attempts,
            build_timeout: app.build_timeout(),
            ..Default::default()
        }
    };
    if let Some(max) = run.max_attempts {
        config.max_attempts = max.max(1);
    }
    config.apply_patches = !run.no_patches;
    config.verbose = verbose;

    let client = LlmClient::from_env().context(
        "creating LLM client (set ANTHROPIC_API_KEY, or OPENAI_API_KEY with SCG_PROVIDER=openai)",
    )?;
    let builder = CommandBuilder::new(app.build_tool()?, config.build_timeout);

    tracing::debug!(
        provider = %client.config().provider,
        model = %client.config().model,
        max_attempts = config.max_attempts,
        "generator ready"
    );

    Ok(CodeGenerator::new(
        client,
        builder,
        Workspace::from_config(app),
        config,
    ))
}

fn find<'a>(store: &'a ContractStore, prefix: &str) -> anyhow::Result<&'a ContractRecord> {
    store
        .find(prefix)
        .with_context(|| format!("no contract matching {:?} in {}", prefix, display(store.path())))
}

fn display(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "memory".to_string())
}

async fn write_source(app: &AppConfig, code: &str) -> anyhow::Result<()> {
    Workspace::from_config(app).writer().write(code).await?;
    Ok(())
}

fn print_result(result: &GeneratorResult, verbose: bool) {
    if verbose {
        println!();
    }
    println!("{}", result.format_summary());
}

/// Store the outcome of a build loop, creating a record when `id` is `None`.
fn record_result(
    store: &mut ContractStore,
    id: Option<Uuid>,
    kind: ContractKind,
    name: String,
    result: &GeneratorResult,
) -> anyhow::Result<Option<Uuid>> {
    let Some(ref code) = result.code else {
        return Ok(id);
    };
    let status = if result.success {
        ContractStatus::Built
    } else {
        ContractStatus::Failed
    };

    let id = match id {
        Some(id) => {
            store.update_code(&id, code.as_str())?;
            id
        }
        None => store.insert(ContractRecord::new(kind, name, code.as_str())),
    };
    store.set_status(&id, status)?;
    if let Some(ref program_id) = result.program_id {
        store.set_program_id(&id, program_id.clone())?;
    }
    store.save()?;
    Ok(Some(id))
}
