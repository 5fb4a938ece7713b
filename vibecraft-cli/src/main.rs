//! # vibecraft CLI
//!
//! Command-line interface for triggering and inspecting coding agent runs.
//!
//! Usage:
//!   vibecraft run --project <id> <instruction>
//!   vibecraft resume --project <id> --run <run-id> <instruction>
//!   vibecraft messages --project <id>
//!   vibecraft usage
//!   vibecraft config
//!
//! Examples:
//!   vibecraft run -p todo "Build a todo app with dark mode"
//!   vibecraft run -p todo "Add a filter for completed items"
//!   vibecraft resume -p todo -r run_3f2a... "Add a filter for completed items"

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vibecraft_agent::{Orchestrator, RunEvent, RunOutcome, SandboxBackend, VibecraftConfig};
use vibecraft_runtime::{
    generate_run_id, Error, FileMessageStore, LocalSandboxService, Message, MessageStore, NewMessage,
    OpenAIProvider, Plan, QuotaLimiter, RemoteSandboxService, Result, SandboxService, SortOrder, Storage,
    StepRunner,
};

#[derive(Parser)]
#[command(name = "vibecraft")]
#[command(author, version, about = "vibecraft - turn an instruction into a running web app")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./vibecraft.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output (debug logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only warnings and the result
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run for a project
    Run {
        /// Project the run belongs to
        #[arg(short, long)]
        project: String,

        /// User charged for the generation
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Charge against the pro plan
        #[arg(long)]
        pro: bool,

        /// The instruction for the agent
        #[arg(trailing_var_arg = true, required = true)]
        instruction: Vec<String>,
    },
    /// Resume an interrupted run from its step journal
    Resume {
        #[arg(short, long)]
        project: String,

        /// Id printed when the run started
        #[arg(short, long)]
        run: String,

        /// The instruction the run was started with
        #[arg(trailing_var_arg = true, required = true)]
        instruction: Vec<String>,
    },
    /// List the messages of a project, oldest first
    Messages {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show remaining generation points
    Usage {
        #[arg(short, long, default_value = "local")]
        user: String,

        #[arg(long)]
        pro: bool,
    },
    /// Print the effective configuration
    Config,
}

/// What `run` and `resume` print
#[derive(Serialize)]
struct RunReport<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    outcome: &'a RunOutcome,
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    // logs go to stderr so stdout carries only the result
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn sandbox_service(config: &VibecraftConfig) -> Result<Arc<dyn SandboxService>> {
    match config.sandbox.backend {
        SandboxBackend::Local => Ok(Arc::new(LocalSandboxService::new(&config.sandbox.local_root)?)),
        SandboxBackend::Remote => {
            let url = config
                .sandbox
                .remote_url
                .clone()
                .ok_or_else(|| Error::config_invalid("sandbox.remote_url is required for the remote backend"))?;
            Ok(Arc::new(RemoteSandboxService::new(
                url,
                config.sandbox_api_key(),
                config.sandbox.domain.clone(),
            )?))
        }
    }
}

fn message_store(config: &VibecraftConfig) -> Result<Arc<FileMessageStore>> {
    Ok(Arc::new(FileMessageStore::new(&config.store.dir)?))
}

fn quota_limiter(config: &VibecraftConfig) -> Result<QuotaLimiter> {
    Ok(QuotaLimiter::new(Storage::file(&config.quota.dir)?, config.quota_policy()))
}

fn orchestrator(config: &VibecraftConfig, store: Arc<FileMessageStore>) -> Result<Orchestrator> {
    let provider = OpenAIProvider::new(config.provider_config())?;
    Ok(Orchestrator::new(Arc::new(provider), sandbox_service(config)?, store).with_settings(config.run_settings()))
}

async fn execute(orchestrator: &Orchestrator, project: &str, instruction: &str, steps: &StepRunner) -> Result<()> {
    let outcome = orchestrator.run(&RunEvent::new(project, instruction), steps).await?;
    let report = RunReport {
        run_id: steps.run_id(),
        outcome: &outcome,
    };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::serialization_failed(e.to_string()).with_operation("cli::report"))?;
    println!("{}", json);
    Ok(())
}

async fn run_task(config: &VibecraftConfig, project: &str, user: &str, pro: bool, instruction: &str) -> Result<()> {
    let status = quota_limiter(config)?.consume_generation(user, Plan::from_pro(pro))?;
    info!(user, remaining = status.remaining_points, "generation consumed");

    let store = message_store(config)?;
    store.create_message(NewMessage::user_text(project, instruction)).await?;

    let steps = StepRunner::new(generate_run_id(), Storage::file(&config.steps.journal_dir)?)
        .with_retry(config.retry_policy());
    info!(run_id = steps.run_id(), "run started; pass this id to `vibecraft resume` if it is interrupted");

    let orchestrator = orchestrator(config, store)?;
    execute(&orchestrator, project, instruction, &steps).await
}

async fn resume_task(config: &VibecraftConfig, project: &str, run_id: &str, instruction: &str) -> Result<()> {
    let steps = StepRunner::resume(run_id, Storage::file(&config.steps.journal_dir)?).with_retry(config.retry_policy());
    if steps.completed_steps().is_empty() {
        warn!(run_id, "no journaled steps found; the run starts from the beginning");
    }

    let orchestrator = orchestrator(config, message_store(config)?)?;
    execute(&orchestrator, project, instruction, &steps).await
}

fn print_message(message: &Message) {
    println!(
        "{}  {:?}/{:?}  {}",
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        message.role,
        message.kind,
        truncate(&message.content.replace('\n', " "), 80)
    );
    if let Some(fragment) = &message.fragment {
        println!("    {} -> {} ({} files)", fragment.title, fragment.sandbox_url, fragment.files.len());
    }
}

async fn list_messages(config: &VibecraftConfig, project: &str, limit: usize) -> Result<()> {
    let mut messages = message_store(config)?
        .find_messages(project, limit, SortOrder::Desc)
        .await?;
    messages.reverse();

    if messages.is_empty() {
        println!("No messages for project {}.", project);
    }
    for message in &messages {
        print_message(message);
    }
    Ok(())
}

fn show_usage(config: &VibecraftConfig, user: &str, pro: bool) -> Result<()> {
    let status = quota_limiter(config)?.status(user, Plan::from_pro(pro))?;
    let json = serde_json::to_string_pretty(&status)
        .map_err(|e| Error::serialization_failed(e.to_string()).with_operation("cli::usage"))?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = match VibecraftConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            project,
            user,
            pro,
            instruction,
        } => run_task(&config, &project, &user, pro, &instruction.join(" ")).await,
        Commands::Resume {
            project,
            run,
            instruction,
        } => resume_task(&config, &project, &run, &instruction.join(" ")).await,
        Commands::Messages { project, limit } => list_messages(&config, &project, limit).await,
        Commands::Usage { user, pro } => show_usage(&config, &user, pro),
        Commands::Config => config.to_toml().map(|toml| print!("{}", toml)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
