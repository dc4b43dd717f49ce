use anyhow::Result;
use clap::{Parser, Subcommand};
use deskpilot::config::Config;
use deskpilot::memory::{self, Memory};
use deskpilot::orchestrator::{Orchestrator, SingleCommandPlanner};
use deskpilot::security::{
    ApprovalBroker, AutoApproveBroker, CliApprovalBroker, SecurityGate,
};
use deskpilot::tools::{ToolContext, ToolRegistry, builtin_tools};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "deskpilot", version, about = "Secure closed-loop desktop automation agent")]
struct Cli {
    /// Workspace directory (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one objective through the decision loop
    Run {
        /// Objective text, e.g. "run: ls -la"
        objective: String,
        /// Override the configured iteration ceiling
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Auto-approve critical actions (development only)
        #[arg(long)]
        yes: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or export the semantic memory store
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Show the active security policy
    Security {
        #[command(subcommand)]
        command: SecurityCommands,
    },
    /// Snapshot of the wired engine: tools, limits, memory backend
    Status,
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Export every entry as a flat JSON sequence
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Entry count and backend info
    Stats,
}

#[derive(Subcommand)]
enum SecurityCommands {
    /// Print the active allow-lists and approval settings
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();
    let config = Config::load_or_init(cli.workspace.clone())?;

    match cli.command {
        Commands::Run {
            objective,
            max_iterations,
            yes,
            json,
        } => run_objective(&config, &objective, max_iterations, yes, json).await,
        Commands::Memory { command } => match command {
            MemoryCommands::Export { output } => export_memory(&config, output).await,
            MemoryCommands::Stats => memory_stats(&config).await,
        },
        Commands::Security {
            command: SecurityCommands::Report,
        } => security_report(&config),
        Commands::Status => show_status(&config),
    }
}

fn open_memory(config: &Config) -> Result<Arc<dyn Memory>> {
    let api_key = std::env::var(&config.memory.api_key_env).ok();
    let mem = memory::create_memory(&config.memory, &config.state_dir, api_key.as_deref())?;
    Ok(Arc::from(mem))
}

async fn run_objective(
    config: &Config,
    objective: &str,
    max_iterations: Option<u32>,
    yes: bool,
    json: bool,
) -> Result<()> {
    let mut registry = ToolRegistry::new();
    for tool in builtin_tools() {
        registry.register(tool);
    }
    let registry = Arc::new(registry);

    let broker: Box<dyn ApprovalBroker> = if yes || config.security.auto_approve {
        Box::new(AutoApproveBroker)
    } else {
        Box::new(CliApprovalBroker)
    };

    let gate = Arc::new(SecurityGate::new(
        &config.security,
        &config.state_dir,
        Arc::clone(&registry),
        broker,
    ));
    let mem = open_memory(config)?;

    let orchestrator = Orchestrator::new(
        Arc::new(SingleCommandPlanner),
        gate,
        registry,
        mem,
        ToolContext::new(&config.workspace_dir),
        max_iterations.unwrap_or(config.orchestrator.max_iterations),
        Duration::from_secs(config.orchestrator.action_timeout_secs),
    );

    let report = orchestrator.run_objective(objective).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let status = if report.success { "done" } else { "failed" };
        println!(
            "{status} after {} iteration(s), {} action record(s)",
            report.iterations,
            report.action_log.len()
        );
        println!("{}", report.final_message);
        if let Some(failure) = &report.failure {
            println!("reason: {failure}");
        }
    }

    if report.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn export_memory(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let mem = open_memory(config)?;
    let entries = mem.export().await?;
    let rendered = serde_json::to_string_pretty(&entries)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, rendered).await?;
            println!("exported {} entries to {}", entries.len(), path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn memory_stats(config: &Config) -> Result<()> {
    let mem = open_memory(config)?;
    println!(
        "backend: {}\nentries: {}",
        mem.name(),
        mem.count().await?
    );
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let mut registry = ToolRegistry::new();
    for tool in builtin_tools() {
        registry.register(tool);
    }
    let registry = Arc::new(registry);

    let gate = Arc::new(SecurityGate::new(
        &config.security,
        &config.state_dir,
        Arc::clone(&registry),
        Box::new(CliApprovalBroker),
    ));
    let mem = open_memory(config)?;

    let orchestrator = Orchestrator::new(
        Arc::new(SingleCommandPlanner),
        gate,
        registry,
        mem,
        ToolContext::new(&config.workspace_dir),
        config.orchestrator.max_iterations,
        Duration::from_secs(config.orchestrator.action_timeout_secs),
    );
    println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
    Ok(())
}

fn security_report(config: &Config) -> Result<()> {
    let registry = Arc::new(ToolRegistry::new());
    let gate = SecurityGate::new(
        &config.security,
        &config.state_dir,
        registry,
        Box::new(CliApprovalBroker),
    );
    println!("{}", serde_json::to_string_pretty(&gate.report())?);
    Ok(())
}
