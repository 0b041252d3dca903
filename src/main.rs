use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use doe::classifier::FailureClassifier;
use doe::directive::DirectiveStore;
use doe::domain::{Directive, EscalationRecord};
use doe::escalation::EscalationQueue;
use doe::observability::{EventSink, FanoutSink, JsonlEventSink, TracingSink};
use doe::orchestrator::{Orchestrator, RunOutcome, RunReport};
use doe::tools::{ToolCatalog, ToolRegistry};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("doe")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("doe.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Wire stores, catalog, escalation queue and event sinks into an orchestrator
fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let store = Arc::new(
        DirectiveStore::open(config.storage.directives_dir(), config.directives.clone())
            .context("Failed to open directive store")?,
    );
    let registry = Arc::new(ToolRegistry::new(Arc::clone(&store)));

    let catalog_path = config.storage.catalog_path();
    if catalog_path.exists() {
        let catalog = ToolCatalog::from_file(&catalog_path, config.executor.catalog_defaults())
            .context(format!("Failed to load tool catalog {}", catalog_path.display()))?;
        for (task_id, outcome) in catalog
            .register_all(&registry)
            .context("Failed to register tool catalog")?
        {
            debug!("Registered {}: {:?}", task_id, outcome);
        }
    } else {
        info!("No tool catalog at {}", catalog_path.display());
    }

    let escalations = Arc::new(
        EscalationQueue::open(config.storage.escalations_dir(), &config.escalation)
            .context("Failed to open escalation queue")?,
    );
    let events = JsonlEventSink::open(config.storage.events_dir()).context("Failed to open event log")?;
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new().with(Arc::new(TracingSink)).with(Arc::new(events)));

    Ok(Orchestrator::new(
        store,
        registry,
        escalations,
        sink,
        FailureClassifier::new(config.classifier.clone()),
        config.executor.clone(),
    ))
}

/// Cancel the token on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling...".yellow());
            trigger.cancel();
        }
    });
    cancel
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let orchestrator = build_orchestrator(config)?;

    match &cli.command {
        Commands::New { task, goal } => handle_new_command(&orchestrator, task, goal),
        Commands::List => handle_list_command(&orchestrator),
        Commands::Show { task } => handle_show_command(&orchestrator, task),
        Commands::Learnings { task } => handle_learnings_command(&orchestrator, task),
        Commands::Run {
            task,
            inputs,
            json,
            wait,
        } => handle_run_command(&orchestrator, task, inputs, json.as_deref(), *wait).await,
        Commands::Escalations { all } => handle_escalations_command(&orchestrator, *all),
        Commands::Decide { id, decision, note, by } => {
            let record = orchestrator.decide(id, (*decision).into(), note.clone(), by.clone())?;
            println!("{} {} -> {:?}", "Decided:".green(), record.id, decision);
            println!("Run `doe resume {}` to act on it", record.id);
            Ok(())
        }
        Commands::Resume { id } => {
            let cancel = cancel_on_ctrl_c();
            let report = orchestrator.resume(id, &cancel).await?;
            print_report(&report)
        }
    }
}

fn handle_new_command(orchestrator: &Orchestrator, task: &str, goal: &str) -> Result<()> {
    info!("Creating directive: {}", task);
    let store = orchestrator.directives();
    store.create(Directive::new(task, goal))?;
    println!("{} {}", "Created:".green(), store.document_path(task).display());
    Ok(())
}

fn handle_list_command(orchestrator: &Orchestrator) -> Result<()> {
    let directives = orchestrator.directives().list()?;
    let bound = orchestrator.registry().list()?;

    if directives.is_empty() && bound.is_empty() {
        println!("{}", "No directives yet. Create one with `doe new`.".yellow());
        return Ok(());
    }

    for task_id in &directives {
        let directive = orchestrator.directives().get(task_id)?;
        let status = if bound.contains(task_id) {
            "bound".green()
        } else {
            "unbound".yellow()
        };
        println!(
            "{:<30} {:<8} rev {:<4} {} learnings",
            task_id.bold(),
            status,
            directive.revision,
            directive.total_learnings()
        );
    }
    for task_id in bound.iter().filter(|t| !directives.contains(t)) {
        println!("{:<30} {}", task_id.bold(), "tool without directive".red());
    }
    Ok(())
}

fn handle_show_command(orchestrator: &Orchestrator, task: &str) -> Result<()> {
    let directive = orchestrator.directives().get(task)?;
    print!("{}", serde_yaml::to_string(&directive)?);
    Ok(())
}

fn handle_learnings_command(orchestrator: &Orchestrator, task: &str) -> Result<()> {
    let entries = orchestrator.directives().learnings(task)?;
    if entries.is_empty() {
        println!("{}", "No learnings recorded".cyan());
        return Ok(());
    }
    for entry in entries {
        println!(
            "#{} {} [{}] {}",
            entry.sequence,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.category.as_str().yellow(),
            entry.failure_summary
        );
        match &entry.tool_revision {
            Some(rev) => println!("    -> {} (tool rev {})", entry.resolution, rev),
            None => println!("    -> {}", entry.resolution),
        }
    }
    Ok(())
}

async fn handle_run_command(
    orchestrator: &Orchestrator,
    task: &str,
    pairs: &[String],
    json: Option<&str>,
    wait: bool,
) -> Result<()> {
    let inputs = cli::build_inputs(pairs, json)?;
    info!("Running {} with inputs {}", task, inputs);
    let cancel = cancel_on_ctrl_c();

    let mut report = orchestrator.run(task, inputs, &cancel).await?;
    while wait && let Some(id) = report.escalation_id() {
        let id = id.to_string();
        print_report(&report)?;
        println!("{}", "Waiting for operator decision (Ctrl-C to stop waiting)...".cyan());
        report = orchestrator.await_and_resume(&id, &cancel).await?;
    }
    print_report(&report)
}

fn handle_escalations_command(orchestrator: &Orchestrator, all: bool) -> Result<()> {
    let records = if all {
        orchestrator.escalations().all()?
    } else {
        orchestrator.escalations().pending()?
    };
    if records.is_empty() {
        println!("{}", "No escalations".cyan());
        return Ok(());
    }
    for record in &records {
        print_escalation(record);
    }
    Ok(())
}

fn print_escalation(record: &EscalationRecord) {
    let state = match (&record.decision, &record.resumed_at) {
        (None, _) => "pending".yellow(),
        (Some(_), Some(_)) => "resolved".green(),
        (Some(d), None) => format!("{:?}", d).to_lowercase().as_str().cyan(),
    };
    println!(
        "{} {} {} attempt {} at {}",
        record.id.bold(),
        state,
        record.task_id,
        record.attempt,
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("    cause: {}", record.cause);
    if let Some(note) = &record.note {
        println!("    note: {}", note);
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    let backoffs: Vec<String> = report
        .trace
        .backoffs
        .iter()
        .map(|d| format!("{}ms", d.as_millis()))
        .collect();
    let summary = format!(
        "{} attempt(s), backoffs [{}]",
        report.trace.attempts,
        backoffs.join(", ")
    );

    match &report.outcome {
        RunOutcome::Succeeded { value } => {
            println!("{} {} ({})", "Succeeded:".green(), report.task_id, summary);
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
        RunOutcome::Escalated { escalation_id, cause } => {
            println!("{} {} ({})", "Escalated:".yellow(), report.task_id, summary);
            println!("    cause: {}", cause);
            println!("    decide with `doe decide {} retry|abort`", escalation_id);
            Ok(())
        }
        RunOutcome::Failed { cause, learning } => {
            println!("{} {} ({})", "Failed:".red(), report.task_id, summary);
            println!("    cause: {}", cause);
            if let Some(learning) = learning {
                println!("    learning recorded: {}", learning);
            }
            if report.is_cancelled() {
                bail!("Run cancelled");
            }
            bail!("Run failed: {}", cause)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
