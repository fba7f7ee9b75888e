use anyhow::{Context, Result};
use etl_pipeline::catalog::standard_catalog;
use etl_pipeline::cli::commands::{
    CheckpointStoreArg, CheckpointsCommand, RunCommand, ValidateCommand,
};
use etl_pipeline::cli::output::*;
use etl_pipeline::cli::{Cli, Command};
use etl_pipeline::core::{NameSource, Pipeline};
use etl_pipeline::execution::{ExecutionEngine, ExecutionEvent};
use etl_pipeline::persistence::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use std::path::Path;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Checkpoints(cmd) => manage_checkpoints(cmd).await?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let document = cmd
        .document
        .load()
        .context("Failed to load pipeline document")?;
    let mut pipeline = Pipeline::from_document(&document).context("Invalid pipeline")?;

    println!(
        "{} Loaded pipeline: {} ({} steps)",
        INFO,
        style(&pipeline.name).bold(),
        style(pipeline.steps.len()).cyan()
    );

    let store = open_store(cmd.checkpoint_store, cmd.checkpoint_db.as_deref()).await?;
    let mut engine = ExecutionEngine::new(Arc::new(standard_catalog()), store);

    // Set up event handler for console output
    let progress = (!cmd.no_progress).then(|| create_progress_bar(pipeline.steps.len()));
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        let line = format_execution_event(&event);
        match &bar {
            Some(bar) => {
                if matches!(event, ExecutionEvent::StepCompleted { .. }) {
                    bar.inc(1);
                }
                if let ExecutionEvent::StepStarted { step, .. } = &event {
                    bar.set_message(step.clone());
                }
                bar.println(line);
            }
            None => println!("{}", line),
        }
    });

    // Execute pipeline
    println!();
    let result = engine.execute(&mut pipeline).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    match result {
        Ok(context) => {
            println!(
                "\n{} {} {}: {} steps ({} computed, {} restored)",
                CHECK,
                style(&pipeline.name).bold(),
                format_status(pipeline.state.status),
                pipeline.state.completed_steps(),
                pipeline.state.computed_steps,
                pipeline.state.restored_steps
            );
            if let Some(last) = pipeline.steps.last() {
                if let Some(output) = context.output(&last.name) {
                    println!(
                        "  {} {}",
                        style(&last.name).dim(),
                        format_value_preview(output, 120)
                    );
                }
            }
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                format_status(pipeline.state.status)
            );
            for step in &pipeline.steps {
                println!("  {} {}", format_step_state(&step.state), step.name);
            }
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn open_store(kind: CheckpointStoreArg, db: Option<&Path>) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match kind {
        CheckpointStoreArg::File => Arc::new(FileCheckpointStore::new()),
        CheckpointStoreArg::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointStoreArg::Sqlite => open_sqlite(db).await?,
    };
    Ok(store)
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(db: Option<&Path>) -> Result<Arc<dyn CheckpointStore>> {
    Ok(Arc::new(sqlite_store(db).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_db: Option<&Path>) -> Result<Arc<dyn CheckpointStore>> {
    anyhow::bail!("SQLite checkpoints need the `sqlite` feature")
}

#[cfg(feature = "sqlite")]
async fn sqlite_store(db: Option<&Path>) -> Result<etl_pipeline::persistence::SqliteCheckpointStore> {
    use etl_pipeline::persistence::SqliteCheckpointStore;

    match db {
        Some(path) => SqliteCheckpointStore::new(&path.to_string_lossy()).await,
        None => SqliteCheckpointStore::with_default_path().await,
    }
    .context("Failed to open checkpoint database")
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = cmd
        .document
        .load()
        .map_err(anyhow::Error::from)
        .and_then(|document| Pipeline::from_document(&document).map_err(anyhow::Error::from));

    match result {
        Ok(pipeline) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Steps: {}", style(pipeline.steps.len()).cyan());
            println!("  Variables: {}", style(pipeline.variables.len()).cyan());
            println!("  Connections: {}", style(pipeline.connections.len()).cyan());

            for (index, step) in pipeline.steps.iter().enumerate() {
                let derived = match step.name_source {
                    NameSource::Explicit => String::new(),
                    NameSource::Derived => style(" (derived)").dim().to_string(),
                };
                println!(
                    "  {}. {}{} -> {}",
                    index + 1,
                    style(&step.name).bold(),
                    derived,
                    style(step.function.reference_text()).dim()
                );
            }

            if cmd.json {
                let steps: Vec<_> = pipeline
                    .steps
                    .iter()
                    .map(|step| {
                        serde_json::json!({
                            "name": step.name,
                            "function": step.function.reference_text(),
                            "aliases": step.aliases,
                            "saveProgress": step.save_progress.as_ref().map(|p| p.render()),
                            "resumeFromSaved": step.resume_from_saved,
                        })
                    })
                    .collect();
                let data = serde_json::json!({
                    "name": pipeline.name,
                    "variables": pipeline.variables.keys().collect::<Vec<_>>(),
                    "connections": pipeline.connections.keys().collect::<Vec<_>>(),
                    "steps": steps,
                });
                println!("\n{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "sqlite")]
async fn manage_checkpoints(cmd: &CheckpointsCommand) -> Result<()> {
    use etl_pipeline::cli::commands::CheckpointsAction;

    let store = sqlite_store(cmd.checkpoint_db.as_deref()).await?;

    match &cmd.action {
        CheckpointsAction::List { json } => {
            let summaries = store.list().await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("{} No checkpoints saved", INFO);
            } else {
                println!("{} Saved checkpoints:", INFO);
                for summary in &summaries {
                    println!("  {}", format_checkpoint_summary(summary));
                }
            }
        }
        CheckpointsAction::Delete { path } => {
            if store.delete(path).await? {
                println!("{} Deleted checkpoint {}", CHECK, style(path).bold());
            } else {
                println!("{} No checkpoint saved at {}", WARN, style(path).bold());
            }
        }
    }

    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn manage_checkpoints(_cmd: &CheckpointsCommand) -> Result<()> {
    anyhow::bail!("Checkpoint management needs the `sqlite` feature")
}
