//! CLI output formatting

use crate::{
    core::{ExecutionStatus, OutputSource, StepState, Value},
    execution::ExecutionEvent,
    persistence::CheckpointSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static DISK: Emoji<'_, '_> = Emoji("💾 ", "* ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed {
            source: OutputSource::Computed,
            ..
        } => style("COMPLETED").green().to_string(),
        StepState::Completed {
            source: OutputSource::Restored,
            ..
        } => style("RESTORED").cyan().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} ({} steps, run {})",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::PreflightCompleted => format!("{} Preflight script finished", CHECK),
        ExecutionEvent::StepStarted {
            step, description, ..
        } => match description {
            Some(description) => format!(
                "{} {} {}",
                SPINNER,
                style(step).cyan(),
                style(format!("({})", description)).dim()
            ),
            None => format!("{} {}", SPINNER, style(step).cyan()),
        },
        ExecutionEvent::StepRestored { step, path } => format!(
            "{} {} restored from {}",
            DISK,
            style(step).cyan(),
            style(path).dim()
        ),
        ExecutionEvent::CheckpointSaved {
            step,
            path,
            overwrite,
        } => {
            if *overwrite {
                format!(
                    "{} {} overwrote checkpoint {}",
                    WARN,
                    style(step).yellow(),
                    style(path).dim()
                )
            } else {
                format!(
                    "{} {} saved to {}",
                    DISK,
                    style(step).cyan(),
                    style(path).dim()
                )
            }
        }
        ExecutionEvent::StepCompleted { step, source } => match source {
            OutputSource::Computed => format!("{} {}", CHECK, style(step).green()),
            OutputSource::Restored => format!(
                "{} {} {}",
                CHECK,
                style(step).green(),
                style("(from checkpoint)").dim()
            ),
        },
        ExecutionEvent::StepFailed { step, error } => {
            format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
        }
        ExecutionEvent::PipelineCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                _ => format!("{:?}", status),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// One line per stored checkpoint
pub fn format_checkpoint_summary(summary: &CheckpointSummary) -> String {
    format!(
        "{} {} {} {}",
        DISK,
        style(&summary.path).bold(),
        style(summary.kind).cyan(),
        style(summary.saved_at.to_rfc3339()).dim()
    )
}

/// Render a value, cut to `max_chars` characters
pub fn format_value_preview(value: &Value, max_chars: usize) -> String {
    let rendered = value.render();
    if rendered.chars().count() <= max_chars {
        return rendered;
    }
    let truncated: String = rendered.chars().take(max_chars).collect();
    format!("{}{}", truncated, style("...").dim())
}
