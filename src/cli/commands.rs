//! CLI command definitions

use crate::core::config::{parse_command_line_variables, PipelineDocument};
use crate::core::error::ConfigError;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Where the pipeline document comes from
#[derive(Debug, Args, Clone)]
pub struct DocumentArgs {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Additional documents merged after the document's own imports
    #[arg(long, num_args = 1..)]
    pub imports: Vec<PathBuf>,

    /// Variable overrides (name=value)
    #[arg(long = "var")]
    pub vars: Vec<String>,
}

impl DocumentArgs {
    /// Load, merge and apply command-line variables
    pub fn load(&self) -> Result<PipelineDocument, ConfigError> {
        let overrides = parse_command_line_variables(self.vars.as_slice())?;
        let mut document = PipelineDocument::from_file(&self.file, &self.imports)?;
        document.apply_overrides(overrides);
        Ok(document)
    }
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub document: DocumentArgs,

    /// Where step checkpoints are kept
    #[arg(long, value_enum, default_value_t = CheckpointStoreArg::File)]
    pub checkpoint_store: CheckpointStoreArg,

    /// SQLite database for `--checkpoint-store sqlite`
    #[arg(long)]
    pub checkpoint_db: Option<PathBuf>,

    /// Print events line by line instead of a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    #[command(flatten)]
    pub document: DocumentArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Inspect the SQLite checkpoint store
#[derive(Debug, Args, Clone)]
pub struct CheckpointsCommand {
    #[command(subcommand)]
    pub action: CheckpointsAction,

    /// SQLite database (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub checkpoint_db: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CheckpointsAction {
    /// List stored checkpoints, newest first
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete the checkpoint saved under a path
    Delete {
        /// Checkpoint path as written by `saveProgress`
        path: String,
    },
}

/// Checkpoint store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CheckpointStoreArg {
    /// One JSON file per checkpoint path
    File,
    /// Rows in a SQLite database
    Sqlite,
    /// Kept for this process only
    Memory,
}
