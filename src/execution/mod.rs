//! Pipeline execution engine

pub mod checkpoint;
pub mod engine;
pub mod function;
pub mod preflight;

pub use checkpoint::{decide, CheckpointDecision, CheckpointManager};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use function::FunctionResolver;
pub use preflight::{ScriptRunner, ShellScriptRunner};
