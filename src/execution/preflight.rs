//! Preflight script runner - runs the document's `preFlight.script` once

use crate::core::error::PreflightError;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs a preflight script before the first step
#[async_trait::async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script: &str) -> Result<(), PreflightError>;
}

/// Runs scripts with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellScriptRunner {
    /// Timeout for the script in seconds
    timeout_secs: u64,
}

impl ShellScriptRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Default for ShellScriptRunner {
    fn default() -> Self {
        Self::new(300)
    }
}

#[async_trait::async_trait]
impl ScriptRunner for ShellScriptRunner {
    async fn run(&self, script: &str) -> Result<(), PreflightError> {
        debug!("Running preflight script ({} bytes)", script.len());

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new("sh")
                .arg("-c")
                .arg(script)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| PreflightError::Timeout(self.timeout_secs))?;

        let output = result.map_err(|e| PreflightError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!("Preflight script exited with code {}: {}", code, stderr);
            return Err(PreflightError::Failed { code, stderr });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Preflight output: {}", stdout.trim());
        }
        Ok(())
    }
}
