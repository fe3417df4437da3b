use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CommandError;

/// An external command backing an oracle or prediction service.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

/// Run `spec` with `input` appended as the final argument.
/// Returns the raw stdout text.
pub async fn invoke(spec: &CommandSpec, input: &str) -> Result<String, CommandError> {
    debug!(command = %spec.program, "Invoking external command");

    let result = tokio::time::timeout(spec.timeout, async {
        Command::new(&spec.program)
            .args(&spec.args)
            .arg(input)
            .kill_on_drop(true)
            .output()
            .await
    })
    .await
    .map_err(|_| CommandError::Timeout(spec.timeout.as_millis() as u64))?
    .map_err(|e| CommandError::Spawn {
        command: spec.program.clone(),
        reason: e.to_string(),
    })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(command = %spec.program, status = %result.status, stderr = %stderr, "External command failed");
        return Err(CommandError::Exit {
            command: spec.program.clone(),
            status: result.status.to_string(),
            stderr: stderr.to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&result.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(CommandError::Empty(spec.program.clone()));
    }

    Ok(stdout)
}
