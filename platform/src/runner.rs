use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use volmount_core::{CommandRunner, Invocation, Result, VolumeError};

/// Runs programs directly (no shell) with `tokio::process`.
///
/// Stdin is closed so a program waiting for input sees EOF instead of
/// hanging. The child is spawned with `kill_on_drop`, so a deadline expiry or
/// a cancelled caller kills it; tokio reaps it afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, deadline: Duration, invocation: &Invocation) -> Result<String> {
        debug!(command = %invocation, ?deadline, "Running command");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VolumeError::Command {
                program: invocation.program.clone(),
                output: String::new(),
                reason: format!("failed to start: {}", e),
            })?;

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| VolumeError::Command {
                program: invocation.program.clone(),
                output: String::new(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                return Err(VolumeError::Timeout {
                    what: invocation.to_string(),
                    after: deadline,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = [stdout.as_str(), stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        Err(VolumeError::Command {
            program: invocation.program.clone(),
            output: combined,
            reason: output.status.to_string(),
        })
    }
}
