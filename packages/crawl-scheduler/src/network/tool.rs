use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ContextError;

/// Captured result of an external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    /// stdout followed by stderr, lossily decoded
    pub text: String,
}

/// Run `program args..` in `cwd`, killing it if it outlives `limit`.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<ToolOutput, ContextError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = match tokio::time::timeout(limit, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ContextError::Tool {
                tool: program.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ContextError::ToolTimeout {
                tool: program.to_string(),
                after: limit,
            })
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(ToolOutput {
        success: output.status.success(),
        text,
    })
}
