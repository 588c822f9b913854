//! Command execution primitives with consistent error handling.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run a command in a specific directory.
///
/// Returns trimmed stdout if the command succeeds.
/// Returns an error with stderr (or stdout fallback) if it fails.
pub async fn run_in(dir: &Path, program: &str, args: &[&str], context: &str) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", context, e),
                Some(context.to_string()),
            )
        })?;

    require_success(&output, context)
}

/// Run a command in a directory, killing it if `cancel` fires first.
///
/// Returns `Ok(None)` on cancellation, `Ok(Some(stdout))` on success.
pub async fn run_in_cancellable(
    dir: &Path,
    program: &str,
    args: &[&str],
    context: &str,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }

    // kill_on_drop reclaims the child when the select below drops the
    // output future on cancellation.
    let pending = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(None),
        output = pending => output,
    };

    let output = output.map_err(|e| {
        Error::internal_io(
            format!("Failed to run {}: {}", context, e),
            Some(context.to_string()),
        )
    })?;

    require_success(&output, context).map(Some)
}

fn require_success(output: &Output, context: &str) -> Result<String> {
    if !output.status.success() {
        return Err(Error::internal_io(
            format!("{} failed: {}", context, error_text(output)),
            Some(context.to_string()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

/// Build `<shell> -c <command>` with piped output, ready to spawn.
pub fn shell_command(shell: &str, command: &str, dir: &Path) -> Command {
    let mut cmd = Command::new(shell);
    cmd.args(["-c", command])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Forward every line of a child stream into the log under the `deploy`
/// target. The task ends when the stream closes.
pub fn forward_lines<R>(reader: R, stream: &'static str, pid: u32) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::info!(target: "deploy", pid, stream, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(pid, stream, error = %e, "Error reading deploy output");
                    break;
                }
            }
        }
    })
}
