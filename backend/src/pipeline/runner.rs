use log::{debug, error, info};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::config::PipelineConfig;
use crate::error::PipelineError;

/// Stages the input into the fixed slot the inference script reads from,
/// then runs the script to completion or timeout, whichever settles first.
/// Returns the accumulated stdout of a successful run.
pub async fn execute(
    config: &PipelineConfig,
    input: &Path,
    image_folder: &Path,
    timeout: Duration,
) -> Result<String, PipelineError> {
    let staging = config.staging_csv();
    tokio::fs::copy(input, &staging)
        .await
        .map_err(PipelineError::Stage)?;
    info!("Copied {} to {}", input.display(), staging.display());

    let mut command = Command::new(&config.python_command);
    command
        .arg(config.inference_script())
        .arg("--csv")
        .arg(&staging)
        .arg("--autoencoder")
        .arg(config.autoencoder_model())
        .arg("--cnn")
        .arg(config.cnn_model())
        .arg("--image_folder")
        .arg(image_folder);
    collect_with_timeout(command, timeout).await
}

/// Spawns the command with piped stdio, accumulates stdout/stderr on reader
/// tasks as data arrives, and races process exit against the wall-clock
/// budget. The timeout path kills the child; `kill_on_drop` backstops any
/// other way the child could outlive this future.
pub async fn collect_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<String, PipelineError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(PipelineError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PipelineError::Spawn(std::io::Error::other("stdout pipe unavailable")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PipelineError::Spawn(std::io::Error::other("stderr pipe unavailable")))?;

    let stdout_task = tokio::spawn(drain(stdout, "stdout"));
    let stderr_task = tokio::spawn(drain(stderr, "stderr"));

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = tokio::time::sleep(timeout) => {
            error!("Inference process exceeded its {}s budget, killing it", timeout.as_secs());
            if let Err(err) = child.kill().await {
                error!("Failed to kill timed-out inference process: {err}");
            }
            return Err(PipelineError::Timeout(timeout_minutes(timeout)));
        }
    };

    let stdout_buf = stdout_task.await.unwrap_or_default();
    let stderr_buf = stderr_task.await.unwrap_or_default();
    info!("Inference process exited with {status}");

    if status.success() {
        Ok(String::from_utf8_lossy(&stdout_buf).into_owned())
    } else {
        Err(PipelineError::ExitFailure {
            code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        })
    }
}

pub fn timeout_minutes(timeout: Duration) -> u64 {
    timeout.as_secs() / 60
}

/// Accumulates one of the child's output streams, logging chunks as they
/// arrive so long runs stay observable. Bytes are joined before any UTF-8
/// conversion of the final buffer, so multi-byte characters split across
/// read boundaries survive.
async fn drain<R: AsyncRead + Unpin>(mut reader: R, stream: &'static str) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                debug!(
                    "python {stream}: {}",
                    String::from_utf8_lossy(&chunk[..n]).trim_end()
                );
                collected.extend_from_slice(&chunk[..n]);
            }
        }
    }
    collected
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn collects_stdout_of_a_clean_exit() {
        let out = collect_with_timeout(
            sh("echo loading; echo '{\"total_rows\": 3}'"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(out.contains("loading"));
        assert!(out.contains("{\"total_rows\": 3}"));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let err = collect_with_timeout(
            sh("echo 'traceback: boom' >&2; exit 3"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            PipelineError::ExitFailure { code, ref stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("traceback: boom"));
            }
            other => panic!("expected exit failure, got {other}"),
        }
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let started = std::time::Instant::now();
        let err = collect_with_timeout(sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
        // The race settles at the budget, not at process exit.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_message_names_minutes() {
        let err = PipelineError::Timeout(timeout_minutes(Duration::from_secs(15 * 60)));
        assert_eq!(err.to_string(), "Processing timed out after 15 minutes");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let err = collect_with_timeout(
            Command::new("/nonexistent/netguardian-python"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Spawn(_)));
    }
}
