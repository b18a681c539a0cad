use std::io;

/// Failures from the background stages of a run. These never surface as an
/// HTTP error on `/api/process` (which has already answered 202); they are
/// converted into a terminal error `AnalysisResult` and a status entry.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to stage input file: {0}")]
    Stage(#[source] io::Error),
    #[error("Failed to start inference process: {0}")]
    Spawn(#[source] io::Error),
    #[error("I/O error while running inference process: {0}")]
    Io(#[from] io::Error),
    #[error("Processing failed with exit code {code}. Error: {stderr}")]
    ExitFailure { code: i32, stderr: String },
    #[error("Processing timed out after {0} minutes")]
    Timeout(u64),
    #[error("Invalid output from Python script")]
    NoJsonOutput,
    #[error("Failed to parse JSON output: {0}")]
    Parse(#[from] serde_json::Error),
}
