pub mod config;
pub mod enrich;
pub mod output;
pub mod runner;

use chrono::{SecondsFormat, Utc};
use log::{error, info, warn};
use shared::AnalysisResult;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::store::ResultStore;
use config::PipelineConfig;

/// Hard ceiling on files accepted by `/api/process`; checked against the
/// size on disk, not the upload limit.
pub const MAX_PROCESS_SIZE_MB: f64 = 100.0;
/// Files above this size get the long timeout budget.
pub const LARGE_FILE_THRESHOLD_MB: f64 = 15.0;
pub const LARGE_FILE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub fn timeout_budget(file_size_mb: f64) -> Duration {
    if file_size_mb > LARGE_FILE_THRESHOLD_MB {
        LARGE_FILE_TIMEOUT
    } else {
        DEFAULT_TIMEOUT
    }
}

/// Everything one run needs once the dispatcher has acknowledged the caller.
/// The run id is the millisecond timestamp that also names the image folder.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub filename: String,
    pub file_path: PathBuf,
    pub run_id_ms: i64,
    pub image_folder: PathBuf,
    pub file_size_mb: f64,
    pub timeout: Duration,
}

/// Drives one run end to end on a background task: execute the inference
/// script, interpret its stdout, enrich the result, and publish it. Every
/// failure lands in the store as a terminal error result; nothing here
/// propagates back to the HTTP caller, who already got the 202.
pub async fn run(store: ResultStore, config: PipelineConfig, ctx: RunContext) {
    match execute_and_interpret(&config, &ctx).await {
        Ok(raw) => {
            if let Some(script_error) = raw.error.as_deref() {
                warn!("Inference script reported an error: {script_error}");
            }
            let result = enrich::enrich(raw, &ctx);
            store.publish(&ctx.filename, result);
            info!("Processing completed for {}", ctx.filename);
        }
        Err(err) => {
            error!("Processing failed for {}: {err}", ctx.filename);
            let result = AnalysisResult::failure(
                err.to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            );
            store.publish_failure(&ctx.filename, result);
        }
    }
}

async fn execute_and_interpret(
    config: &PipelineConfig,
    ctx: &RunContext,
) -> Result<output::RawRunOutput, PipelineError> {
    let stdout = runner::execute(config, &ctx.file_path, &ctx.image_folder, ctx.timeout).await?;
    output::extract(&stdout)
}
