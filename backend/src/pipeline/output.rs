use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::PipelineError;

/// The JSON object the inference script prints on stdout. Only the fields
/// the enricher cares about are typed; anything else passes through `extra`
/// untouched. The script may set `error` and still exit 0, in which case the
/// run completes with an error-status result.
#[derive(Debug, Default, Deserialize)]
pub struct RawRunOutput {
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub anomalies_flagged: u64,
    #[serde(default = "default_threshold")]
    pub autoencoder_threshold: f64,
    #[serde(default)]
    pub reconstruction_errors: Vec<f64>,
    pub cnn_predictions: Option<BTreeMap<String, Value>>,
    pub anomaly_score: Option<Value>,
    pub prediction_counts: Option<BTreeMap<String, u64>>,
    pub confidence_score: Option<Value>,
    #[serde(rename = "processingTime")]
    pub processing_time_secs: Option<f64>,
    pub processing_time: Option<f64>,
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_threshold() -> f64 {
    shared::DEFAULT_AUTOENCODER_THRESHOLD
}

/// Pulls the result object out of mixed stdout text: everything before the
/// first `{` is treated as diagnostics and discarded, the rest must parse as
/// JSON. The script's output discipline is unverified, so this stays lenient
/// on purpose.
pub fn extract(stdout: &str) -> Result<RawRunOutput, PipelineError> {
    let start = stdout.find('{').ok_or(PipelineError::NoJsonOutput)?;
    let raw = serde_json::from_str(stdout[start..].trim_end())?;
    Ok(raw)
}
