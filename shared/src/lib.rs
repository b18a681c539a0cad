use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Reconstruction-error threshold reported when a run fails before the
/// inference script could produce one.
pub const DEFAULT_AUTOENCODER_THRESHOLD: f64 = 0.05;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub originalname: String,
    pub path: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessRequest {
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessAck {
    pub message: String,
    pub status: String,
    pub timestamp: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Enriched outcome of one inference run. The process keeps exactly one of
/// these at a time; a new run overwrites it wholesale.
///
/// Field names follow the wire format the frontend polls for, which mixes
/// snake_case (inference script output) and camelCase (run context merged in
/// by the server). Unrecognized fields emitted by the script pass through
/// via `extra`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    pub total_rows: u64,
    pub anomalies_flagged: u64,
    pub autoencoder_threshold: f64,
    pub reconstruction_errors: Vec<f64>,
    pub cnn_predictions: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_counts: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<Value>,
    #[serde(rename = "processingTime", skip_serializing_if = "Option::is_none")]
    pub processing_time_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(rename = "imageFolder", skip_serializing_if = "Option::is_none")]
    pub image_folder: Option<String>,
    #[serde(rename = "fileSize", skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
    pub timestamp: String,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    /// Minimal terminal-error result used when a run fails before producing
    /// parseable output: zeroed totals, the failure message, status `error`.
    pub fn failure(error: String, timestamp: String) -> Self {
        Self {
            total_rows: 0,
            anomalies_flagged: 0,
            autoencoder_threshold: DEFAULT_AUTOENCODER_THRESHOLD,
            reconstruction_errors: Vec::new(),
            cnn_predictions: BTreeMap::new(),
            anomaly_score: None,
            prediction_counts: None,
            confidence_score: None,
            processing_time_secs: None,
            processing_time: None,
            image_folder: None,
            file_size: None,
            timestamp,
            status: ResultStatus::Error,
            error: Some(error),
            extra: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ResultStatus::Success | ResultStatus::Error)
    }
}
