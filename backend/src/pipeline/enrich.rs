use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use shared::{AnalysisResult, ResultStatus};
use std::collections::BTreeMap;

use super::RunContext;
use super::output::RawRunOutput;

/// Fills in the derived fields the inference script does not emit itself and
/// merges the run context (timestamps, image folder, file size) into the
/// final `AnalysisResult`.
pub fn enrich(raw: RawRunOutput, ctx: &RunContext) -> AnalysisResult {
    enrich_at(raw, ctx, Utc::now())
}

fn enrich_at(raw: RawRunOutput, ctx: &RunContext, now: DateTime<Utc>) -> AnalysisResult {
    let elapsed_secs = (now.timestamp_millis() - ctx.run_id_ms) as f64 / 1000.0;
    let processing_time = if elapsed_secs != 0.0 {
        elapsed_secs
    } else {
        raw.processing_time
            .or(raw.processing_time_secs)
            .unwrap_or(0.0)
    };

    let anomaly_score = match raw.anomaly_score {
        Some(score) => Some(score),
        None if raw.anomalies_flagged > 0 && raw.total_rows > 0 => Some(Value::String(format!(
            "{:.2}",
            raw.anomalies_flagged as f64 / raw.total_rows as f64
        ))),
        None => None,
    };

    let mut prediction_counts = raw.prediction_counts;
    let mut confidence_score = raw.confidence_score;
    if let Some(predictions) = &raw.cnn_predictions {
        if prediction_counts.is_none() {
            let counts = count_predictions(predictions);
            confidence_score = Some(Value::String(dominant_share(&counts)));
            prediction_counts = Some(counts);
        }
    }

    let status = if raw.error.is_some() {
        ResultStatus::Error
    } else {
        ResultStatus::Success
    };

    AnalysisResult {
        total_rows: raw.total_rows,
        anomalies_flagged: raw.anomalies_flagged,
        autoencoder_threshold: raw.autoencoder_threshold,
        reconstruction_errors: raw.reconstruction_errors,
        cnn_predictions: raw.cnn_predictions.unwrap_or_default(),
        anomaly_score,
        prediction_counts,
        confidence_score,
        processing_time_secs: Some(elapsed_secs),
        processing_time: Some(processing_time),
        image_folder: Some(ctx.image_folder.display().to_string()),
        file_size: Some(format!("{:.2}", ctx.file_size_mb)),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        status,
        error: raw.error,
        extra: raw.extra,
    }
}

/// Histogram of predicted classes across all rows, keyed by the stringified
/// class value so numeric and string labels from the script count alike.
fn count_predictions(predictions: &BTreeMap<String, Value>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for class in predictions.values() {
        let key = match class {
            Value::String(label) => label.clone(),
            other => other.to_string(),
        };
        *counts.entry(key).or_insert(0u64) += 1;
    }
    counts
}

/// Share of the dominant class, two decimals. Ties go to the smallest class
/// label; "0.00" when there are no predictions at all.
fn dominant_share(counts: &BTreeMap<String, u64>) -> String {
    let total: u64 = counts.values().sum();
    if total == 0 {
        return "0.00".to_string();
    }
    let mut dominant = 0u64;
    for &count in counts.values() {
        if count > dominant {
            dominant = count;
        }
    }
    format!("{:.2}", dominant as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn ctx_at(run_id_ms: i64) -> RunContext {
        RunContext {
            filename: "capture.csv".to_string(),
            file_path: PathBuf::from("/tmp/capture.csv"),
            run_id_ms,
            image_folder: PathBuf::from("/srv/images/1744725222254"),
            file_size_mb: 2.5,
            timeout: Duration::from_secs(600),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_744_725_230_254).unwrap()
    }

    fn raw(json: Value) -> RawRunOutput {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn anomaly_score_derived_from_counts() {
        let raw = raw(json!({ "total_rows": 100, "anomalies_flagged": 10 }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis() - 8000), now());
        assert_eq!(result.anomaly_score, Some(json!("0.10")));
    }

    #[test]
    fn anomaly_score_from_script_is_kept() {
        let raw = raw(json!({
            "total_rows": 100,
            "anomalies_flagged": 10,
            "anomaly_score": 0.42
        }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        assert_eq!(result.anomaly_score, Some(json!(0.42)));
    }

    #[test]
    fn anomaly_score_absent_when_nothing_flagged() {
        let raw = raw(json!({ "total_rows": 100, "anomalies_flagged": 0 }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        assert_eq!(result.anomaly_score, None);
    }

    #[test]
    fn prediction_counts_and_confidence_from_per_row_classes() {
        let raw = raw(json!({
            "total_rows": 3,
            "cnn_predictions": { "0": "1", "1": "1", "2": "0" }
        }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        let counts = result.prediction_counts.unwrap();
        assert_eq!(counts.get("1"), Some(&2));
        assert_eq!(counts.get("0"), Some(&1));
        assert_eq!(result.confidence_score, Some(json!("0.67")));
    }

    #[test]
    fn numeric_class_labels_count_like_strings() {
        let raw = raw(json!({
            "cnn_predictions": { "0": 1, "1": "1", "2": 0 }
        }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        let counts = result.prediction_counts.unwrap();
        assert_eq!(counts.get("1"), Some(&2));
        assert_eq!(counts.get("0"), Some(&1));
    }

    #[test]
    fn empty_prediction_map_gives_zero_confidence() {
        let raw = raw(json!({ "total_rows": 0, "cnn_predictions": {} }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        assert_eq!(result.prediction_counts, Some(BTreeMap::new()));
        assert_eq!(result.confidence_score, Some(json!("0.00")));
    }

    #[test]
    fn counts_from_script_suppress_derivation() {
        let raw = raw(json!({
            "cnn_predictions": { "0": "1" },
            "prediction_counts": { "1": 7 }
        }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        assert_eq!(result.prediction_counts.unwrap().get("1"), Some(&7));
        assert_eq!(result.confidence_score, None);
    }

    #[test]
    fn confidence_tie_breaks_to_smallest_label() {
        assert_eq!(
            dominant_share(&BTreeMap::from([
                ("0".to_string(), 2u64),
                ("1".to_string(), 2u64)
            ])),
            "0.50"
        );
    }

    #[test]
    fn run_context_is_merged() {
        let run_started = now().timestamp_millis() - 8000;
        let result = enrich_at(raw(json!({ "total_rows": 1 })), &ctx_at(run_started), now());
        assert_eq!(result.processing_time_secs, Some(8.0));
        assert_eq!(result.processing_time, Some(8.0));
        assert_eq!(
            result.image_folder.as_deref(),
            Some("/srv/images/1744725222254")
        );
        assert_eq!(result.file_size.as_deref(), Some("2.50"));
        assert_eq!(result.status, ResultStatus::Success);
        assert!(result.timestamp.ends_with('Z'));
    }

    #[test]
    fn script_error_flips_status_without_aborting() {
        let raw = raw(json!({ "total_rows": 0, "error": "model file missing" }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.error.as_deref(), Some("model file missing"));
    }

    #[test]
    fn upstream_processing_time_used_when_elapsed_is_zero() {
        let raw = raw(json!({ "total_rows": 1, "processing_time": 3.5 }));
        let result = enrich_at(raw, &ctx_at(now().timestamp_millis()), now());
        assert_eq!(result.processing_time, Some(3.5));
        assert_eq!(result.processing_time_secs, Some(0.0));
    }
}
