use chrono::Utc;
use shared::AnalysisResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The server keeps exactly one latest result process-wide. Concurrent runs
/// race on this slot and the last one to finish wins; `/api/results` always
/// serves whatever is in it, regardless of the filename queried.
pub const RESULT_SLOTS: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    Uploaded,
    Processing,
    Completed,
    Error,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Uploaded => "uploaded",
            FileState::Processing => "processing",
            FileState::Completed => "completed",
            FileState::Error => "error",
        }
    }
}

/// Per-filename processing record. Later writes overwrite earlier ones.
#[derive(Clone, Debug)]
pub struct FileStatus {
    pub state: FileState,
    pub file_path: Option<String>,
    pub error: Option<String>,
    pub uploaded_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl FileStatus {
    fn new(state: FileState) -> Self {
        Self {
            state,
            file_path: None,
            error: None,
            uploaded_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Answer for a status poll, see [`ResultStore::poll`].
#[derive(Clone, Debug, PartialEq)]
pub enum StatusSnapshot {
    Completed { error: Option<String> },
    InFlight(FileState),
    Unknown,
}

/// Process-wide mutable state: the single latest `AnalysisResult` plus the
/// filename-keyed status map. All writes happen as side effects of the
/// upload and processing stages; the polling endpoints only read.
#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    latest: Option<AnalysisResult>,
    status: HashMap<String, FileStatus>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_uploaded(&self, filename: &str, file_path: &str) {
        let mut entry = FileStatus::new(FileState::Uploaded);
        entry.uploaded_at = Some(Utc::now().timestamp_millis());
        entry.file_path = Some(file_path.to_string());
        self.inner.lock().unwrap().status.insert(filename.to_string(), entry);
    }

    pub fn mark_processing(&self, filename: &str) {
        let mut entry = FileStatus::new(FileState::Processing);
        entry.started_at = Some(Utc::now().timestamp_millis());
        self.inner.lock().unwrap().status.insert(filename.to_string(), entry);
    }

    /// Terminal status without a result, used when validation fails after the
    /// file was already marked `processing` (e.g. the 100MB ceiling).
    pub fn mark_error(&self, filename: &str, error: &str) {
        let mut entry = FileStatus::new(FileState::Error);
        entry.error = Some(error.to_string());
        entry.completed_at = Some(Utc::now().timestamp_millis());
        self.inner.lock().unwrap().status.insert(filename.to_string(), entry);
    }

    /// Install a finished run as the latest result and mark the filename
    /// `completed`. Runs whose payload carries an inference-script error
    /// still count as completed; the error travels inside the result.
    pub fn publish(&self, filename: &str, result: AnalysisResult) {
        let mut entry = FileStatus::new(FileState::Completed);
        entry.completed_at = Some(Utc::now().timestamp_millis());
        let mut inner = self.inner.lock().unwrap();
        inner.latest = Some(result);
        inner.status.insert(filename.to_string(), entry);
    }

    /// Install a failed run: the synthesized error result replaces the latest
    /// slot and the filename is marked `error`.
    pub fn publish_failure(&self, filename: &str, result: AnalysisResult) {
        let mut entry = FileStatus::new(FileState::Error);
        entry.error = result.error.clone();
        entry.completed_at = Some(Utc::now().timestamp_millis());
        let mut inner = self.inner.lock().unwrap();
        inner.latest = Some(result);
        inner.status.insert(filename.to_string(), entry);
    }

    pub fn latest(&self) -> Option<AnalysisResult> {
        self.inner.lock().unwrap().latest.clone()
    }

    /// Status as seen by `/api/processing-status`. A terminal latest result
    /// answers `completed` for any filename, because only [`RESULT_SLOTS`]
    /// result exists; otherwise the filename's own record answers.
    pub fn poll(&self, filename: &str) -> StatusSnapshot {
        let inner = self.inner.lock().unwrap();
        if let Some(latest) = &inner.latest {
            if latest.is_terminal() {
                return StatusSnapshot::Completed {
                    error: latest.error.clone(),
                };
            }
        }
        match inner.status.get(filename) {
            Some(entry) => StatusSnapshot::InFlight(entry.state),
            None => StatusSnapshot::Unknown,
        }
    }

    pub fn status_of(&self, filename: &str) -> Option<FileStatus> {
        self.inner.lock().unwrap().status.get(filename).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(msg: &str) -> AnalysisResult {
        AnalysisResult::failure(msg.to_string(), Utc::now().to_rfc3339())
    }

    #[test]
    fn poll_unknown_without_any_state() {
        let store = ResultStore::new();
        assert_eq!(store.poll("a.csv"), StatusSnapshot::Unknown);
    }

    #[test]
    fn poll_reports_filename_state_before_any_result() {
        let store = ResultStore::new();
        store.mark_uploaded("a.csv", "/tmp/a.csv");
        assert_eq!(
            store.poll("a.csv"),
            StatusSnapshot::InFlight(FileState::Uploaded)
        );
        store.mark_processing("a.csv");
        assert_eq!(
            store.poll("a.csv"),
            StatusSnapshot::InFlight(FileState::Processing)
        );
        // Never "completed" before a terminal result exists.
        assert_eq!(store.poll("other.csv"), StatusSnapshot::Unknown);
    }

    #[test]
    fn terminal_result_answers_completed_for_any_filename() {
        let store = ResultStore::new();
        store.publish_failure("a.csv", failed("boom"));
        let expected = StatusSnapshot::Completed {
            error: Some("boom".to_string()),
        };
        assert_eq!(store.poll("a.csv"), expected);
        // Single result slot: the filename is never used to disambiguate.
        assert_eq!(store.poll("unrelated.csv"), expected);
    }

    #[test]
    fn latest_result_is_a_single_overwritten_slot() {
        assert_eq!(RESULT_SLOTS, 1);
        let store = ResultStore::new();
        store.publish_failure("a.csv", failed("first"));
        store.publish_failure("b.csv", failed("second"));
        let latest = store.latest().unwrap();
        assert_eq!(latest.error.as_deref(), Some("second"));
        // Reads are idempotent until the next publish.
        assert_eq!(store.latest(), store.latest());
    }

    #[test]
    fn oversized_rejection_is_terminal_for_the_filename() {
        let store = ResultStore::new();
        store.mark_processing("big.csv");
        store.mark_error("big.csv", "File too large. Maximum allowed size is 100MB.");
        let status = store.status_of("big.csv").unwrap();
        assert_eq!(status.state, FileState::Error);
        assert!(status.error.unwrap().contains("File too large"));
        // No result was ever produced, so polls fall back to the status map.
        assert_eq!(
            store.poll("big.csv"),
            StatusSnapshot::InFlight(FileState::Error)
        );
    }
}
