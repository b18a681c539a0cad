use chrono::Utc;
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Upload ceiling enforced while draining the multipart field, before
/// anything touches the staging directory.
pub const MAX_UPLOAD_BYTES: usize = 30 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to persist upload: {0}")]
    Io(#[from] io::Error),
}

/// Staging-directory storage for uploaded CSVs. Files are written under a
/// collision-resistant generated name and never cleaned up; the directory
/// grows unbounded, which is the documented behavior of this system.
#[derive(Clone)]
pub struct DiskStorage {
    uploads_dir: PathBuf,
}

impl DiskStorage {
    pub fn new(uploads_dir: PathBuf) -> Self {
        Self { uploads_dir }
    }

    /// Upload filter, applied before storage: the declared MIME type must be
    /// `text/csv`, or the original name must end in `.csv`.
    pub fn accepts(original_name: &str, content_type: Option<&str>) -> bool {
        content_type == Some("text/csv") || original_name.ends_with(".csv")
    }

    /// `<field>-<millis>-<random suffix><original extension>`, so repeated
    /// uploads of the same file never collide in the staging directory.
    pub fn generated_name(field: &str, original_name: &str) -> String {
        let unique_suffix = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            rand::rng().random_range(0..1_000_000_000u32)
        );
        let extension = Path::new(original_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        format!("{field}-{unique_suffix}{extension}")
    }

    pub fn persist(&self, generated_name: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.uploads_dir.join(generated_name);
        fs::write(&path, data)?;
        Ok(path)
    }
}
