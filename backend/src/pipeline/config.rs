use std::env;
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem layout and external-program settings for the processing
/// pipeline. Everything hangs off one data root: uploads staging, per-run
/// image output, the inference script, and the model files it loads.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub uploads_dir: PathBuf,
    pub images_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub models_dir: PathBuf,
    pub python_command: String,
}

impl PipelineConfig {
    pub fn rooted(root: &Path) -> Self {
        Self {
            uploads_dir: root.join("uploads"),
            images_dir: root.join("images"),
            scripts_dir: root.join("scripts"),
            models_dir: root.join("models"),
            python_command: "python".to_string(),
        }
    }

    pub fn from_env() -> Self {
        let root = env::var("NETGUARDIAN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let mut config = Self::rooted(&root);
        if let Ok(python) = env::var("PYTHON_COMMAND") {
            config.python_command = python;
        }
        config
    }

    /// Creates the uploads and images directories if absent. Scripts and
    /// models are deployed alongside the server, not created here.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(&self.images_dir)?;
        Ok(())
    }

    pub fn inference_script(&self) -> PathBuf {
        self.scripts_dir.join("iot_botnet_inference.py")
    }

    /// Fixed input slot the inference script reads from. One slot for the
    /// whole process: concurrent runs overwrite each other's input.
    pub fn staging_csv(&self) -> PathBuf {
        self.scripts_dir.join("final_aggregated.csv")
    }

    pub fn autoencoder_model(&self) -> PathBuf {
        self.models_dir.join("autoencoder_model.h5")
    }

    pub fn cnn_model(&self) -> PathBuf {
        self.models_dir.join("cnn_model_balanced_50k.pth")
    }
}
