use std::path::{Path, PathBuf};

use anyhow::Context;
use config::{Config, Environment, File};
use ort_common::ModelVariant;
use serde::Deserialize;

/// Server settings: built-in defaults, then an optional config file, then
/// `WEB_ORT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    pub bind: String,
    pub models_dir: PathBuf,
    pub model: ModelVariant,
    pub cuda: bool,
    pub font: PathBuf,
    /// Largest accepted upload, in MiB.
    pub upload_limit_mb: usize,
    /// Finished jobs kept around for playback/download; the oldest go first.
    pub max_jobs: usize,
    /// Where per-job scratch directories are created, system temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl WebConfig {
    /// Loads settings. Without an explicit `path`, `./web_ort.{toml,json,yaml}`
    /// is used when present.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("web_ort").required(false),
        };
        let config = Config::builder()
            .set_default("bind", "127.0.0.1:8501")?
            .set_default("models_dir", "_models")?
            .set_default("model", "yolov8n")?
            .set_default("cuda", false)?
            .set_default("font", "_models/DejaVuSans.ttf")?
            .set_default("upload_limit_mb", 200_i64)?
            .set_default("max_jobs", 8_i64)?
            .add_source(file)
            .add_source(Environment::with_prefix("WEB_ORT").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;
        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn upload_limit_bytes(&self) -> usize {
        self.upload_limit_mb * 1024 * 1024
    }

    pub fn model_path(&self) -> PathBuf {
        self.model.onnx_path(&self.models_dir)
    }
}
