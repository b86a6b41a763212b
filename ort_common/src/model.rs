use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use serde::Deserialize;

/// The pretrained yolov8 sizes, smallest (fastest) first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
pub enum ModelVariant {
    #[default]
    #[value(name = "yolov8n")]
    #[serde(rename = "yolov8n")]
    Nano,
    #[value(name = "yolov8s")]
    #[serde(rename = "yolov8s")]
    Small,
    #[value(name = "yolov8m")]
    #[serde(rename = "yolov8m")]
    Medium,
    #[value(name = "yolov8l")]
    #[serde(rename = "yolov8l")]
    Large,
    #[value(name = "yolov8x")]
    #[serde(rename = "yolov8x")]
    XLarge,
}

impl ModelVariant {
    pub fn name(self) -> &'static str {
        match self {
            Self::Nano => "yolov8n",
            Self::Small => "yolov8s",
            Self::Medium => "yolov8m",
            Self::Large => "yolov8l",
            Self::XLarge => "yolov8x",
        }
    }

    /// Exported onnx file of this variant inside `models_dir`.
    pub fn onnx_path(self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}.onnx", self.name()))
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registers the execution provider and loads the onnx model into ort.
/// Requesting `cuda` may silently fall back to cpu.
pub fn load_session(model: &Path, cuda: bool) -> anyhow::Result<Session> {
    let (ep, ep_name) = if cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };

    ort::init().with_execution_providers([ep]).commit()?;

    let session = SessionBuilder::new()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model)
        .with_context(|| format!("Failed to load model {model:?}"))?;
    log::debug!("{session:?}");

    log::info!("Prepared ort {ep_name} session with model: {model:?}");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_paths() {
        assert_eq!(ModelVariant::default(), ModelVariant::Nano);
        assert_eq!(
            ModelVariant::Medium.onnx_path(Path::new("_models")),
            PathBuf::from("_models/yolov8m.onnx")
        );
    }

    #[test]
    fn test_variant_from_cli_name() {
        let v = ModelVariant::from_str("yolov8x", false).unwrap();
        assert_eq!(v, ModelVariant::XLarge);
        assert!(ModelVariant::from_str("yolov9", false).is_err());
    }
}
