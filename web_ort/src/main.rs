use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use inference_common::annotate::FrameAnnotator;
use ort_common::{load_session, YoloV8};
use tracing::info;
use tracing_subscriber::prelude::*;
use web_ort::api::{self, AppState};
use web_ort::config::WebConfig;

/// Browser front-end: upload a video, get it back with yolov8 detections drawn.
#[derive(Debug, Parser)]
struct Args {
    /// Settings file (toml/json/yaml); `./web_ort.toml` is used when present.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "warn,web_ort=info,inference_common=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = WebConfig::load(args.config.as_deref())?;
    info!("Using {config:?}");

    ffmpeg_common::init()?;

    // The model is loaded once and shared by every job.
    let model_path = config.model_path();
    let cuda = config.cuda;
    let detector = tokio::task::spawn_blocking(move || {
        load_session(&model_path, cuda).map(YoloV8::new)
    })
    .await
    .context("Model loading panicked")??;
    info!("Loaded model {}", config.model);

    let annotator = FrameAnnotator::with_font_or_boxes_only(&config.font);
    let state = AppState::new(Box::new(detector), annotator, &config);
    api::serve(state, &config.bind).await
}
