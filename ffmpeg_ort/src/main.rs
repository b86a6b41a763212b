mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use ffmpeg_common::{VideoReader, VideoWriter};
use inference_common::annotate::FrameAnnotator;
use inference_common::error::PipelineError;
use inference_common::frame_meta::FrameMeta;
use inference_common::pipeline::{Pipeline, RunSummary};
use inference_common::threshold::{Threshold, DEFAULT_CONFIDENCE};
use inference_common::video::FrameSource;
use inference_common::video_meta::VideoMeta;
use ort_common::{load_session, ModelVariant, YoloV8};
use tracing_subscriber::prelude::*;

/// Detects objects in a video with yolov8 and writes an annotated copy.
#[derive(Debug, Parser)]
pub struct Args {
    /// Path to input video file (.mp4/.avi/.mov/.mkv).
    #[arg(long, short)]
    input: PathBuf,
    /// Where to save the annotated video.
    #[arg(long, short)]
    output: PathBuf,
    /// Confidence threshold (0.0 - 1.0).
    #[arg(long, short, default_value_t = DEFAULT_CONFIDENCE, allow_negative_numbers = true)]
    confidence: f32,
    /// Yolov8 model to use, yolov8n is the fastest.
    #[arg(long, short, value_enum, default_value_t = ModelVariant::Nano)]
    model: ModelVariant,
    /// Directory holding the exported `<model>.onnx` files.
    #[arg(long, default_value = "_models")]
    models_dir: PathBuf,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    /// Font for box captions; boxes are drawn without captions if it can't be loaded.
    #[arg(long, default_value = "_models/DejaVuSans.ttf")]
    font: PathBuf,
    /// Also write per-frame detections and the final counts to this json file.
    #[arg(long)]
    json: Option<PathBuf>,
    /// Print progress every this many frames.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    progress_every: u64,
}

/// Argument checks done before anything is opened or created.
fn validate(args: &Args) -> Result<Threshold, PipelineError> {
    if !args.input.exists() {
        return Err(PipelineError::InvalidInputPath(args.input.clone()));
    }
    Threshold::new(args.confidence)
}

fn run(args: &Args, threshold: Threshold, cancel: Arc<AtomicBool>) -> Result<RunSummary, PipelineError> {
    let model_path = args.model.onnx_path(&args.models_dir);
    println!("Loading model {}...", args.model);
    let mut detector = YoloV8::new(load_session(&model_path, args.cuda)?);

    println!("Opening video: {:?}", args.input);
    let mut reader = VideoReader::open(&args.input)?;
    let info = reader.info();
    println!("{}", report::video_properties(&info));

    let mut writer = VideoWriter::create(&args.output, info.width, info.height, info.fps)?;

    println!("Processing video...");
    println!("Confidence threshold: {threshold}");
    let pipeline = Pipeline::new(FrameAnnotator::with_font_or_boxes_only(&args.font), threshold)
        .with_cancel_flag(cancel);

    let mut video_meta = args.json.as_ref().map(|_| {
        VideoMeta::new(args.input.clone(), args.output.clone(), &info, threshold.value())
    });
    let summary = pipeline.run(&mut reader, &mut detector, &mut writer, |frame| {
        if frame.progress.processed % args.progress_every == 0 {
            println!("Progress: {}", frame.progress);
        }
        if let Some(meta) = video_meta.as_mut() {
            meta.push(FrameMeta {
                index: frame.index,
                detections: frame.detections.to_vec(),
            });
        }
    })?;
    // release input and output before reporting
    drop(writer);
    drop(reader);

    if let (Some(path), Some(mut meta)) = (&args.json, video_meta) {
        meta.tally = summary.tally.clone();
        log::info!("Writing output json file, {} frames: {path:?}", meta.frames.len());
        meta.write_json(path)?;
    }

    // Print perf stats, ignoring first (outlier) frame.
    log::info!("Average frame times: {:?}", summary.times.avg(true));
    log::info!("Min frame times: {:?}", summary.times.min(true));
    log::info!("Max frame times: {:?}", summary.times.max(true));

    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ffmpeg_ort=info,inference_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let threshold = match validate(&args) {
        Ok(threshold) => threshold,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C stops the run between frames, so the output is still finalized.
    let cancel = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received interrupt signal");
            shutdown_signal.store(true, Ordering::Relaxed);
        }
    });

    let output = args.output.clone();
    let job = tokio::task::spawn_blocking(move || run(&args, threshold, cancel)).await;

    match job {
        Ok(Ok(summary)) if summary.cancelled => {
            println!("\n{}", report::cancelled(&summary));
            ExitCode::SUCCESS
        }
        Ok(Ok(summary)) => {
            println!("\n{}", report::finished(&summary, &output));
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("\nError during processing: {e:#}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("\nError during processing: {e}");
            ExitCode::FAILURE
        }
    }
}
