//! Console text for the batch processor.

use std::fmt::Write;
use std::path::Path;

use inference_common::pipeline::RunSummary;
use inference_common::tally::DetectionTally;
use inference_common::video::VideoInfo;

pub fn video_properties(info: &VideoInfo) -> String {
    let frames = info
        .total_frames
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    format!(
        "Resolution: {}x{} | FPS: {} | Frames: {frames}",
        info.width, info.height, info.fps
    )
}

/// "traffic light" -> "Traffic light"
pub fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn tally_table(tally: &DetectionTally) -> String {
    if tally.is_empty() {
        return "No objects detected. Try lowering the confidence threshold.".to_string();
    }
    let mut out = String::from("DETECTED OBJECTS:\n");
    out.push_str(&"-".repeat(40));
    for (label, count) in tally.snapshot() {
        let _ = write!(out, "\n  {}: {count} detections", capitalize(&label));
    }
    out
}

pub fn finished(summary: &RunSummary, output: &Path) -> String {
    format!(
        "Video processed successfully! ({} frames)\nSaved to: {}\n\n{}",
        summary.frames_processed,
        output.display(),
        tally_table(&summary.tally)
    )
}

pub fn cancelled(summary: &RunSummary) -> String {
    format!(
        "Processing cancelled by user after {} frames",
        summary.frames_processed
    )
}
