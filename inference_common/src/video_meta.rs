use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::frame_meta::FrameMeta;
use crate::tally::DetectionTally;
use crate::video::VideoInfo;

/// Metadata corresponding to a processed video.
#[derive(Debug, Deserialize, Serialize)]
pub struct VideoMeta {
    /// Path to original input video file.
    pub input_file: PathBuf,
    /// Path to output video file, with inference overlays.
    pub output_file: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub confidence: f32,
    /// Per-frame recognized objects.
    pub frames: Vec<FrameMeta>,
    /// Detections per label over the whole run, most frequent first.
    pub tally: DetectionTally,
}

impl VideoMeta {
    pub fn new(input_file: PathBuf, output_file: PathBuf, info: &VideoInfo, confidence: f32) -> Self {
        Self {
            input_file,
            output_file,
            width: info.width,
            height: info.height,
            fps: info.fps,
            confidence,
            frames: Vec::new(),
            tally: DetectionTally::new(),
        }
    }

    pub fn push(&mut self, frame: FrameMeta) {
        self.frames.push(frame);
    }

    /// Writes the metadata as json.
    pub fn write_json(&self, path: &std::path::Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create json file {path:?}"))?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Bbox;
    use crate::detector::Detection;

    #[test]
    fn test_json_dump() {
        let info = VideoInfo {
            width: 640,
            height: 480,
            fps: 30,
            total_frames: Some(2),
        };
        let mut meta = VideoMeta::new("in.mp4".into(), "out.mp4".into(), &info, 0.5);
        meta.push(FrameMeta {
            index: 0,
            detections: vec![Detection {
                class_idx: 0,
                label: "person".into(),
                bbox: Bbox::new(1.0, 2.0, 3.0, 4.0, 0.9),
            }],
        });
        meta.tally.record("person");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        meta.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(value["fps"], 30);
        assert_eq!(value["frames"][0]["detections"][0]["label"], "person");
        assert_eq!(value["tally"][0][1], 1);
    }
}
