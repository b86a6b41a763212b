use std::path::Path;

use ffmpeg_common::{VideoReader, VideoWriter};
use image::{Rgb, RgbImage};
use inference_common::annotate::FrameAnnotator;
use inference_common::bbox::Bbox;
use inference_common::error::PipelineError;
use inference_common::pipeline::Pipeline;
use inference_common::testing::ScriptedDetector;
use inference_common::threshold::Threshold;
use inference_common::video::{FrameSink, FrameSource};

const W: u32 = 64;
const H: u32 = 48;

fn write_video(path: &Path, frames: usize, fps: u32) {
    let mut writer = VideoWriter::create(path, W, H, fps).unwrap();
    for i in 0..frames {
        let frame = RgbImage::from_pixel(W, H, Rgb([(i * 20) as u8, 100, 200]));
        writer.write_frame(&frame).unwrap();
    }
    writer.finish().unwrap();
}

fn count_frames(reader: &mut VideoReader) -> usize {
    let mut n = 0;
    while let Some(frame) = reader.read_frame().unwrap() {
        assert_eq!(frame.dimensions(), (W, H));
        n += 1;
    }
    n
}

#[test]
fn test_written_video_reads_back_with_same_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    write_video(&path, 12, 10);

    let mut reader = VideoReader::open(&path).unwrap();
    let info = reader.info();
    assert_eq!((info.width, info.height, info.fps), (W, H, 10));
    assert_eq!(count_frames(&mut reader), 12);
    // end of stream is sticky
    assert!(reader.read_frame().unwrap().is_none());
}

#[test]
fn test_missing_input_is_open_error() {
    let err = VideoReader::open(Path::new("/definitely/not/here.mp4"))
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::OpenError { .. }));
}

#[test]
fn test_non_video_input_is_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.mp4");
    std::fs::write(&path, b"this is not a video container").unwrap();
    assert!(matches!(
        VideoReader::open(&path),
        Err(PipelineError::OpenError { .. })
    ));
}

#[test]
fn test_unwritable_output_is_create_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing_dir").join("out.mp4");
    assert!(matches!(
        VideoWriter::create(&path, W, H, 30),
        Err(PipelineError::CreateError { .. })
    ));
    assert!(matches!(
        VideoWriter::create(&dir.path().join("zero.mp4"), W, H, 0),
        Err(PipelineError::CreateError { .. })
    ));
}

#[test]
fn test_mismatched_frame_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = VideoWriter::create(&dir.path().join("out.mp4"), W, H, 30).unwrap();
    let wrong = RgbImage::new(W / 2, H);
    assert!(writer.write_frame(&wrong).is_err());
    assert_eq!(writer.frames_written(), 0);
}

#[test]
fn test_dropped_handles_release_the_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_video(&input, 6, 15);

    // stop halfway without calling finish, as an interrupted run would
    {
        let mut reader = VideoReader::open(&input).unwrap();
        let mut writer = VideoWriter::create(&output, W, H, 15).unwrap();
        for _ in 0..3 {
            let frame = reader.read_frame().unwrap().unwrap();
            writer.write_frame(&frame).unwrap();
        }
    }

    // both paths can be opened again, and the partial output is a valid video
    let mut reader = VideoReader::open(&input).unwrap();
    assert_eq!(count_frames(&mut reader), 6);
    let mut partial = VideoReader::open(&output).unwrap();
    assert_eq!(count_frames(&mut partial), 3);
    let mut writer = VideoWriter::create(&output, W, H, 15).unwrap();
    writer.finish().unwrap();
}

#[test]
fn test_pipeline_keeps_frame_count_size_and_rate() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_video(&input, 9, 12);

    let mut reader = VideoReader::open(&input).unwrap();
    let info = reader.info();
    let mut writer = VideoWriter::create(&output, info.width, info.height, info.fps).unwrap();
    let person = (0, Bbox::new(4.0, 4.0, 40.0, 40.0, 0.9));
    let mut detector = ScriptedDetector::new(vec![vec![person]; 5]);

    let summary = Pipeline::new(FrameAnnotator::default(), Threshold::default())
        .run(&mut reader, &mut detector, &mut writer, |_| {})
        .unwrap();
    drop(writer);

    assert_eq!(summary.frames_processed, 9);
    assert_eq!(summary.tally.get("person"), 5);

    let mut annotated = VideoReader::open(&output).unwrap();
    let out_info = annotated.info();
    assert_eq!((out_info.width, out_info.height, out_info.fps), (W, H, 12));
    assert_eq!(count_frames(&mut annotated), 9);
}
