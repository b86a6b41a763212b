//! Frame-at-a-time driver: read → annotate → write → tally.
//!
//! Only one frame is alive at a time, so memory use does not depend on video
//! length. Per-frame inference dominates run time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::annotate::FrameAnnotator;
use crate::detector::{Detection, Detector};
use crate::error::PipelineError;
use crate::frame_times::{AggregatedTimes, FrameTimes};
use crate::progress::Progress;
use crate::tally::DetectionTally;
use crate::threshold::Threshold;
use crate::video::{FrameSink, FrameSource, VideoInfo};

/// What a front-end gets to see after every frame.
#[derive(Debug)]
pub struct FrameReport<'a> {
    /// 0-based index of the frame just written.
    pub index: u64,
    pub progress: Progress,
    pub detections: &'a [Detection],
    pub times: FrameTimes,
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub info: VideoInfo,
    pub tally: DetectionTally,
    pub frames_processed: u64,
    /// Stopped early because the cancel flag was raised.
    pub cancelled: bool,
    pub times: AggregatedTimes,
}

pub struct Pipeline {
    annotator: FrameAnnotator,
    threshold: Threshold,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(annotator: FrameAnnotator, threshold: Threshold) -> Self {
        Self {
            annotator,
            threshold,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares a flag that stops the run before the next frame once set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Processes `source` until end of stream or cancellation.
    ///
    /// `sink.finish()` is called on every exit path, so the output container
    /// is finalized even when a frame fails midway.
    pub fn run<S, D, K, F>(
        &self,
        source: &mut S,
        detector: &mut D,
        sink: &mut K,
        on_frame: F,
    ) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource + ?Sized,
        D: Detector + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(&FrameReport<'_>),
    {
        let outcome = self.process_frames(source, detector, sink, on_frame);
        let finished = sink.finish().context("Failed to finalize output video");

        match (outcome, finished) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(PipelineError::Processing(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(finish_err)) => {
                log::warn!("{finish_err:#}");
                Err(e)
            }
        }
    }

    fn process_frames<S, D, K, F>(
        &self,
        source: &mut S,
        detector: &mut D,
        sink: &mut K,
        mut on_frame: F,
    ) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource + ?Sized,
        D: Detector + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(&FrameReport<'_>),
    {
        let info = source.info();
        let mut tally = DetectionTally::new();
        let mut agg_times = AggregatedTimes::default();
        let mut processed = 0u64;
        let mut cancelled = false;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                log::info!("Cancelled after {processed} frames");
                cancelled = true;
                break;
            }

            let mut times = FrameTimes::default();
            let start = Instant::now();
            let Some(frame) = source
                .read_frame()
                .with_context(|| format!("Failed to decode frame {processed}"))?
            else {
                break;
            };
            times.decode = start.elapsed();

            let start = Instant::now();
            let detections = self
                .annotator
                .detect(detector, &frame, self.threshold)
                .with_context(|| format!("Failed to process frame {processed}"))?;
            times.inference = start.elapsed();

            let start = Instant::now();
            let annotated = self.annotator.draw(&frame, &detections);
            times.annotation = start.elapsed();

            for det in &detections {
                tally.record(&det.label);
            }

            let start = Instant::now();
            sink.write_frame(&annotated)
                .with_context(|| format!("Failed to encode frame {processed}"))?;
            times.encode = start.elapsed();

            on_frame(&FrameReport {
                index: processed,
                progress: Progress::new(processed + 1, info.total_frames),
                detections: &detections,
                times,
            });
            log::trace!("{times:?}");
            agg_times.push(times);
            processed += 1;
        }

        Ok(RunSummary {
            info,
            tally,
            frames_processed: processed,
            cancelled,
            times: agg_times,
        })
    }
}
