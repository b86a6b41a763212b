//! Detection jobs started from uploads, with their scratch directories.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use ffmpeg_common::{VideoReader, VideoWriter};
use inference_common::annotate::FrameAnnotator;
use inference_common::detector::Detector;
use inference_common::error::PipelineError;
use inference_common::pipeline::{Pipeline, RunSummary};
use inference_common::progress::Progress;
use inference_common::tally::DetectionTally;
use inference_common::threshold::Threshold;
use inference_common::video::{FrameSink, FrameSource};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SharedDetector = Arc<Mutex<Box<dyn Detector + Send>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for the model, which serves one job at a time.
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub file_name: String,
    pub confidence: f32,
    pub state: JobState,
    pub processed: u64,
    pub total: Option<u64>,
    pub percent: Option<f64>,
    /// Most frequent label first; grows while the job runs.
    pub tally: DetectionTally,
    pub error: Option<String>,
}

pub struct Job {
    pub id: Uuid,
    pub threshold: Threshold,
    input: PathBuf,
    output: PathBuf,
    status: Mutex<JobStatus>,
    cancel: Arc<AtomicBool>,
    // removed (best-effort) when the last reference goes away
    _workdir: TempDir,
}

impl Job {
    /// Creates the job's scratch directory and stores the upload in it.
    pub fn create(
        scratch_root: Option<&Path>,
        file_name: &str,
        extension: &str,
        data: &[u8],
        threshold: Threshold,
    ) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("web_ort-");
        let workdir = match scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let input = workdir.path().join(format!("input.{extension}"));
        let output = workdir.path().join("output.mp4");
        std::fs::write(&input, data)?;

        let id = Uuid::new_v4();
        Ok(Self {
            id,
            threshold,
            input,
            output,
            status: Mutex::new(JobStatus {
                id,
                file_name: file_name.to_owned(),
                confidence: threshold.value(),
                state: JobState::Queued,
                processed: 0,
                total: None,
                percent: None,
                tally: DetectionTally::new(),
                error: None,
            }),
            cancel: Arc::new(AtomicBool::new(false)),
            _workdir: workdir,
        })
    }

    pub fn status(&self) -> JobStatus {
        lock(&self.status).clone()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Stops the job before its next frame, or before it starts if queued.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.status).state.is_finished()
    }

    /// Runs the detection pipeline over the upload. Blocks until done.
    pub fn run(&self, detector: &SharedDetector, annotator: &FrameAnnotator) {
        info!(job = %self.id, "Processing upload");
        match self.open() {
            Ok((mut reader, mut writer)) => {
                self.run_on(detector, annotator, &mut reader, &mut writer)
            }
            Err(e) => self.finish(Err(e)),
        }

        // the upload is not needed anymore, whatever happened
        if let Err(e) = std::fs::remove_file(&self.input) {
            debug!(job = %self.id, "Could not remove upload: {e}");
        }
    }

    fn open(&self) -> Result<(VideoReader, VideoWriter), PipelineError> {
        let reader = VideoReader::open(&self.input)?;
        let info = reader.info();
        let writer = VideoWriter::create(&self.output, info.width, info.height, info.fps)?;
        Ok((reader, writer))
    }

    /// Waits for the model, then runs the pipeline from `source` into `sink`
    /// and records the outcome.
    pub fn run_on<S, K>(
        &self,
        detector: &SharedDetector,
        annotator: &FrameAnnotator,
        source: &mut S,
        sink: &mut K,
    ) where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let total = source.info().total_frames;
        {
            let mut status = lock(&self.status);
            status.total = total;
            status.percent = Progress::new(0, total).percent();
        }

        let result = match detector.lock() {
            Ok(mut detector) => {
                lock(&self.status).state = JobState::Running;
                let pipeline = Pipeline::new(annotator.clone(), self.threshold)
                    .with_cancel_flag(Arc::clone(&self.cancel));
                pipeline.run(source, &mut **detector, sink, |frame| {
                    let mut status = lock(&self.status);
                    status.processed = frame.progress.processed;
                    status.percent = frame.progress.percent();
                    for det in frame.detections {
                        status.tally.record(&det.label);
                    }
                })
            }
            Err(_) => Err(anyhow!("detection model is unusable after an earlier panic").into()),
        };
        self.finish(result);
    }

    fn finish(&self, result: Result<RunSummary, PipelineError>) {
        let mut status = lock(&self.status);
        match result {
            Ok(summary) => {
                status.state = if summary.cancelled {
                    JobState::Cancelled
                } else {
                    JobState::Done
                };
                status.processed = summary.frames_processed;
                status.tally = summary.tally;
                info!(
                    job = %self.id,
                    frames = summary.frames_processed,
                    state = status.state.as_str(),
                    "Job finished"
                );
            }
            Err(e) => {
                warn!(job = %self.id, "Job failed: {e:#}");
                status.state = JobState::Failed;
                status.error = Some(format!("{e:#}"));
            }
        }
    }
}

#[derive(Default)]
struct JobMap {
    order: VecDeque<Uuid>,
    by_id: HashMap<Uuid, Arc<Job>>,
}

/// Jobs of this server process. Beyond `capacity` the oldest finished job is
/// evicted, or the oldest job at all (cancelled) when none has finished.
pub struct JobStore {
    capacity: usize,
    jobs: Mutex<JobMap>,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            jobs: Mutex::default(),
        }
    }

    pub fn insert(&self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        let mut guard = lock(&self.jobs);
        let jobs = &mut *guard;
        while jobs.order.len() >= self.capacity {
            let by_id = &jobs.by_id;
            let pos = jobs
                .order
                .iter()
                .position(|id| by_id.get(id).is_some_and(|j| j.is_finished()))
                .unwrap_or(0);
            let Some(oldest) = jobs.order.remove(pos) else {
                break;
            };
            if let Some(evicted) = jobs.by_id.remove(&oldest) {
                evicted.cancel();
            }
            debug!(job = %oldest, "Evicted job");
        }
        jobs.order.push_back(job.id);
        jobs.by_id.insert(job.id, Arc::clone(&job));
        job
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Job>> {
        lock(&self.jobs).by_id.get(id).cloned()
    }

    /// Removes the job and cancels it if it has not finished yet.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Job>> {
        let mut jobs = lock(&self.jobs);
        jobs.order.retain(|j| j != id);
        let job = jobs.by_id.remove(id)?;
        job.cancel();
        Some(job)
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).by_id.len()
    }

    /// Cancels and drops every job; scratch directories go with the last
    /// reference.
    pub fn clear(&self) {
        let mut jobs = lock(&self.jobs);
        for job in jobs.by_id.values() {
            job.cancel();
        }
        jobs.order.clear();
        jobs.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use image::RgbImage;
    use inference_common::detector::Detection;
    use inference_common::testing::{MemorySink, MemorySource, ScriptedDetector};

    use super::*;

    fn job(scratch: &Path) -> Job {
        Job::create(Some(scratch), "clip.mp4", "mp4", b"data", Threshold::default()).unwrap()
    }

    fn shared(detector: impl Detector + Send + 'static) -> SharedDetector {
        Arc::new(Mutex::new(Box::new(detector)))
    }

    /// Blocks inside its first call until released.
    struct GatedDetector {
        reached: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
        gated: bool,
    }

    impl Detector for GatedDetector {
        fn detect(&mut self, _frame: &RgbImage, _threshold: Threshold) -> anyhow::Result<Vec<Detection>> {
            if std::mem::take(&mut self.gated) {
                self.reached.send(())?;
                self.release.recv()?;
            }
            Ok(Vec::new())
        }

        fn class_name(&self, _class_idx: usize) -> Option<&str> {
            None
        }
    }

    #[test]
    fn test_job_stores_upload_in_own_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let job = job(scratch.path());
        assert_eq!(std::fs::read(&job.input).unwrap(), b"data");
        assert!(job.input.starts_with(scratch.path()));
        assert_eq!(job.status().state, JobState::Queued);
    }

    #[test]
    fn test_store_evicts_oldest_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let store = JobStore::new(2);
        let first = store.insert(job(scratch.path()));
        let first_id = first.id;
        let first_dir = first.input.parent().unwrap().to_path_buf();
        drop(first);

        store.insert(job(scratch.path()));
        store.insert(job(scratch.path()));

        assert_eq!(store.len(), 2);
        assert!(store.get(&first_id).is_none());
        assert!(!first_dir.exists());
    }

    #[test]
    fn test_eviction_prefers_finished_jobs() {
        let scratch = tempfile::tempdir().unwrap();
        let store = JobStore::new(2);
        let pending = store.insert(job(scratch.path()));
        let finished = store.insert(job(scratch.path()));
        lock(&finished.status).state = JobState::Done;

        store.insert(job(scratch.path()));

        assert!(store.get(&pending.id).is_some());
        assert!(store.get(&finished.id).is_none());
        assert!(!pending.cancel.load(Ordering::Relaxed));

        // nothing finished now, so the oldest goes and is stopped
        store.insert(job(scratch.path()));
        assert!(store.get(&pending.id).is_none());
        assert!(pending.cancel.load(Ordering::Relaxed));
    }

    #[test]
    fn test_remove_drops_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let store = JobStore::new(4);
        let id = store.insert(job(scratch.path())).id;
        let dir = store.get(&id).unwrap().input.parent().unwrap().to_path_buf();

        assert!(store.remove(&id).is_some());
        assert!(!dir.exists());
        assert!(store.remove(&id).is_none());
    }

    #[test]
    fn test_removing_running_job_cancels_it_and_frees_model() {
        let scratch = tempfile::tempdir().unwrap();
        let store = JobStore::new(4);
        let job = store.insert(job(scratch.path()));
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let detector = shared(GatedDetector {
            reached: reached_tx,
            release: release_rx,
            gated: true,
        });

        let worker = {
            let job = Arc::clone(&job);
            let detector = Arc::clone(&detector);
            std::thread::spawn(move || {
                let mut source = MemorySource::solid(500, 8, 8, 10);
                let mut sink = MemorySink::sized(8, 8);
                job.run_on(&detector, &FrameAnnotator::default(), &mut source, &mut sink);
                sink
            })
        };

        reached_rx.recv().unwrap();
        assert_eq!(job.status().state, JobState::Running);
        assert!(store.remove(&job.id).is_some());
        release_tx.send(()).unwrap();
        let sink = worker.join().unwrap();

        let status = job.status();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.processed, 1);
        assert_eq!(sink.frames.len(), 1);
        assert!(sink.is_finished());
        assert!(detector.try_lock().is_ok());
    }

    #[test]
    fn test_job_waits_queued_while_model_is_busy() {
        let scratch = tempfile::tempdir().unwrap();
        let job = Arc::new(job(scratch.path()));
        let detector = shared(ScriptedDetector::default());
        let busy = detector.lock().unwrap();

        let worker = {
            let job = Arc::clone(&job);
            let detector = Arc::clone(&detector);
            std::thread::spawn(move || {
                let mut source = MemorySource::solid(3, 8, 8, 10);
                let mut sink = MemorySink::sized(8, 8);
                job.run_on(&detector, &FrameAnnotator::default(), &mut source, &mut sink);
            })
        };

        // the total is known before the model is requested
        while job.status().total.is_none() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(job.status().state, JobState::Queued);

        drop(busy);
        worker.join().unwrap();
        let status = job.status();
        assert_eq!(status.state, JobState::Done);
        assert_eq!(status.processed, 3);
    }

    #[test]
    fn test_cancelled_before_start_processes_nothing() {
        let scratch = tempfile::tempdir().unwrap();
        let job = job(scratch.path());
        job.cancel();

        let mut sink = MemorySink::sized(8, 8);
        job.run_on(
            &shared(ScriptedDetector::default()),
            &FrameAnnotator::default(),
            &mut MemorySource::solid(3, 8, 8, 10),
            &mut sink,
        );

        assert_eq!(job.status().state, JobState::Cancelled);
        assert_eq!(job.status().processed, 0);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_failed_job_reports_error_and_drops_upload() {
        let scratch = tempfile::tempdir().unwrap();
        let job = job(scratch.path());
        let detector = shared(ScriptedDetector::default());

        // "data" is no video container
        job.run(&detector, &FrameAnnotator::default());

        let status = job.status();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("could not open video"));
        assert!(!job.input.exists());
    }
}
