//! Timed frame capture into the enrollment dataset.
//!
//! At most one capture loop runs at a time. `stop` cancels the loop and
//! waits for it, so no image is written after it returns.

use crate::engine::EngineHandle;
use faceroll_core::dataset::{self, DatasetError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Who is being captured: directory and label key plus a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// The profile's unique identifier.
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A loop for this subject is already running; nothing was spawned.
    AlreadyCapturing,
    /// A loop for another subject is running.
    Busy { subject: Subject },
}

struct ActiveSession {
    subject: Subject,
    cancel: CancellationToken,
    task: JoinHandle<usize>,
}

pub struct CaptureController {
    engine: EngineHandle,
    dataset_root: PathBuf,
    interval: Duration,
    jpeg_quality: u8,
    active: Mutex<Option<ActiveSession>>,
}

impl CaptureController {
    pub fn new(
        engine: EngineHandle,
        dataset_root: PathBuf,
        interval: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            engine,
            dataset_root,
            interval,
            jpeg_quality,
            active: Mutex::new(None),
        }
    }

    /// Create the subject's image directory if it does not exist yet.
    pub fn prepare(&self, subject: &Subject) -> Result<PathBuf, DatasetError> {
        dataset::ensure_subject_dir(&self.dataset_root, &subject.id)
    }

    /// Begin capturing frames for `subject`.
    pub async fn start(&self, subject: Subject) -> Result<StartOutcome, DatasetError> {
        let mut active = self.active.lock().await;

        if let Some(session) = active.as_ref().filter(|s| !s.task.is_finished()) {
            return Ok(if session.subject.id == subject.id {
                StartOutcome::AlreadyCapturing
            } else {
                StartOutcome::Busy {
                    subject: session.subject.clone(),
                }
            });
        }

        // A loop that ended on its own (camera failure) still has to be reaped.
        if let Some(finished) = active.take() {
            let captured = finished.task.await.unwrap_or_default();
            tracing::debug!(
                user_id = %finished.subject.id,
                captured,
                "reaped finished capture loop"
            );
        }

        let dir = self.prepare(&subject)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(capture_loop(
            self.engine.clone(),
            dir,
            self.interval,
            self.jpeg_quality,
            cancel.clone(),
        ));

        tracing::info!(
            user_id = %subject.id,
            name = %subject.display_name,
            "started capturing images"
        );
        *active = Some(ActiveSession { subject, cancel, task });
        Ok(StartOutcome::Started)
    }

    /// Stop the running loop and wait for it to exit.
    ///
    /// Returns how many images it wrote, or `None` if nothing was running.
    pub async fn stop(&self) -> Option<usize> {
        let session = self.active.lock().await.take()?;
        session.cancel.cancel();

        let captured = match session.task.await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "capture loop panicked");
                0
            }
        };
        tracing::info!(user_id = %session.subject.id, captured, "stopped capturing images");
        Some(captured)
    }

    /// The subject currently being captured, if a loop is still running.
    pub async fn current_subject(&self) -> Option<Subject> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.task.is_finished())
            .map(|s| s.subject.clone())
    }
}

/// Read a frame, write it, wait `interval`; repeat until cancelled or the
/// camera fails. Returns the number of images written.
async fn capture_loop(
    engine: EngineHandle,
    dir: PathBuf,
    interval: Duration,
    jpeg_quality: u8,
    cancel: CancellationToken,
) -> usize {
    let mut captured = 0usize;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = engine.read_frame() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), "capture loop stopped: no frame");
                break;
            }
        };

        let path = dir.join(dataset::image_file_name());
        let write_path = path.clone();
        let written =
            tokio::task::spawn_blocking(move || frame.save_jpeg(&write_path, jpeg_quality));
        match written.await {
            Ok(Ok(())) => {
                captured += 1;
                tracing::info!(path = %path.display(), "captured image");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to write image");
            }
            Err(e) => {
                tracing::warn!(error = %e, "image writer task failed");
                break;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::testing::SyntheticSource;
    use faceroll_hw::{CameraError, Frame, FrameSource};
    use std::fs;
    use std::path::Path;

    fn subject(id: &str) -> Subject {
        Subject {
            id: id.into(),
            display_name: "Alice".into(),
        }
    }

    fn controller(source: SyntheticSource, root: &Path, interval_ms: u64) -> CaptureController {
        let engine = spawn_engine(Box::new(source), 0).unwrap();
        CaptureController::new(engine, root.to_path_buf(), Duration::from_millis(interval_ms), 80)
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    async fn wait_for_files(dir: &Path, n: usize) {
        for _ in 0..500 {
            if count_files(dir) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {n} files in {}", dir.display());
    }

    #[tokio::test]
    async fn test_capture_writes_unique_files_until_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(SyntheticSource::unlimited(), tmp.path(), 5);
        let dir = tmp.path().join("id-1");

        assert_eq!(ctl.start(subject("id-1")).await.unwrap(), StartOutcome::Started);
        wait_for_files(&dir, 3).await;

        let captured = ctl.stop().await.unwrap();
        let after_stop = count_files(&dir);
        assert_eq!(captured, after_stop);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count_files(&dir), after_stop, "no files after stop returned");

        for entry in fs::read_dir(&dir).unwrap() {
            let name = entry.unwrap().file_name().into_string().unwrap();
            assert!(name.starts_with("image_") && name.ends_with(".jpg"), "{name}");
        }
    }

    #[tokio::test]
    async fn test_repeated_start_runs_a_single_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(SyntheticSource::unlimited(), tmp.path(), 5);
        let dir = tmp.path().join("id-1");

        assert_eq!(ctl.start(subject("id-1")).await.unwrap(), StartOutcome::Started);
        assert_eq!(ctl.start(subject("id-1")).await.unwrap(), StartOutcome::AlreadyCapturing);
        assert_eq!(ctl.start(subject("id-1")).await.unwrap(), StartOutcome::AlreadyCapturing);
        wait_for_files(&dir, 2).await;

        // One stop halts everything: the single loop's count covers every file.
        let captured = ctl.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count_files(&dir), captured);
        assert_eq!(ctl.stop().await, None);
    }

    #[tokio::test]
    async fn test_other_subject_is_refused_while_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(SyntheticSource::unlimited(), tmp.path(), 50);

        ctl.start(subject("id-1")).await.unwrap();
        assert_eq!(
            ctl.start(subject("id-2")).await.unwrap(),
            StartOutcome::Busy { subject: subject("id-1") }
        );
        assert_eq!(ctl.current_subject().await, Some(subject("id-1")));
        ctl.stop().await;
        assert_eq!(ctl.current_subject().await, None);
    }

    #[tokio::test]
    async fn test_loop_ends_quietly_on_camera_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(SyntheticSource::limited(2), tmp.path(), 1);
        let dir = tmp.path().join("id-1");

        ctl.start(subject("id-1")).await.unwrap();
        wait_for_files(&dir, 2).await;
        for _ in 0..100 {
            if ctl.current_subject().await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ctl.current_subject().await, None);

        // The dead loop does not block a new session.
        assert_eq!(ctl.start(subject("id-2")).await.unwrap(), StartOutcome::Started);
        assert!(tmp.path().join("id-2").is_dir());
        assert_eq!(ctl.stop().await, Some(0));
        assert_eq!(count_files(&dir), 2);
    }

    #[tokio::test]
    async fn test_stop_interrupts_the_delay() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(SyntheticSource::unlimited(), tmp.path(), 60_000);

        ctl.start(subject("id-1")).await.unwrap();
        wait_for_files(&tmp.path().join("id-1"), 1).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), ctl.stop()).await;
        assert_eq!(stopped.unwrap(), Some(1));
    }

    /// Hands out one frame per permit received on `gate`.
    struct GatedSource {
        inner: SyntheticSource,
        gate: std::sync::mpsc::Receiver<()>,
    }

    impl FrameSource for GatedSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.gate
                .recv()
                .map_err(|_| CameraError::CaptureFailed("gate closed".into()))?;
            self.inner.read_frame()
        }
    }

    #[tokio::test]
    async fn test_write_failure_keeps_loop_running() {
        let tmp = tempfile::tempdir().unwrap();
        let (permit, gate) = std::sync::mpsc::sync_channel(0);
        let source = GatedSource {
            inner: SyntheticSource::unlimited(),
            gate,
        };
        let engine = spawn_engine(Box::new(source), 0).unwrap();
        let ctl = CaptureController::new(
            engine,
            tmp.path().to_path_buf(),
            Duration::from_millis(1),
            80,
        );

        ctl.start(subject("id-1")).await.unwrap();
        let dir = tmp.path().join("id-1");
        fs::remove_dir_all(&dir).unwrap();

        // Each rendezvous send returns once a read has begun, so after the
        // third one the first two frames have been through a failed write.
        let _permit = tokio::task::spawn_blocking(move || {
            for _ in 0..3 {
                permit.send(()).unwrap();
            }
            permit
        })
        .await
        .unwrap();

        assert_eq!(ctl.current_subject().await, Some(subject("id-1")));
        assert_eq!(ctl.stop().await, Some(0));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(SyntheticSource::unlimited(), tmp.path(), 5);
        assert_eq!(ctl.stop().await, None);
    }
}
