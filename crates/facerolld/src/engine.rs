use faceroll_hw::{CameraError, Frame, FrameSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("camera has been released")]
    Released,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Messages sent from request handlers and capture loops to the engine thread.
enum EngineRequest {
    ReadFrame {
        reply: oneshot::Sender<Result<Frame, EngineError>>,
    },
    Release {
        reply: oneshot::Sender<bool>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every frame read by any consumer goes through this handle, so reads are
/// serialized and each frame is delivered to exactly one caller.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Read the next frame from the camera.
    pub async fn read_frame(&self) -> Result<Frame, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ReadFrame { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Close the camera device. Returns false if it was already released.
    pub async fn release(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Release { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread that owns `source`.
///
/// Discards `warmup_frames` frames first (camera auto-exposure settling),
/// then serves requests until every handle is dropped.
pub fn spawn_engine(
    mut source: Box<dyn FrameSource>,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            let _ = source.read_frame();
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceroll-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut source = Some(source);
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::ReadFrame { reply } => {
                        // The requester gave up (cancelled capture, closed stream).
                        if reply.is_closed() {
                            continue;
                        }
                        let result = match source.as_mut() {
                            Some(src) => src.read_frame().map_err(EngineError::from),
                            None => Err(EngineError::Released),
                        };
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, "frame read failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Release { reply } => {
                        let was_open = source.take().is_some();
                        if was_open {
                            tracing::info!("camera released");
                        }
                        let _ = reply.send(was_open);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
