use faceroll_core::training::{self, TrainingError, TrainingSummary};
use faceroll_core::FaceEmbedder;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, TryLockError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("a training run is already in progress")]
    Busy,
    #[error(transparent)]
    Failed(#[from] TrainingError),
    #[error("training task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the encoding batch job on the blocking pool, one run at a time.
#[derive(Clone)]
pub struct Trainer {
    embedder: Arc<Mutex<Box<dyn FaceEmbedder>>>,
    dataset_root: PathBuf,
    output: PathBuf,
}

impl Trainer {
    pub fn new(embedder: Box<dyn FaceEmbedder>, dataset_root: PathBuf, output: PathBuf) -> Self {
        Self {
            embedder: Arc::new(Mutex::new(embedder)),
            dataset_root,
            output,
        }
    }

    /// Rebuild the encodings file from the whole dataset.
    ///
    /// Fails with `Busy` instead of queueing behind a run in progress.
    pub async fn train(
        &self,
        display_names: BTreeMap<String, String>,
    ) -> Result<TrainingSummary, TrainError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut embedder = match this.embedder.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Err(TrainError::Busy),
                // A panicked run leaves the model itself usable.
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            let summary =
                training::run(&mut **embedder, &this.dataset_root, &this.output, display_names)?;
            Ok(summary)
        })
        .await?
    }
}
