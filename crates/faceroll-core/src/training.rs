//! The encoding batch job: dataset directory in, encodings file out.
//!
//! Every run reprocesses every image. A failure on any single image aborts
//! the run before the output file is touched.

use crate::dataset::{self, DatasetError};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::encodings::{EncodingTable, EncodingsError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("image {path} has no parent directory to label it")]
    Unlabeled { path: PathBuf },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face model failed on {path}: {source}")]
    Model {
        path: PathBuf,
        #[source]
        source: EmbedderError,
    },
    #[error("failed to write encodings: {0}")]
    Write(#[from] EncodingsError),
}

/// Outcome of a completed training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingSummary {
    /// Images processed.
    pub images: usize,
    /// Embeddings written (one per detected face).
    pub encodings: usize,
    /// Distinct labels among the written embeddings.
    pub subjects: usize,
}

/// Encode every image under `dataset_root` and replace `output`.
///
/// `display_names` maps directory labels to human-readable names and is
/// stored alongside the table.
pub fn run(
    embedder: &mut dyn FaceEmbedder,
    dataset_root: &Path,
    output: &Path,
    display_names: BTreeMap<String, String>,
) -> Result<TrainingSummary, TrainingError> {
    tracing::info!(dataset = %dataset_root.display(), "start processing faces");
    let images = dataset::list_images(dataset_root)?;
    let total = images.len();

    let mut table = EncodingTable::new();
    for (i, path) in images.iter().enumerate() {
        tracing::info!(path = %path.display(), "processing image {}/{}", i + 1, total);

        let label = dataset::label_for(path)
            .ok_or_else(|| TrainingError::Unlabeled { path: path.clone() })?;
        let rgb = image::open(path)
            .map_err(|source| TrainingError::Decode { path: path.clone(), source })?
            .to_rgb8();
        let faces = embedder
            .encode_faces(&rgb)
            .map_err(|source| TrainingError::Model { path: path.clone(), source })?;

        if faces.is_empty() {
            tracing::debug!(path = %path.display(), "no face detected");
        }
        for face in faces {
            if table.model_version().is_none() {
                table.set_model_version(face.embedding.model_version.clone());
            }
            table.push(face.embedding.values, label.clone());
        }
    }

    table.set_display_names(display_names);

    tracing::info!(output = %output.display(), encodings = table.len(), "serializing encodings");
    table.save(output)?;

    Ok(TrainingSummary {
        images: total,
        encodings: table.len(),
        subjects: table.subject_count(),
    })
}
