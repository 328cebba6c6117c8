//! faceroll-core: Face embedding engine and enrollment dataset handling.
//!
//! Uses SCRFD for face detection and an ONNX embedding network for
//! recognition, both running via ONNX Runtime for CPU inference. The
//! dataset and encodings modules implement the on-disk layout shared by
//! the daemon and the CLI.

mod alignment;
pub mod dataset;
pub mod detector;
pub mod embedder;
pub mod encodings;
pub mod recognizer;
pub mod training;
pub mod types;

use std::path::PathBuf;

pub use embedder::{EmbedderError, FaceEmbedder, OnnxEmbedder};
pub use encodings::{EncodingTable, EncodingsError, LabelMatch};
pub use training::{TrainingError, TrainingSummary};
pub use types::{BoundingBox, Embedding, FaceEncoding};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the face embedding model inside the model directory.
pub const EMBEDDER_MODEL_FILE: &str = "face_embedding.onnx";
/// Embedding width produced by the default enrollment model.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Per-user data directory (`$XDG_DATA_HOME/faceroll`, falling back to
/// `~/.local/share/faceroll`).
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceroll")
}

/// Default location of the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
