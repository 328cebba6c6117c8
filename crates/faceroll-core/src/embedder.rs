//! The face-embedding model seam: image in, (bounding box, embedding) pairs out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceEncoding;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects every face in an RGB image and computes one embedding per face.
///
/// Images with no detectable face yield an empty list, not an error.
pub trait FaceEmbedder: Send {
    fn encode_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceEncoding>, EmbedderError>;
}

/// SCRFD detection followed by ONNX embedding extraction.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models. Fails fast if either file is missing or invalid.
    pub fn load(
        detector_path: &Path,
        embedder_path: &Path,
        embedding_dim: usize,
    ) -> Result<Self, EmbedderError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(embedder_path, embedding_dim)?;
        Ok(Self { detector, recognizer })
    }

    /// Load `det_10g.onnx` and `face_embedding.onnx` from `model_dir`.
    pub fn from_model_dir(model_dir: &Path, embedding_dim: usize) -> Result<Self, EmbedderError> {
        Self::load(
            &model_dir.join(crate::DETECTOR_MODEL_FILE),
            &model_dir.join(crate::EMBEDDER_MODEL_FILE),
            embedding_dim,
        )
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn encode_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceEncoding>, EmbedderError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "detected faces");

        faces
            .into_iter()
            .map(|bbox| {
                let embedding = self.recognizer.extract(image, &bbox)?;
                Ok(FaceEncoding { bbox, embedding })
            })
            .collect()
    }
}
