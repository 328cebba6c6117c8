//! Test doubles for the camera and the face model.

use faceroll_core::{BoundingBox, EmbedderError, Embedding, FaceEmbedder, FaceEncoding};
use faceroll_hw::{CameraError, Frame, FrameSource};
use image::RgbImage;

const WIDTH: u32 = 8;
const HEIGHT: u32 = 6;

/// Produces small solid-colour frames, optionally failing after `limit` reads.
pub struct SyntheticSource {
    next: u32,
    limit: Option<u32>,
}

impl SyntheticSource {
    pub fn unlimited() -> Self {
        Self { next: 0, limit: None }
    }

    pub fn limited(limit: u32) -> Self {
        Self { next: 0, limit: Some(limit) }
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.limit.is_some_and(|limit| self.next >= limit) {
            return Err(CameraError::CaptureFailed("end of stream".into()));
        }
        let shade = (self.next % 256) as u8;
        let data = vec![shade; (WIDTH * HEIGHT * 3) as usize];
        let frame = Frame::from_rgb(data, WIDTH, HEIGHT, self.next)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        self.next += 1;
        Ok(frame)
    }
}

/// One "face" per image whose embedding is the image's top-left pixel.
pub struct PixelEmbedder;

impl FaceEmbedder for PixelEmbedder {
    fn encode_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceEncoding>, EmbedderError> {
        let p = image.get_pixel(0, 0).0;
        Ok(vec![FaceEncoding {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 1.0,
                landmarks: None,
            },
            embedding: Embedding {
                values: p.iter().map(|&c| c as f32 / 255.0).collect(),
                model_version: Some("pixel".into()),
            },
        }])
    }
}
