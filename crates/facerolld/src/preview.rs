//! Live MJPEG preview over `multipart/x-mixed-replace`.

use crate::engine::EngineHandle;
use axum::body::Bytes;
use futures::Stream;
use std::convert::Infallible;

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Frame one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut part = Vec::with_capacity(HEAD.len() + jpeg.len() + 2);
    part.extend_from_slice(HEAD);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// One part per frame read through `engine`, until the first read fails.
///
/// Frames taken here are not seen by a concurrent capture loop.
pub fn mjpeg_stream(
    engine: EngineHandle,
    quality: u8,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(engine, move |engine| async move {
        let frame = match engine.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "preview stream ended");
                return None;
            }
        };

        let jpeg = match tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "preview frame encode failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "preview encoder task failed");
                return None;
            }
        };

        Some((Ok(Bytes::from(multipart_part(&jpeg))), engine))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::testing::SyntheticSource;
    use futures::StreamExt;

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(b"JPEG");
        assert_eq!(part, b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n");
    }

    #[tokio::test]
    async fn test_stream_ends_on_first_read_failure() {
        let engine = spawn_engine(Box::new(SyntheticSource::limited(3)), 0).unwrap();
        let parts: Vec<_> = mjpeg_stream(engine, 80).collect().await;
        assert_eq!(parts.len(), 3);

        for part in parts {
            let part = part.unwrap();
            let body = &part[b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".len()..part.len() - 2];
            let decoded = image::load_from_memory(body).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (8, 6));
        }
    }

    #[tokio::test]
    async fn test_stream_ends_after_release() {
        let engine = spawn_engine(Box::new(SyntheticSource::unlimited()), 0).unwrap();
        let mut stream = Box::pin(mjpeg_stream(engine.clone(), 80));
        assert!(stream.next().await.is_some());

        engine.release().await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
