use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceroll_core::{dataset, training, Embedding, EncodingTable, FaceEmbedder, OnnxEmbedder};
use faceroll_hw::{Camera, FrameSource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "faceroll", about = "faceroll face enrollment CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save webcam headshots into dataset/<name>/ until Ctrl-C
    Capture {
        /// Subject directory name
        name: String,
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value = "dataset")]
        dataset: PathBuf,
        /// Delay before each saved frame
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
        /// Stop after this many images
        #[arg(long)]
        count: Option<usize>,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        #[arg(long, default_value_t = 90)]
        quality: u8,
    },
    /// Encode every dataset image into an encodings file
    Train {
        #[arg(long, default_value = "dataset")]
        dataset: PathBuf,
        #[arg(long, default_value = "encodings.json")]
        output: PathBuf,
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long, default_value_t = faceroll_core::DEFAULT_EMBEDDING_DIM)]
        embedding_dim: usize,
    },
    /// Match the faces in an image against an encodings file
    Identify {
        image: PathBuf,
        #[arg(long, default_value = "encodings.json")]
        encodings: PathBuf,
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long, default_value_t = faceroll_core::DEFAULT_EMBEDDING_DIM)]
        embedding_dim: usize,
        /// Minimum cosine similarity for a match
        #[arg(long, default_value_t = 0.40)]
        threshold: f32,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capture {
            name,
            device,
            dataset,
            interval_ms,
            count,
            width,
            height,
            quality,
        } => {
            // Installed before the camera opens so an early Ctrl-C cancels
            // instead of killing the process.
            let mut interrupt =
                signal(SignalKind::interrupt()).context("failed to install Ctrl-C handler")?;
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if interrupt.recv().await.is_some() {
                        cancel.cancel();
                    }
                }
            });

            let dir = dataset::ensure_subject_dir(&dataset, &name)?;
            let mut camera = Camera::open(&device, width, height)
                .with_context(|| format!("failed to open camera {device}"))?;
            tracing::info!(
                device = %camera.device_path,
                fourcc = ?camera.fourcc,
                width = camera.width,
                height = camera.height,
                "camera ready"
            );

            println!("Capturing into {} (Ctrl-C to stop)", dir.display());
            let plan = CapturePlan {
                dir: &dir,
                interval: Duration::from_millis(interval_ms),
                count,
                quality,
            };
            let saved = capture_headshots(&mut camera, &plan, &cancel).await;
            println!("Saved {saved} image(s)");
        }
        Commands::Train {
            dataset,
            output,
            model_dir,
            embedding_dim,
        } => {
            let mut embedder = load_embedder(model_dir, embedding_dim)?;
            let summary = tokio::task::spawn_blocking(move || {
                training::run(&mut embedder, &dataset, &output, BTreeMap::new())
                    .map(|s| (s, output))
            })
            .await??;
            let (summary, output) = summary;
            println!(
                "Encoded {} face(s) of {} subject(s) from {} image(s) into {}",
                summary.encodings,
                summary.subjects,
                summary.images,
                output.display()
            );
        }
        Commands::Identify {
            image,
            encodings,
            model_dir,
            embedding_dim,
            threshold,
        } => {
            let table = EncodingTable::load(&encodings)
                .with_context(|| format!("failed to load {}", encodings.display()))?;
            if table.is_empty() {
                bail!("{} holds no encodings; run `faceroll train` first", encodings.display());
            }
            if let Some(at) = table.generated_at() {
                tracing::info!(generated_at = %at, encodings = table.len(), "loaded encodings");
            }
            let rgb = image::open(&image)
                .with_context(|| format!("failed to decode {}", image.display()))?
                .to_rgb8();

            let mut embedder = load_embedder(model_dir, embedding_dim)?;
            let faces = embedder.encode_faces(&rgb)?;
            if faces.is_empty() {
                println!("No face found in {}", image.display());
            }
            for face in faces {
                check_compatible(&table, &face.embedding)?;
                let b = &face.bbox;
                let at = format!("({:.0}, {:.0}, {:.0}x{:.0})", b.x, b.y, b.width, b.height);
                match table.best_match(&face.embedding.values, threshold) {
                    Some(m) => println!(
                        "{at}: {} [{}] similarity {:.3}",
                        m.display_name.as_deref().unwrap_or(&m.label),
                        m.label,
                        m.similarity
                    ),
                    None => println!("{at}: unknown"),
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn load_embedder(model_dir: Option<PathBuf>, embedding_dim: usize) -> Result<OnnxEmbedder> {
    let model_dir = model_dir.unwrap_or_else(faceroll_core::default_model_dir);
    OnnxEmbedder::from_model_dir(&model_dir, embedding_dim)
        .with_context(|| format!("failed to load face models from {}", model_dir.display()))
}

/// Refuse an embedding of another width; warn when the producing model differs.
fn check_compatible(table: &EncodingTable, face: &Embedding) -> Result<()> {
    if let Some(dim) = table.dimension() {
        if dim != face.values.len() {
            bail!(
                "encodings are {dim}-dimensional but the model produced {} values; \
                 retrain or pass a matching --embedding-dim",
                face.values.len()
            );
        }
    }
    if let (Some(stored), Some(current)) = (table.model_version(), face.model_version.as_deref()) {
        if stored != current {
            tracing::warn!(stored, current, "encodings were produced by a different model");
        }
    }
    Ok(())
}

struct CapturePlan<'a> {
    dir: &'a Path,
    interval: Duration,
    count: Option<usize>,
    quality: u8,
}

/// Read a frame, wait `interval`, save it; repeat until cancelled, the
/// source fails, or `count` images are saved. Returns the number saved.
async fn capture_headshots(
    source: &mut dyn FrameSource,
    plan: &CapturePlan<'_>,
    cancel: &CancellationToken,
) -> usize {
    let mut saved = 0;

    while plan.count.map_or(true, |max| saved < max) {
        let frame = match tokio::task::block_in_place(|| source.read_frame()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "no frame from camera, stopping");
                break;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(plan.interval) => {}
        }

        let path = plan.dir.join(dataset::image_file_name());
        match tokio::task::block_in_place(|| frame.save_jpeg(&path, plan.quality)) {
            Ok(()) => {
                saved += 1;
                tracing::info!(path = %path.display(), "saved headshot");
            }
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to write image"),
        }
    }

    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceroll_hw::{CameraError, Frame};

    struct Counting {
        next: u32,
        limit: u32,
    }

    impl FrameSource for Counting {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if self.next >= self.limit {
                return Err(CameraError::CaptureFailed("end of stream".into()));
            }
            self.next += 1;
            Frame::from_rgb(vec![100; 4 * 4 * 3], 4, 4, self.next)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))
        }
    }

    fn plan(dir: &Path, count: Option<usize>) -> CapturePlan<'_> {
        CapturePlan {
            dir,
            interval: Duration::from_millis(1),
            count,
            quality: 80,
        }
    }

    fn files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    fn embedding(values: &[f32], model: &str) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model_version: Some(model.into()),
        }
    }

    #[test]
    fn test_check_compatible_rejects_other_width() {
        let mut table = EncodingTable::new();
        table.push(vec![1.0, 0.0, 0.0], "id-1");
        table.set_model_version(Some("face_embedding".into()));

        assert!(check_compatible(&table, &embedding(&[1.0, 0.0, 0.0], "face_embedding")).is_ok());
        assert!(check_compatible(&table, &embedding(&[1.0, 0.0, 0.0], "other")).is_ok());
        assert!(check_compatible(&table, &embedding(&[1.0, 0.0], "face_embedding")).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_saves_until_source_ends() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = Counting { next: 0, limit: 3 };
        let cancel = CancellationToken::new();
        let saved = capture_headshots(&mut source, &plan(tmp.path(), None), &cancel).await;
        assert_eq!(saved, 3);

        let names = files(tmp.path());
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("image_") && n.ends_with(".jpg")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_count_limits_saves() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = Counting { next: 0, limit: 100 };
        let cancel = CancellationToken::new();
        let saved = capture_headshots(&mut source, &plan(tmp.path(), Some(2)), &cancel).await;
        assert_eq!(saved, 2);
        assert_eq!(files(tmp.path()).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_stops_before_saving() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = Counting { next: 0, limit: 100 };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let saved = capture_headshots(&mut source, &plan(tmp.path(), None), &cancel).await;
        assert_eq!(saved, 0);
        assert!(files(tmp.path()).is_empty());
    }
}
