use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 127.0.0.1:5000).
    pub listen_addr: SocketAddr,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub embedding_dim: usize,
    /// Path to the SQLite profile database.
    pub db_path: PathBuf,
    /// Root of the per-subject image folders.
    pub dataset_dir: PathBuf,
    /// Output of the training job.
    pub encodings_path: PathBuf,
    /// Delay between two captured images.
    pub capture_interval: Duration,
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from `FACEROLL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEROLL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| faceroll_core::default_model_dir());

        let db_path = std::env::var("FACEROLL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| faceroll_core::default_data_dir().join("users.db"));

        Self {
            listen_addr: env_or("FACEROLL_LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 5000))),
            camera_device: std::env::var("FACEROLL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            frame_width: env_or("FACEROLL_FRAME_WIDTH", 640),
            frame_height: env_or("FACEROLL_FRAME_HEIGHT", 480),
            warmup_frames: env_or("FACEROLL_WARMUP_FRAMES", 4),
            model_dir,
            embedding_dim: env_or("FACEROLL_EMBEDDING_DIM", faceroll_core::DEFAULT_EMBEDDING_DIM),
            db_path,
            dataset_dir: env_or("FACEROLL_DATASET_DIR", PathBuf::from("dataset")),
            encodings_path: env_or("FACEROLL_ENCODINGS_PATH", PathBuf::from("encodings.json")),
            capture_interval: Duration::from_millis(env_or("FACEROLL_CAPTURE_INTERVAL_MS", 1000)),
            jpeg_quality: env_or("FACEROLL_JPEG_QUALITY", 90u8).clamp(1, 100),
        }
    }
}

/// Parse `key` from the environment, falling back to `default` when it is
/// unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
