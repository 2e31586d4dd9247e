use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite student database.
    pub db_path: PathBuf,
    /// Path to the persisted encoding database (JSON).
    pub encodings_path: PathBuf,
    /// Directory of reference images (one per identity).
    pub images_dir: PathBuf,
    /// Directory of enrollment photos shown during profile display.
    pub photos_dir: PathBuf,
    /// Euclidean distance tolerance for a positive match.
    pub match_tolerance: f32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path: data_dir.join("students.db"),
            encodings_path: data_dir.join("encodings.json"),
            images_dir: data_dir.join("images"),
            photos_dir: data_dir.join("photos"),
            match_tolerance: env_f32(
                "ROLLCALL_MATCH_TOLERANCE",
                rollcall_core::matcher::DEFAULT_TOLERANCE,
            ),
        }
    }

    /// Path to the face-detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face-embedding model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("mobilefacenet.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

/// `$XDG_DATA_HOME/rollcall` or `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
