use std::path::PathBuf;
use std::str::FromStr;
use thisisme_core::composer::UnknownPolicy;
use thisisme_core::CombinationPolicy;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to listen on (default: 0.0.0.0:$PORT).
    pub bind_addr: String,
    /// Directory containing the projection/classifier/mean artifacts.
    pub model_dir: PathBuf,
    /// Path to the SCRFD ONNX model.
    pub detector_model: PathBuf,
    /// JSON array of identity labels, indexed by class.
    pub labels_path: PathBuf,
    /// Feature combination policy served by this instance.
    pub policy: CombinationPolicy,
    /// Whether inference records are written to the audit database.
    pub audit_enabled: bool,
    /// Path to the SQLite audit database.
    pub db_path: PathBuf,
    /// Optional directory where uploads are archived under their storage key.
    pub archive_dir: Option<PathBuf>,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Dimensionalities whose artifacts are loaded at startup.
    pub preload_components: Vec<u32>,
}

impl Config {
    /// Load configuration from `THISISME_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, UnknownPolicy> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, UnknownPolicy> {
        let model_dir = var("THISISME_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(thisisme_core::default_model_dir);

        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("thisisme");

        let bind_addr = var("THISISME_BIND_ADDR").unwrap_or_else(|| {
            let port: u16 = env_or(var("PORT"), DEFAULT_PORT);
            format!("0.0.0.0:{port}")
        });

        let policy = match var("THISISME_POLICY") {
            Some(name) => name.trim().parse()?,
            None => CombinationPolicy::default(),
        };

        Ok(Self {
            bind_addr,
            detector_model: var("THISISME_DETECTOR_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|| model_dir.join("det_10g.onnx")),
            labels_path: var("THISISME_LABELS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| model_dir.join("target_names.json")),
            model_dir,
            policy,
            audit_enabled: var("THISISME_AUDIT_ENABLED").map(|v| v != "0").unwrap_or(true),
            db_path: var("THISISME_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("inference.db")),
            archive_dir: var("THISISME_ARCHIVE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            max_upload_bytes: env_or(var("THISISME_MAX_UPLOAD_BYTES"), DEFAULT_MAX_UPLOAD_BYTES),
            preload_components: env_list(var("THISISME_PRELOAD_COMPONENTS")),
        })
    }
}

fn env_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Comma-separated positive integers; unparsable or zero entries are skipped.
fn env_list(value: Option<String>) -> Vec<u32> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split(',')
        .filter_map(|part| match part.trim().parse::<u32>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                if !part.trim().is_empty() {
                    tracing::warn!(entry = part, "ignoring invalid THISISME_PRELOAD_COMPONENTS entry");
                }
                None
            }
        })
        .collect()
}
