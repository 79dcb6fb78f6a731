use moodlens_core::locator::DEFAULT_WORKING_WIDTH;
use moodlens_core::patch::DEFAULT_PATCH_SIZE;
use moodlens_core::{
    EmotionPipeline, ModelPaths, ModelState, PatchGeometry, PatchLayout, PipelineConfig,
    TierConfigError, TierSet,
};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_ENGINE_QUEUE: usize = 32;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite history database.
    pub db_path: PathBuf,
    /// Width every frame is resized to before detection.
    pub working_width: u32,
    /// Side length of the square classifier patch.
    pub patch_size: u32,
    pub patch_layout: PatchLayout,
    /// Number of inference worker threads.
    pub engine_workers: usize,
    /// Bound on queued inference requests.
    pub engine_queue: usize,
    /// Per-call inference timeout; `None` waits indefinitely.
    pub inference_timeout: Option<Duration>,
    /// Whether responses carry the full probability vector.
    pub report_probabilities: bool,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Optional TOML file overriding the cascade tiers.
    pub tiers_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `MOODLENS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("MOODLENS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| moodlens_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("moodlens");

        let db_path = std::env::var("MOODLENS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("history.db"));

        let patch_layout = match std::env::var("MOODLENS_PATCH_LAYOUT") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring MOODLENS_PATCH_LAYOUT");
                PatchLayout::default()
            }),
            Err(_) => PatchLayout::default(),
        };

        let timeout_ms = env_u64("MOODLENS_INFERENCE_TIMEOUT_MS", 0);

        Self {
            bind_addr: std::env::var("MOODLENS_BIND_ADDR")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            model_dir,
            db_path,
            working_width: env_u32("MOODLENS_WORKING_WIDTH", DEFAULT_WORKING_WIDTH).max(1),
            patch_size: env_u32("MOODLENS_PATCH_SIZE", DEFAULT_PATCH_SIZE).max(1),
            patch_layout,
            engine_workers: env_usize("MOODLENS_ENGINE_WORKERS", available_cores()).max(1),
            engine_queue: env_usize("MOODLENS_ENGINE_QUEUE", DEFAULT_ENGINE_QUEUE).max(1),
            inference_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            report_probabilities: std::env::var("MOODLENS_REPORT_PROBABILITIES")
                .map(|v| v != "0")
                .unwrap_or(true),
            max_body_bytes: env_usize("MOODLENS_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            tiers_file: std::env::var("MOODLENS_TIERS_FILE").ok().map(PathBuf::from),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    /// Pipeline tunables, reading the tier file when one is configured.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, TierConfigError> {
        let tiers = match &self.tiers_file {
            Some(path) => {
                let tiers = TierSet::load(path)?;
                tracing::info!(path = %path.display(), "cascade tiers loaded");
                tiers
            }
            None => TierSet::default(),
        };
        Ok(PipelineConfig {
            tiers,
            working_width: self.working_width,
            patch: PatchGeometry { size: self.patch_size, layout: self.patch_layout },
            report_probabilities: self.report_probabilities,
        })
    }

    /// Load both models once and assemble the pipeline.
    ///
    /// Missing or broken model assets do not fail this call; the pipeline
    /// comes back unavailable instead.
    pub fn build_pipeline(&self) -> Result<EmotionPipeline, TierConfigError> {
        let config = self.pipeline_config()?;
        // Workers already parallelize across requests; keep each session lean.
        let intra_threads = (available_cores() / self.engine_workers).max(1);
        let models = ModelState::load(&self.model_paths(), intra_threads);
        tracing::info!(state = ?models, dir = %self.model_dir.display(), "model load finished");
        Ok(EmotionPipeline::new(models, config))
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            model_dir: PathBuf::from("/nonexistent/models"),
            db_path: PathBuf::from("/tmp/history.db"),
            working_width: DEFAULT_WORKING_WIDTH,
            patch_size: DEFAULT_PATCH_SIZE,
            patch_layout: PatchLayout::Nhwc,
            engine_workers: 1,
            engine_queue: DEFAULT_ENGINE_QUEUE,
            inference_timeout: None,
            report_probabilities: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            tiers_file: None,
        }
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let pc = base().pipeline_config().unwrap();
        assert_eq!(pc.working_width, 300);
        assert_eq!(pc.patch.size, 64);
        assert_eq!(pc.tiers.strict.min_neighbors, 4);
        assert!(pc.report_probabilities);
    }

    #[test]
    fn test_tiers_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiers.toml");
        std::fs::write(
            &path,
            "[strict]\nscale_factor = 1.2\nmin_neighbors = 6\nmin_size = [40, 40]\n\n\
             [relaxed]\nscale_factor = 1.05\nmin_neighbors = 2\nmin_size = [24, 24]\n",
        )
        .unwrap();
        let config = Config { tiers_file: Some(path), ..base() };
        let pc = config.pipeline_config().unwrap();
        assert_eq!(pc.tiers.strict.min_neighbors, 6);
        assert_eq!(pc.tiers.relaxed.min_size, (24, 24));
    }

    #[test]
    fn test_missing_tiers_file_is_an_error() {
        let config = Config { tiers_file: Some(PathBuf::from("/nonexistent/tiers.toml")), ..base() };
        assert!(config.pipeline_config().is_err());
    }

    #[test]
    fn test_missing_models_build_unavailable_pipeline() {
        let pipeline = base().build_pipeline().unwrap();
        assert!(!pipeline.is_available());
    }
}
