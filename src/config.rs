use crate::core::quality::Metric;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Similarity threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("Invalid quality weight for {metric}: {value}")]
    InvalidWeight { metric: String, value: f64 },

    #[error("Quality weights must not all be zero")]
    ZeroWeights,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Weight magnitude per quality metric. Every key is required when the
/// section is present, and unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityWeights {
    pub sharpness: f64,
    pub contrast: f64,
    pub noise: f64,
    pub compression_artifacts: f64,
    pub color_richness: f64,
    pub exposure: f64,
}

impl QualityWeights {
    pub fn weight(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Sharpness => self.sharpness,
            Metric::Contrast => self.contrast,
            Metric::Noise => self.noise,
            Metric::CompressionArtifacts => self.compression_artifacts,
            Metric::ColorRichness => self.color_richness,
            Metric::Exposure => self.exposure,
        }
    }

    pub fn total(&self) -> f64 {
        Metric::ALL.iter().map(|&metric| self.weight(metric)).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for metric in Metric::ALL {
            let value = self.weight(metric);
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    metric: metric.as_str().to_string(),
                    value,
                });
            }
        }
        if self.total() <= 0.0 {
            return Err(ConfigError::ZeroWeights);
        }
        Ok(())
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            sharpness: 0.3,
            contrast: 0.2,
            noise: 0.1,
            compression_artifacts: 0.1,
            color_richness: 0.2,
            exposure: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub similarity_threshold: f64,
    pub quality_weights: QualityWeights,
    /// Files smaller than this many bytes are skipped before analysis.
    pub min_file_size: u64,
    /// A non-enhanced member trailing the best score by no more than this is
    /// still a duplicate rather than lower quality.
    pub duplicate_quality_tolerance: f64,
    pub workers: usize,
    pub analysis_timeout_secs: u64,
    pub video_frame_offset_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.88,
            quality_weights: QualityWeights::default(),
            min_file_size: 1024,
            duplicate_quality_tolerance: 0.1,
            workers: num_cpus::get(),
            analysis_timeout_secs: 60,
            video_frame_offset_secs: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_json(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mediacull").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        self.quality_weights.validate()?;

        if !(0.0..=1.0).contains(&self.duplicate_quality_tolerance) {
            return Err(invalid(
                "duplicate_quality_tolerance",
                "must be in [0, 1]",
            ));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.analysis_timeout_secs == 0 {
            return Err(invalid("analysis_timeout_secs", "must be at least 1"));
        }
        if !self.video_frame_offset_secs.is_finite() || self.video_frame_offset_secs < 0.0 {
            return Err(invalid(
                "video_frame_offset_secs",
                "must be a non-negative number of seconds",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
