use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{ModelError, PersistenceError};

/// Application-wide configuration, persisted as TOML in the platform
/// config directory. Missing or unreadable configuration degrades to
/// the defaults with a warning; it is never fatal.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub severity: SeverityThresholds,
    pub display: DisplayConfig,
    pub report: ReportConfig,
}

/// Segmentation model settings.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// Explicit checkpoint path; when unset the default locations under
    /// the app data directory are searched.
    pub path: Option<PathBuf>,
    /// Probability threshold for including a voxel in the lesion mask.
    pub threshold: f32,
    /// Sliding-window size in voxels (x, y, z).
    pub roi_size: [usize; 3],
    /// Overlap fraction between neighboring windows.
    pub overlap: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            threshold: 0.5,
            roi_size: [96, 96, 16],
            overlap: 0.5,
        }
    }
}

/// Thresholds for the three-tier lesion severity classification.
///
/// The defaults are illustrative, not clinically validated; they are
/// kept configurable for exactly that reason.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(default)]
pub struct SeverityThresholds {
    pub high_volume_mm3: f32,
    pub high_probability: f32,
    pub moderate_volume_mm3: f32,
    pub moderate_probability: f32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high_volume_mm3: 500.0,
            high_probability: 0.75,
            moderate_volume_mm3: 200.0,
            moderate_probability: 0.6,
        }
    }
}

/// Display defaults for the slice viewers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_level: f32,
    pub window_width: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_level: 40.0,
            window_width: 400.0,
        }
    }
}

/// Report output settings.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(default)]
pub struct ReportConfig {
    /// Output directory; defaults to `~/Documents/Prostalyzer`.
    pub output_dir: Option<PathBuf>,
    pub institution: Option<String>,
    pub physician: Option<String>,
}

impl AppConfig {
    /// Loads the configuration from the default path, falling back to
    /// defaults with a warning on any failure.
    #[must_use]
    #[tracing::instrument(level = "info")]
    pub fn load_or_default() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {path:?}");
                    config
                }
                Err(error) => {
                    warn!("Could not parse {path:?}: {error}; using defaults");
                    Self::default()
                }
            },
            Err(error) => {
                warn!("Could not read {path:?}: {error}; using defaults");
                Self::default()
            }
        }
    }

    /// Saves the configuration to the default path.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when the file cannot be written.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn save(&self) -> Result<(), PersistenceError> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)
            .map_err(|error| PersistenceError::Report(error.to_string()))?;
        std::fs::write(&path, toml)?;
        info!("Saved configuration to {path:?}");
        Ok(())
    }

    /// Resolves the model checkpoint path: the configured path when
    /// set, otherwise the default model under the app data directory,
    /// otherwise the bundled sample model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotFound`] when no candidate exists.
    pub fn resolve_model_path(&self) -> Result<PathBuf, ModelError> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.model.path {
            candidates.push(path.clone());
        }
        let models = models_dir();
        candidates.push(models.join("prostate_segmentation.onnx"));
        candidates.push(models.join("sample_model.onnx"));

        for candidate in &candidates {
            if candidate.is_file() {
                return Ok(candidate.clone());
            }
        }
        Err(ModelError::NotFound(
            candidates
                .pop()
                .unwrap_or_else(|| models.join("prostate_segmentation.onnx")),
        ))
    }

    /// Report output directory, created on demand by the writer.
    #[must_use]
    pub fn report_dir(&self) -> PathBuf {
        self.report.output_dir.clone().unwrap_or_else(|| {
            dirs::document_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Prostalyzer")
        })
    }
}

/// Path of the TOML configuration file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prostalyzer")
        .join("config.toml")
}

/// Directory searched for model checkpoints.
#[must_use]
pub fn models_dir() -> PathBuf {
    data_dir().join("models")
}

/// App data directory (cases, models, logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prostalyzer")
}

/// Log directory for the file layer of the tracing subscriber.
#[must_use]
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_thresholds() {
        let config = AppConfig::default();
        assert!((config.model.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.model.roi_size, [96, 96, 16]);
        assert!((config.severity.high_volume_mm3 - 500.0).abs() < f32::EPSILON);
        assert!((config.severity.high_probability - 0.75).abs() < f32::EPSILON);
        assert!((config.severity.moderate_volume_mm3 - 200.0).abs() < f32::EPSILON);
        assert!((config.severity.moderate_probability - 0.6).abs() < f32::EPSILON);
        assert!((config.display.window_level - 40.0).abs() < f32::EPSILON);
        assert!((config.display.window_width - 400.0).abs() < f32::EPSILON);
    }

    #[test]
    fn toml_round_trip_preserves_overrides() {
        let mut config = AppConfig::default();
        config.model.threshold = 0.35;
        config.severity.high_volume_mm3 = 750.0;
        config.report.physician = Some("Dr. Example".into());

        let toml = toml::to_string_pretty(&config).unwrap();
        let reloaded: AppConfig = toml::from_str(&toml).unwrap();

        assert_eq!(reloaded, config);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_per_field() {
        let reloaded: AppConfig = toml::from_str("[model]\nthreshold = 0.7\n").unwrap();
        assert!((reloaded.model.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(reloaded.model.roi_size, [96, 96, 16]);
        assert!((reloaded.severity.high_probability - 0.75).abs() < f32::EPSILON);
    }
}
