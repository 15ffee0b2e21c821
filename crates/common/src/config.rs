//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SegcapError, SegcapResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where downloaded segments are written.
    pub downloads_dir: PathBuf,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Resolutions offered to the user.
    pub resolutions: Vec<ResolutionPreset>,

    /// Label of the resolution selected at startup.
    pub default_resolution: String,

    /// Encoding formats (MIME strings), most preferred first.
    pub format_candidates: Vec<String>,

    /// Audio processing requested from capture devices.
    pub audio: AudioDefaults,

    /// How long to wait for the encoder to flush after stop (ms).
    pub stop_timeout_ms: u64,
}

/// A named capture resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPreset {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

/// Audio capture defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDefaults {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "segcap=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// Encoding candidates in priority order.
pub const DEFAULT_FORMAT_CANDIDATES: [&str; 6] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp8,vp9,opus",
    "video/webm;codecs=vp8",
    "video/mp4;codecs=h264,aac",
    "video/mp4",
];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            downloads_dir: dirs_default_downloads(),
            recording: RecordingDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            resolutions: vec![
                ResolutionPreset {
                    label: "720p".to_string(),
                    width: 1280,
                    height: 720,
                },
                ResolutionPreset {
                    label: "1080p".to_string(),
                    width: 1920,
                    height: 1080,
                },
            ],
            default_resolution: "720p".to_string(),
            format_candidates: DEFAULT_FORMAT_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            audio: AudioDefaults::default(),
            stop_timeout_ms: 10_000,
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: 44_100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    /// Look up a catalog entry by label (case-insensitive).
    pub fn resolution(&self, label: &str) -> SegcapResult<&ResolutionPreset> {
        self.resolutions
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(label))
            .ok_or_else(|| {
                let known = self
                    .resolutions
                    .iter()
                    .map(|r| r.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                SegcapError::config(format!("Unknown resolution '{label}' (known: {known})"))
            })
    }

    /// The resolution selected at startup, or the first catalog entry
    /// when the configured label is missing.
    pub fn initial_resolution(&self) -> SegcapResult<&ResolutionPreset> {
        match self.resolution(&self.default_resolution) {
            Ok(preset) => Ok(preset),
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to first catalog resolution");
                self.resolutions
                    .first()
                    .ok_or_else(|| SegcapError::config("Resolution catalog is empty"))
            }
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> SegcapResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> SegcapResult<()> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> SegcapResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("segcap").join("config.json")
}

/// Default downloads directory.
fn dirs_default_downloads() -> PathBuf {
    std::env::var("XDG_DOWNLOAD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join("Downloads"))
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let defaults = RecordingDefaults::default();
        let labels: Vec<_> = defaults.resolutions.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["720p", "1080p"]);
        assert_eq!(defaults.initial_resolution().unwrap().width, 1280);
        assert_eq!(defaults.audio.sample_rate, 44_100);
        assert_eq!(defaults.format_candidates[0], "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn test_resolution_lookup() {
        let defaults = RecordingDefaults::default();
        assert_eq!(defaults.resolution("1080P").unwrap().height, 1080);
        let err = defaults.resolution("4k").unwrap_err();
        assert!(err.to_string().contains("Unknown resolution '4k'"));
    }

    #[test]
    fn test_missing_default_label_falls_back_to_first() {
        let defaults = RecordingDefaults {
            default_resolution: "480p".to_string(),
            ..RecordingDefaults::default()
        };
        assert_eq!(defaults.initial_resolution().unwrap().label, "720p");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.recording.stop_timeout_ms = 2_500;
        config.logging.json = true;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.recording.stop_timeout_ms, 2_500);
        assert!(loaded.logging.json);
    }

    #[test]
    fn test_partial_recording_section_uses_defaults() {
        let json = r#"{
            "downloads_dir": "/tmp/dl",
            "recording": { "default_resolution": "1080p" },
            "logging": { "level": "debug", "json": false, "file": null }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.recording.default_resolution, "1080p");
        assert_eq!(config.recording.resolutions.len(), 2);
        assert_eq!(config.recording.stop_timeout_ms, 10_000);
    }
}
