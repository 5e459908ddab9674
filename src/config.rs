//! Configuration management for duocam
//!
//! Recording, composition and resource-pressure settings with TOML load/save.
//! Every value has a compiled-in default, so a missing file is not an error.

use crate::errors::RecordingError;
use crate::types::Dimensions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuocamConfig {
    pub recording: RecordingSettings,
    pub composition: CompositionSettings,
    pub pressure: PressureSettings,
}

/// Encoder, queue and lifecycle settings shared by the three outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Nominal frame rate of the synchronized stream
    pub fps: f64,
    /// Target video bitrate in bits per second
    pub video_bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    /// Target audio bitrate in bits per second
    pub audio_bitrate: u32,
    /// How long stop waits for admitted frames to drain before finalizing
    pub stop_grace_ms: u64,
    /// Bounded video queue per writer; a full queue reports "not ready"
    pub video_queue_depth: usize,
    pub audio_queue_depth: usize,
    /// Write moov before mdat
    pub fast_start: bool,
    pub title: Option<String>,
    /// Largest accepted timestamp difference between the two frames of a tuple
    pub max_sync_skew_ms: u64,
}

/// Split-screen canvas settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionSettings {
    /// Composed output canvas [width, height]
    pub canvas: [u32; 2],
    /// Solid background behind the two halves, RGBA
    pub background: [u8; 4],
    /// Maximum number of composed pixel buffers alive at once
    pub pool_capacity: usize,
    pub filter: ScaleFilter,
}

/// Resampling filter used when fitting a sensor frame into its half of the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    Nearest,
    Triangle,
    CatmullRom,
}

impl ScaleFilter {
    pub fn to_filter_type(self) -> image::imageops::FilterType {
        match self {
            ScaleFilter::Nearest => image::imageops::FilterType::Nearest,
            ScaleFilter::Triangle => image::imageops::FilterType::Triangle,
            ScaleFilter::CatmullRom => image::imageops::FilterType::CatmullRom,
        }
    }
}

/// Memory-pressure monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureSettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// PSI `some avg10` percentage that counts as a warning
    pub warning_avg10: f64,
    /// PSI `some avg10` percentage that forces the recording to stop
    pub critical_avg10: f64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            video_bitrate: 8_000_000,
            audio_sample_rate: 48_000,
            audio_channels: 2,
            audio_bitrate: 128_000,
            stop_grace_ms: 500,
            video_queue_depth: 4,
            audio_queue_depth: 64,
            fast_start: true,
            title: None,
            max_sync_skew_ms: 20,
        }
    }
}

impl Default for CompositionSettings {
    fn default() -> Self {
        Self {
            canvas: [1920, 1080],
            background: [0, 0, 0, 255],
            pool_capacity: 8,
            filter: ScaleFilter::Triangle,
        }
    }
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1000,
            warning_avg10: 10.0,
            critical_avg10: 40.0,
        }
    }
}

impl RecordingSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn max_sync_skew_us(&self) -> u64 {
        self.max_sync_skew_ms.saturating_mul(1000)
    }
}

impl CompositionSettings {
    pub fn canvas_size(&self) -> Dimensions {
        Dimensions::from(self.canvas)
    }
}

impl PressureSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl DuocamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RecordingError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            RecordingError::configuration(format!("Failed to read config file: {}", e))
        })?;

        let config: DuocamConfig = toml::from_str(&contents).map_err(|e| {
            RecordingError::configuration(format!("Failed to parse config file: {}", e))
        })?;

        config.validate().map_err(RecordingError::configuration)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordingError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            RecordingError::configuration(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("duocam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let rec = &self.recording;
        if !(1.0..=240.0).contains(&rec.fps) {
            return Err("Invalid fps (must be 1-240)".to_string());
        }
        if rec.video_bitrate == 0 || rec.audio_bitrate == 0 {
            return Err("Bitrates must be non-zero".to_string());
        }
        if rec.audio_sample_rate == 0 {
            return Err("Audio sample rate must be non-zero".to_string());
        }
        if rec.audio_channels != 1 && rec.audio_channels != 2 {
            return Err("Audio channels must be 1 or 2".to_string());
        }
        if rec.video_queue_depth == 0 || rec.audio_queue_depth == 0 {
            return Err("Writer queue depths must be non-zero".to_string());
        }

        let comp = &self.composition;
        let canvas = comp.canvas_size();
        if canvas.is_empty() {
            return Err("Invalid canvas size".to_string());
        }
        if canvas.width % 2 != 0 || canvas.height % 2 != 0 {
            return Err("Canvas dimensions must be even".to_string());
        }
        if comp.pool_capacity <= rec.video_queue_depth {
            return Err(format!(
                "Pool capacity ({}) must exceed the video queue depth ({})",
                comp.pool_capacity, rec.video_queue_depth
            ));
        }

        let pressure = &self.pressure;
        if pressure.warning_avg10 >= pressure.critical_avg10 {
            return Err(
                "Pressure warning threshold must be below the critical threshold".to_string(),
            );
        }
        if !(0.0..=100.0).contains(&pressure.critical_avg10) {
            return Err("Pressure thresholds are percentages (0-100)".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DuocamConfig::default();
        assert_eq!(config.composition.canvas, [1920, 1080]);
        assert_eq!(config.recording.fps, 30.0);
        assert_eq!(config.recording.stop_grace(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = DuocamConfig::default();
        bad.composition.canvas = [0, 1080];
        assert!(bad.validate().is_err());

        let mut odd = DuocamConfig::default();
        odd.composition.canvas = [1921, 1080];
        assert!(odd.validate().is_err());

        let mut small_pool = DuocamConfig::default();
        small_pool.composition.pool_capacity = small_pool.recording.video_queue_depth;
        assert!(small_pool.validate().is_err());

        let mut inverted = DuocamConfig::default();
        inverted.pressure.warning_avg10 = 50.0;
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("duocam.toml");

        let mut config = DuocamConfig::default();
        config.recording.title = Some("Trip".to_string());
        config.composition.filter = ScaleFilter::CatmullRom;
        config.save_to_file(&config_path).unwrap();

        let loaded = DuocamConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.recording.title.as_deref(), Some("Trip"));
        assert_eq!(loaded.composition.filter, ScaleFilter::CatmullRom);
        assert_eq!(loaded.composition.canvas, config.composition.canvas);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DuocamConfig = toml::from_str("[recording]\nfps = 60.0\n").unwrap();
        assert_eq!(config.recording.fps, 60.0);
        assert_eq!(config.recording.audio_sample_rate, 48_000);
        assert_eq!(config.composition.canvas, [1920, 1080]);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&DuocamConfig::default()).unwrap();
        assert!(toml_string.contains("[recording]"));
        assert!(toml_string.contains("[composition]"));
        assert!(toml_string.contains("[pressure]"));
        assert!(toml_string.contains("filter = \"triangle\""));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = DuocamConfig::load_from_file("nonexistent_duocam.toml");
        assert_eq!(result.unwrap().recording.video_queue_depth, 4);
    }
}
