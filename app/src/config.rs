// Configuration persistence: JSON file in the data folder plus env overrides

use crate::error::AppError;
use camera_capture::{CaptureConstraints, FacingMode, RecorderOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::info;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub recording: RecordingSettings,
    pub thumbnail: ThumbnailSettings,
    pub player: PlayerSettings,
    pub account: AccountSettings,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|p| p.join(".reelbox"))
            .unwrap_or_else(|| PathBuf::from(".reelbox"));

        Self {
            data_dir,
            recording: RecordingSettings::default(),
            thumbnail: ThumbnailSettings::default(),
            player: PlayerSettings::default(),
            account: AccountSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Countdown ceiling; recording stops automatically here
    pub max_seconds: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub facing: FacingMode,
    pub audio: bool,
    pub fragment_interval_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            max_seconds: 10,
            width: 720,
            height: 1280,
            fps: 15,
            facing: FacingMode::User,
            audio: true,
            fragment_interval_ms: 1000,
            jpeg_quality: 80,
        }
    }
}

impl RecordingSettings {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            ideal_width: self.width,
            ideal_height: self.height,
            fps: self.fps,
            facing: self.facing,
            audio: self.audio,
        }
    }

    pub fn recorder_options(&self) -> RecorderOptions {
        RecorderOptions {
            fragment_interval: Duration::from_millis(self.fragment_interval_ms.max(1)),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub timeout_ms: u64,
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_width: 320,
            max_height: 568,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub controls_hide_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self { controls_hide_ms: 3000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountBackend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub backend: AccountBackend,
    /// Base URL of the hosted backend, e.g. `https://xyz.example.co`
    pub url: String,
    pub anon_key: String,
    pub request_timeout_secs: u64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            backend: AccountBackend::Local,
            url: String::new(),
            anon_key: String::new(),
            request_timeout_secs: 10,
        }
    }
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load configuration from `<data_dir>/config.json`, falling back to defaults,
/// then apply `REELBOX_*` environment overrides.
pub fn load_config(data_dir: Option<&Path>) -> Result<AppConfig, AppError> {
    let env_dir = std::env::var_os("REELBOX_DATA_DIR").map(PathBuf::from);
    let data_dir = env_dir
        .or_else(|| data_dir.map(Path::to_path_buf))
        .unwrap_or_else(|| AppConfig::default().data_dir);
    let path = config_path(&data_dir);

    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {}", e)))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;
        info!("Loaded config from {:?}", path);
        config
    } else {
        info!("No config found at {:?}, using defaults", path);
        AppConfig::default()
    };

    config.data_dir = data_dir;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(url) = std::env::var("REELBOX_ACCOUNT_URL") {
        config.account.url = url;
        config.account.backend = AccountBackend::Remote;
    }
    if let Ok(key) = std::env::var("REELBOX_ACCOUNT_KEY") {
        config.account.anon_key = key;
    }
}

/// Save configuration to `<data_dir>/config.json`
pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    let path = config_path(&config.data_dir);

    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| AppError::Config(format!("Failed to create config dir: {}", e)))?;

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(&path, contents)
        .map_err(|e| AppError::Config(format!("Failed to write config: {}", e)))?;

    info!("Saved config to {:?}", path);
    Ok(())
}

/// Module for directory operations
pub mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.recording.max_seconds, 10);
        assert_eq!(config.recording.width, 720);
        assert_eq!(config.recording.height, 1280);
        assert!(config.recording.audio);
        assert_eq!(config.player.controls_hide_ms, 3000);
        assert_eq!(config.account.backend, AccountBackend::Local);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"recording": {"max_seconds": 5}, "account": {"backend": "remote"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.recording.max_seconds, 5);
        assert_eq!(config.recording.fps, 15);
        assert_eq!(config.account.backend, AccountBackend::Remote);
        assert_eq!(config.thumbnail.timeout_ms, 5000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.recording.max_seconds = 7;
        save_config(&config).unwrap();

        let loaded = load_config(Some(dir.path())).unwrap();
        assert_eq!(loaded.recording.max_seconds, 7);
        assert_eq!(loaded.data_dir, dir.path());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();
        assert!(matches!(load_config(Some(dir.path())), Err(AppError::Config(_))));
    }
}
