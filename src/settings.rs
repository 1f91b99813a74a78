use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::recorder::types::{LabelColor, OverlayStyle, PacingMode, RecordingMode};
use crate::shared::paths::{default_preferences_path, ensure_dir};

pub const KEY_OUTPUT_PATH: &str = "mp4stream.outputPath";
pub const KEY_FFMPEG_PATH: &str = "mp4stream.ffmpegPath";
pub const KEY_RECORDING_MODE: &str = "mp4stream.recordingMode";
pub const KEY_TARGET_FPS: &str = "mp4stream.targetFps";
pub const KEY_TIMELAPSE_FACTOR: &str = "mp4stream.timelapseFactor";
pub const KEY_TIMESTAMP_ENABLED: &str = "mp4stream.timestampEnabled";
pub const KEY_TIMESTAMP_COLOR: &str = "mp4stream.timestampColor";
pub const KEY_TIMESTAMP_BACKGROUND: &str = "mp4stream.timestampBackground";

pub const DEFAULT_TARGET_FPS: f64 = 30.0;
pub const MIN_TARGET_FPS: f64 = 1.0;
pub const MAX_TARGET_FPS: f64 = 120.0;
pub const DEFAULT_TIMELAPSE_FACTOR: f64 = 10.0;
pub const MIN_TIMELAPSE_FACTOR: f64 = 1.0;
pub const MAX_TIMELAPSE_FACTOR: f64 = 10_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Read(String),
    #[error("Failed to parse settings: {0}")]
    Parse(String),
    #[error("Failed to write settings file: {0}")]
    Write(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Read-only key/value lookup, as seen from a frame callback.
pub trait SettingsProvider: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn get_f64(&self, key: &str) -> Option<f64>;
    fn get_bool(&self, key: &str) -> Option<bool>;
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

/// In-memory settings, typically the host's session-scoped tier.
#[derive(Debug, Default)]
pub struct MapSettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }

    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }
}

impl SettingsProvider for MapSettings {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).as_ref().and_then(value_as_string)
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).as_ref().and_then(value_as_f64)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).as_ref().and_then(value_as_bool)
    }
}

/// Persisted preferences: a flat JSON object on disk, loaded once and
/// written through on every `set_*`.
#[derive(Debug)]
pub struct JsonPreferenceStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonPreferenceStore {
    /// Loads `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = if path.exists() {
            load_object(&path)?
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Opens the store at the default data-dir location.
    pub fn open_default() -> Result<Self, SettingsError> {
        Self::open(default_preferences_path())
    }

    /// Like [`JsonPreferenceStore::open`], but an unreadable file falls back
    /// to an empty store.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(path.clone()) {
            Ok(store) => {
                tracing::debug!(target: "mp4stream", "[SETTINGS] Preferences loaded from {:?}", path);
                store
            }
            Err(e) => {
                tracing::warn!(
                    target: "mp4stream",
                    "[SETTINGS] Failed to load preferences: {}, using defaults",
                    e
                );
                Self {
                    path,
                    values: RwLock::new(Map::new()),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.set(key, Value::String(value.to_string()))
    }

    pub fn set_f64(&self, key: &str, value: f64) -> Result<(), SettingsError> {
        let number = serde_json::Number::from_f64(value).ok_or_else(|| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        self.set(key, Value::Number(number))
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.set(key, Value::Bool(value))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        self.save(&values)
    }

    fn save(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).map_err(|e| SettingsError::Write(e.to_string()))?;
        }
        let contents =
            serde_json::to_string_pretty(values).map_err(|e| SettingsError::Write(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| SettingsError::Write(e.to_string()))?;

        tracing::debug!(target: "mp4stream", "[SETTINGS] Preferences saved to {:?}", self.path);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }
}

fn load_object(path: &Path) -> Result<Map<String, Value>, SettingsError> {
    let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Read(e.to_string()))?;
    match serde_json::from_str(&contents).map_err(|e| SettingsError::Parse(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(SettingsError::Parse(format!(
            "expected a JSON object, found {}",
            other
        ))),
    }
}

impl SettingsProvider for JsonPreferenceStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).as_ref().and_then(value_as_string)
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).as_ref().and_then(value_as_f64)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).as_ref().and_then(value_as_bool)
    }
}

/// Session tier first, persisted tier second. An empty session string counts
/// as unset.
#[derive(Clone)]
pub struct LayeredSettings {
    session: Arc<dyn SettingsProvider>,
    persisted: Arc<dyn SettingsProvider>,
}

impl LayeredSettings {
    pub fn new(session: Arc<dyn SettingsProvider>, persisted: Arc<dyn SettingsProvider>) -> Self {
        Self { session, persisted }
    }
}

impl SettingsProvider for LayeredSettings {
    fn get_string(&self, key: &str) -> Option<String> {
        self.session
            .get_string(key)
            .filter(|s| !s.is_empty())
            .or_else(|| self.persisted.get_string(key))
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.session
            .get_f64(key)
            .or_else(|| self.persisted.get_f64(key))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.session
            .get_bool(key)
            .or_else(|| self.persisted.get_bool(key))
    }
}

/// Typed snapshot of everything the recorder reads, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    pub output_path: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub mode: RecordingMode,
    pub target_fps: f64,
    pub timelapse_factor: f64,
    pub overlay: OverlayStyle,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            output_path: None,
            ffmpeg_path: String::new(),
            mode: RecordingMode::default(),
            target_fps: DEFAULT_TARGET_FPS,
            timelapse_factor: DEFAULT_TIMELAPSE_FACTOR,
            overlay: OverlayStyle::default(),
        }
    }
}

impl RecorderSettings {
    pub fn resolve(provider: &dyn SettingsProvider) -> Self {
        let output_path = provider
            .get_string(KEY_OUTPUT_PATH)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let mode = match provider.get_string(KEY_RECORDING_MODE) {
            Some(raw) => RecordingMode::parse(&raw).unwrap_or_else(|| {
                tracing::debug!(
                    target: "mp4stream",
                    "[SETTINGS] Unknown recording mode {:?}, using {}",
                    raw,
                    RecordingMode::default().as_str()
                );
                RecordingMode::default()
            }),
            None => RecordingMode::default(),
        };

        let overlay = OverlayStyle {
            enabled: provider.get_bool(KEY_TIMESTAMP_ENABLED).unwrap_or(true),
            color: provider
                .get_string(KEY_TIMESTAMP_COLOR)
                .and_then(|c| LabelColor::parse(&c))
                .unwrap_or_default(),
            background: provider.get_bool(KEY_TIMESTAMP_BACKGROUND).unwrap_or(true),
        };

        Self {
            output_path,
            ffmpeg_path: provider.get_string(KEY_FFMPEG_PATH).unwrap_or_default(),
            mode,
            target_fps: clamped(
                provider.get_f64(KEY_TARGET_FPS),
                DEFAULT_TARGET_FPS,
                MIN_TARGET_FPS,
                MAX_TARGET_FPS,
            ),
            timelapse_factor: clamped(
                provider.get_f64(KEY_TIMELAPSE_FACTOR),
                DEFAULT_TIMELAPSE_FACTOR,
                MIN_TIMELAPSE_FACTOR,
                MAX_TIMELAPSE_FACTOR,
            ),
            overlay,
        }
    }

    pub fn pacing_mode(&self) -> PacingMode {
        PacingMode::from_settings(self.mode, self.target_fps, self.timelapse_factor)
    }

    /// Rate written into the encoder's input spec. Pass-through declares the
    /// target rate as well.
    pub fn declared_fps(&self) -> f64 {
        self.target_fps
    }
}

fn clamped(value: Option<f64>, default: f64, min: f64, max: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(min, max),
        _ => default,
    }
}
