//! Durable key/value preference store.
//!
//! The store is the single source of truth for user intent. Each `set` is
//! written through to disk with an atomic replace before it returns, so a
//! crash right after a successful `set` never loses the write.

use crate::config::{
    clamp_resolution_scale, clamp_target_fps, Backend, RendererConfig, MAX_TARGET_FPS,
    MIN_TARGET_FPS,
};
use crate::error::PreferenceError;
use crate::fsutil;
use fs4::fs_std::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// File name of the persisted preferences inside the store directory.
pub const PREFS_FILE_NAME: &str = "prismgl_config.json";

/// Advisory lock serializing read-merge-write cycles across store handles
/// and processes sharing one directory.
pub const PREFS_LOCK_FILE_NAME: &str = "prismgl_config.json.lock";

/// Closed set of persisted preference keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    TargetFps,
    ResolutionScale,
    ShaderCache,
    DrawCallBatching,
    AdaptiveResolution,
    AsyncLoading,
    Vulkan,
    DebugMode,
}

impl PrefKey {
    pub const ALL: [PrefKey; 8] = [
        PrefKey::TargetFps,
        PrefKey::ResolutionScale,
        PrefKey::ShaderCache,
        PrefKey::DrawCallBatching,
        PrefKey::AdaptiveResolution,
        PrefKey::AsyncLoading,
        PrefKey::Vulkan,
        PrefKey::DebugMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrefKey::TargetFps => "target_fps",
            PrefKey::ResolutionScale => "resolution_scale",
            PrefKey::ShaderCache => "shader_cache",
            PrefKey::DrawCallBatching => "draw_call_batching",
            PrefKey::AdaptiveResolution => "adaptive_resolution",
            PrefKey::AsyncLoading => "async_loading",
            PrefKey::Vulkan => "vulkan",
            PrefKey::DebugMode => "debug_mode",
        }
    }

    /// Value returned by `get` when the key has never been written.
    pub fn default_value(&self) -> PrefValue {
        match self {
            PrefKey::TargetFps => PrefValue::Int(60),
            // Persisted default kept for existing preference files; the
            // configuration record clamps it to 1.0.
            PrefKey::ResolutionScale => PrefValue::Float(1.5),
            PrefKey::ShaderCache
            | PrefKey::DrawCallBatching
            | PrefKey::AdaptiveResolution
            | PrefKey::AsyncLoading
            | PrefKey::Vulkan => PrefValue::Bool(true),
            PrefKey::DebugMode => PrefValue::Bool(false),
        }
    }

    fn kind(&self) -> &'static str {
        match self.default_value() {
            PrefValue::Bool(_) => "bool",
            PrefValue::Int(_) => "int",
            PrefValue::Float(_) => "float",
        }
    }

    /// Parse a textual value (e.g. from the command line) for this key.
    pub fn parse_value(&self, raw: &str) -> Result<PrefValue, PreferenceError> {
        let raw = raw.trim();
        let mismatch = || PreferenceError::TypeMismatch {
            key: self.as_str(),
            expected: self.kind(),
        };
        match self.default_value() {
            PrefValue::Bool(_) => match raw.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(PrefValue::Bool(true)),
                "false" | "off" | "no" | "0" => Ok(PrefValue::Bool(false)),
                _ => Err(mismatch()),
            },
            PrefValue::Int(_) => raw.parse::<i64>().map(PrefValue::Int).map_err(|_| mismatch()),
            PrefValue::Float(_) => raw.parse::<f32>().map(PrefValue::Float).map_err(|_| mismatch()),
        }
    }

    /// Type-check and range-check a value before it is persisted.
    fn validate(&self, value: PrefValue) -> Result<PrefValue, PreferenceError> {
        let mismatch = PreferenceError::TypeMismatch {
            key: self.as_str(),
            expected: self.kind(),
        };
        match (self, value) {
            (PrefKey::TargetFps, PrefValue::Int(fps)) => {
                if (i64::from(MIN_TARGET_FPS)..=i64::from(MAX_TARGET_FPS)).contains(&fps) {
                    Ok(value)
                } else {
                    Err(PreferenceError::OutOfRange {
                        key: self.as_str(),
                        value: fps.to_string(),
                    })
                }
            }
            (PrefKey::ResolutionScale, PrefValue::Float(scale)) => {
                if scale.is_finite() {
                    Ok(PrefValue::Float(clamp_resolution_scale(scale)))
                } else {
                    Err(PreferenceError::OutOfRange {
                        key: self.as_str(),
                        value: scale.to_string(),
                    })
                }
            }
            (PrefKey::ResolutionScale, PrefValue::Int(scale)) => {
                self.validate(PrefValue::Float(scale as f32))
            }
            (PrefKey::TargetFps, _) | (PrefKey::ResolutionScale, _) => Err(mismatch),
            (_, PrefValue::Bool(_)) => Ok(value),
            _ => Err(mismatch),
        }
    }

    /// Coerce a value read from disk; anything of the wrong shape is ignored.
    fn accept_stored(&self, value: PrefValue) -> Option<PrefValue> {
        match (self.default_value(), value) {
            (PrefValue::Bool(_), PrefValue::Bool(_)) => Some(value),
            (PrefValue::Int(_), PrefValue::Int(_)) => Some(value),
            (PrefValue::Float(_), PrefValue::Float(_)) => Some(value),
            (PrefValue::Float(_), PrefValue::Int(v)) => Some(PrefValue::Float(v as f32)),
            _ => None,
        }
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefKey {
    type Err = PreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrefKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| PreferenceError::UnknownKey(s.to_string()))
    }
}

/// A stored preference value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Float(f32),
}

impl PrefValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrefValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PrefValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            PrefValue::Float(v) => Some(*v),
            PrefValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }
}

impl fmt::Display for PrefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefValue::Bool(v) => write!(f, "{v}"),
            PrefValue::Int(v) => write!(f, "{v}"),
            PrefValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Persistent, injectable preference store backed by a JSON file.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    lock_path: PathBuf,
    values: RwLock<BTreeMap<&'static str, PrefValue>>,
    write_lock: Mutex<()>,
}

impl PreferenceStore {
    /// Open (or create) the store in `dir`.
    ///
    /// A missing or unreadable preferences file is not an error: the store
    /// starts from defaults and logs a warning.
    pub fn open(dir: &Path) -> Result<Self, PreferenceError> {
        fs::create_dir_all(dir).map_err(|source| PreferenceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(PREFS_FILE_NAME);
        let values = load_values(&path);
        debug!(path = %path.display(), keys = values.len(), "opened preference store");

        Ok(Self {
            path,
            lock_path: dir.join(PREFS_LOCK_FILE_NAME),
            values: RwLock::new(values),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value for `key`, or its default if never set.
    pub fn get(&self, key: PrefKey) -> PrefValue {
        self.values
            .read()
            .get(key.as_str())
            .copied()
            .unwrap_or_else(|| key.default_value())
    }

    /// Persist `value` for `key`. The write is durable when this returns.
    ///
    /// Other keys are re-read from disk under the directory lock before
    /// writing, so concurrent writers on other handles or in other processes
    /// only ever lose a race on the same key.
    pub fn set(&self, key: PrefKey, value: PrefValue) -> Result<(), PreferenceError> {
        let value = key.validate(value)?;
        let _guard = self.write_lock.lock();
        let _file_lock = self.lock_dir()?;

        let mut merged = load_values(&self.path);
        merged.insert(key.as_str(), value);
        self.persist(&merged)?;
        *self.values.write() = merged;

        info!(key = key.as_str(), %value, "preference updated");
        Ok(())
    }

    /// Clear every key back to its default.
    pub fn reset(&self) -> Result<(), PreferenceError> {
        let _guard = self.write_lock.lock();
        let _file_lock = self.lock_dir()?;
        let empty = BTreeMap::new();
        self.persist(&empty)?;
        *self.values.write() = empty;

        info!(path = %self.path.display(), "preferences reset to defaults");
        Ok(())
    }

    /// Snapshot of every key with its effective value.
    pub fn entries(&self) -> Vec<(PrefKey, PrefValue)> {
        PrefKey::ALL.iter().map(|key| (*key, self.get(*key))).collect()
    }

    /// Build the configuration record from the stored preferences.
    pub fn record(&self) -> RendererConfig {
        let defaults = RendererConfig::default();
        let flag = |key: PrefKey, fallback: bool| self.get(key).as_bool().unwrap_or(fallback);

        let target_frame_rate = self
            .get(PrefKey::TargetFps)
            .as_int()
            .map(clamp_target_fps)
            .unwrap_or(defaults.target_frame_rate);
        let resolution_scale = self
            .get(PrefKey::ResolutionScale)
            .as_float()
            .map(clamp_resolution_scale)
            .unwrap_or(defaults.resolution_scale);

        RendererConfig {
            target_frame_rate,
            resolution_scale,
            shader_cache_enabled: flag(PrefKey::ShaderCache, defaults.shader_cache_enabled),
            draw_call_batching: flag(PrefKey::DrawCallBatching, defaults.draw_call_batching),
            adaptive_resolution: flag(PrefKey::AdaptiveResolution, defaults.adaptive_resolution),
            async_texture_loading: flag(PrefKey::AsyncLoading, defaults.async_texture_loading),
            backend: Backend::from_vulkan_flag(flag(PrefKey::Vulkan, defaults.backend.is_vulkan())),
            debug_mode: flag(PrefKey::DebugMode, defaults.debug_mode),
        }
    }

    /// Take the exclusive directory lock. Released when the handle is dropped.
    fn lock_dir(&self) -> Result<File, PreferenceError> {
        let io_err = |source| PreferenceError::Io {
            path: self.lock_path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        Ok(file)
    }

    fn persist(&self, values: &BTreeMap<&'static str, PrefValue>) -> Result<(), PreferenceError> {
        let content = serde_json::to_string_pretty(values)?;
        fsutil::write_atomic(&self.path, content.as_bytes()).map_err(|source| {
            PreferenceError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Read the preferences file, dropping unknown keys and mistyped values.
fn load_values(path: &Path) -> BTreeMap<&'static str, PrefValue> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read preferences, using defaults");
            return BTreeMap::new();
        }
    };

    let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed preferences file, using defaults");
            return BTreeMap::new();
        }
    };

    let mut values = BTreeMap::new();
    for (name, value) in raw {
        let Ok(key) = name.parse::<PrefKey>() else {
            debug!(key = %name, "ignoring unknown preference key");
            continue;
        };
        let parsed = serde_json::from_value::<PrefValue>(value)
            .ok()
            .and_then(|v| key.accept_stored(v));
        match parsed {
            Some(v) => {
                values.insert(key.as_str(), v);
            }
            None => warn!(key = key.as_str(), "ignoring mistyped preference value"),
        }
    }
    values
}
