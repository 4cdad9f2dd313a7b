//! Layered process settings loaded with Figment.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `~/.config/prismgl/prismgl.toml`
//! 3. `./prismgl.toml`
//! 4. `PRISMGL_*` environment variables

#![allow(clippy::result_large_err)]

use crate::installer::host_abis;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE_NAME: &str = "prismgl.toml";
const ENV_PREFIX: &str = "PRISMGL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Shared directory hosts discover the plugin from.
    pub install_dir: PathBuf,
    /// Directory holding the preferences file.
    pub prefs_dir: PathBuf,
    /// Root of the per-ABI native library folders.
    pub native_lib_dir: PathBuf,
    /// ABI preference list, most preferred first.
    pub abis: Vec<String>,
    /// Handed to the native runtime on init.
    pub cache_dir: PathBuf,
    /// Address of the discovery endpoint.
    pub socket_path: PathBuf,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        let fallback = env::temp_dir;
        Self {
            install_dir: dirs::data_dir().unwrap_or_else(fallback).join("PrismGL"),
            prefs_dir: dirs::config_dir().unwrap_or_else(fallback).join("prismgl"),
            native_lib_dir: PathBuf::from("jniLibs"),
            abis: host_abis(),
            cache_dir: dirs::cache_dir().unwrap_or_else(fallback).join("prismgl"),
            socket_path: dirs::runtime_dir()
                .unwrap_or_else(fallback)
                .join("prismgl-renderer.sock"),
            log_level: "info".to_string(),
        }
    }
}

/// Load settings from the standard locations with env var overrides.
pub fn load() -> Result<Settings, figment::Error> {
    build_figment().extract()
}

/// Load from one explicit file, still honouring env var overrides.
pub fn load_from_path(path: &Path) -> Result<Settings, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()
}

/// Defaults overlaid with inline TOML only.
pub fn load_from_str(toml: &str) -> Result<Settings, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::string(toml))
        .extract()
}

pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("prismgl").join(SETTINGS_FILE_NAME))
                .unwrap_or_default(),
        ))
        .merge(Toml::file(SETTINGS_FILE_NAME))
        .merge(Env::prefixed(ENV_PREFIX))
}
