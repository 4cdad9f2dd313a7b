//! Plugin manifest (`config.json`) encoding and decoding.
//!
//! The manifest is read by launchers to detect and configure the renderer.
//! Its shape is a compatibility contract with existing hosts:
//!
//! ```json
//! {
//!   "name": "PrismGL",
//!   "version": "1.0.0",
//!   "description": "...",
//!   "library": "libPrismGL.so",
//!   "opengl": { "version": "4.6", "glsl_version": "460" },
//!   "optimizations": { "shader_cache": true, ... , "resolution_scale": 1.0 },
//!   "compatibility": { "min_gles_version": "3.2", "supported_launchers": [...], "supported_mods": [...] }
//! }
//! ```
//!
//! The manifest is a projection of the preference store. It is always
//! rewritten in full and never merged with what is already on disk.

use crate::config::{clamp_resolution_scale, clamp_target_fps, Backend, RendererConfig};
use crate::error::ManifestError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Fixed file name of the manifest inside the install directory.
pub const MANIFEST_FILE_NAME: &str = "config.json";

/// Identity and artifact references advertised to hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginIdentity {
    pub name: String,
    pub version: String,
    pub description: String,
    /// File name of the native library.
    pub library: String,
    pub gl_version: String,
    pub glsl_version: String,
}

impl Default for PluginIdentity {
    fn default() -> Self {
        Self {
            name: "PrismGL".to_string(),
            version: "1.0.0".to_string(),
            description: "High-performance OpenGL 4.x to GLES 3.x renderer".to_string(),
            library: "libPrismGL.so".to_string(),
            gl_version: "4.6".to_string(),
            glsl_version: "460".to_string(),
        }
    }
}

/// Descriptive compatibility metadata. Reported only, never used to gate behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    pub min_gles_version: String,
    pub supported_launchers: Vec<String>,
    pub supported_mods: Vec<String>,
}

impl Default for Compatibility {
    fn default() -> Self {
        Self {
            min_gles_version: "3.2".to_string(),
            supported_launchers: ["PojavLauncher", "Zalith Launcher", "Amethyst Launcher"]
                .into_iter()
                .map(String::from)
                .collect(),
            supported_mods: ["Sodium", "Iris Shaders", "Create", "JourneyMap", "OptiFine"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// A decoded manifest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub identity: PluginIdentity,
    pub config: RendererConfig,
    pub compatibility: Compatibility,
}

impl Manifest {
    pub fn new(identity: PluginIdentity, config: RendererConfig, compatibility: Compatibility) -> Self {
        Self {
            identity,
            config,
            compatibility,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        encode(&self.config, &self.identity, &self.compatibility)
    }
}

// Wire layout. Field declaration order is the serialized order.

#[derive(Serialize)]
struct ManifestDocument<'a> {
    name: &'a str,
    version: &'a str,
    description: &'a str,
    library: &'a str,
    opengl: OpenGlSection<'a>,
    optimizations: OptimizationsSection,
    compatibility: CompatibilitySection<'a>,
}

#[derive(Serialize)]
struct OpenGlSection<'a> {
    version: &'a str,
    glsl_version: &'a str,
}

#[derive(Serialize)]
struct OptimizationsSection {
    shader_cache: bool,
    draw_call_batching: bool,
    adaptive_resolution: bool,
    async_texture_loading: bool,
    resolution_scale: f32,
    target_fps: u32,
    backend: Backend,
    debug_mode: bool,
}

#[derive(Serialize)]
struct CompatibilitySection<'a> {
    min_gles_version: &'a str,
    supported_launchers: &'a [String],
    supported_mods: &'a [String],
}

/// Encode a manifest document.
///
/// Output is deterministic: identical input always yields identical bytes.
/// Out-of-range numeric values are clamped, never rejected.
pub fn encode(
    config: &RendererConfig,
    identity: &PluginIdentity,
    compatibility: &Compatibility,
) -> Result<String, serde_json::Error> {
    let config = config.normalized();
    let document = ManifestDocument {
        name: &identity.name,
        version: &identity.version,
        description: &identity.description,
        library: &identity.library,
        opengl: OpenGlSection {
            version: &identity.gl_version,
            glsl_version: &identity.glsl_version,
        },
        optimizations: OptimizationsSection {
            shader_cache: config.shader_cache_enabled,
            draw_call_batching: config.draw_call_batching,
            adaptive_resolution: config.adaptive_resolution,
            async_texture_loading: config.async_texture_loading,
            resolution_scale: config.resolution_scale,
            target_fps: config.target_frame_rate,
            backend: config.backend,
            debug_mode: config.debug_mode,
        },
        compatibility: CompatibilitySection {
            min_gles_version: &compatibility.min_gles_version,
            supported_launchers: &compatibility.supported_launchers,
            supported_mods: &compatibility.supported_mods,
        },
    };

    let mut json = serde_json::to_string_pretty(&document)?;
    json.push('\n');
    Ok(json)
}

/// Decode a manifest document.
///
/// Every field is optional; missing or mistyped fields take their defaults.
/// Fails only if `text` is not JSON at all.
pub fn decode(text: &str) -> Result<Manifest, ManifestError> {
    let value: Value = serde_json::from_str(text)?;
    let empty = Map::new();
    let root = match value.as_object() {
        Some(root) => root,
        None => {
            warn!("manifest root is not an object, using defaults");
            &empty
        }
    };

    let id_defaults = PluginIdentity::default();
    let opengl = section(root, "opengl");
    let identity = PluginIdentity {
        name: string_field(Some(root), "name", &id_defaults.name),
        version: string_field(Some(root), "version", &id_defaults.version),
        description: string_field(Some(root), "description", &id_defaults.description),
        library: string_field(Some(root), "library", &id_defaults.library),
        gl_version: string_field(opengl, "version", &id_defaults.gl_version),
        glsl_version: string_field(opengl, "glsl_version", &id_defaults.glsl_version),
    };

    let defaults = RendererConfig::default();
    let opts = section(root, "optimizations");
    let config = RendererConfig {
        target_frame_rate: int_field(opts, "target_fps")
            .map(clamp_target_fps)
            .unwrap_or(defaults.target_frame_rate),
        resolution_scale: float_field(opts, "resolution_scale")
            .map(clamp_resolution_scale)
            .unwrap_or(defaults.resolution_scale),
        shader_cache_enabled: bool_field(opts, "shader_cache", defaults.shader_cache_enabled),
        draw_call_batching: bool_field(opts, "draw_call_batching", defaults.draw_call_batching),
        adaptive_resolution: bool_field(opts, "adaptive_resolution", defaults.adaptive_resolution),
        async_texture_loading: bool_field(opts, "async_texture_loading", defaults.async_texture_loading),
        backend: opts
            .and_then(|o| o.get("backend"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.backend),
        debug_mode: bool_field(opts, "debug_mode", defaults.debug_mode),
    };

    let compat_defaults = Compatibility::default();
    let compat = section(root, "compatibility");
    let compatibility = Compatibility {
        min_gles_version: string_field(compat, "min_gles_version", &compat_defaults.min_gles_version),
        supported_launchers: string_list(compat, "supported_launchers")
            .unwrap_or(compat_defaults.supported_launchers),
        supported_mods: string_list(compat, "supported_mods").unwrap_or(compat_defaults.supported_mods),
    };

    Ok(Manifest {
        identity,
        config,
        compatibility,
    })
}

/// Read and decode the manifest at `path`.
pub fn read_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = decode(&text)?;
    debug!(path = %path.display(), "manifest loaded");
    Ok(manifest)
}

/// Read the manifest at `path`, falling back to defaults on any failure.
pub fn load_or_default(path: &Path) -> Manifest {
    match read_manifest(path) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load manifest, using defaults");
            Manifest::default()
        }
    }
}

fn section<'a>(root: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    root.get(key).and_then(Value::as_object)
}

fn string_field(obj: Option<&Map<String, Value>>, key: &str, default: &str) -> String {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn bool_field(obj: Option<&Map<String, Value>>, key: &str, default: bool) -> bool {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn float_field(obj: Option<&Map<String, Value>>, key: &str) -> Option<f32> {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_f64)
        .map(|v| v as f32)
}

fn int_field(obj: Option<&Map<String, Value>>, key: &str) -> Option<i64> {
    let value = obj.and_then(|o| o.get(key))?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v.round() as i64))
}

fn string_list(obj: Option<&Map<String, Value>>, key: &str) -> Option<Vec<String>> {
    let items = obj.and_then(|o| o.get(key)).and_then(Value::as_array)?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
    )
}
