//! The renderer configuration record shared by the preference store,
//! the manifest and the native runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_RESOLUTION_SCALE: f32 = 0.25;
pub const MAX_RESOLUTION_SCALE: f32 = 1.0;
pub const DEFAULT_RESOLUTION_SCALE: f32 = 1.0;

pub const MIN_TARGET_FPS: u32 = 1;
pub const MAX_TARGET_FPS: u32 = 240;
pub const DEFAULT_TARGET_FPS: u32 = 60;

/// Graphics backend the native runtime translates onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    OpenGL,
    Vulkan,
}

impl Backend {
    pub fn from_vulkan_flag(vulkan: bool) -> Self {
        if vulkan {
            Backend::Vulkan
        } else {
            Backend::OpenGL
        }
    }

    pub fn is_vulkan(&self) -> bool {
        matches!(self, Backend::Vulkan)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::OpenGL => "opengl",
            Backend::Vulkan => "vulkan",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opengl" | "gl" => Ok(Backend::OpenGL),
            "vulkan" | "vk" => Ok(Backend::Vulkan),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Canonical set of user-controlled rendering settings.
///
/// `resolution_scale` is a fraction of native resolution in
/// `[MIN_RESOLUTION_SCALE, MAX_RESOLUTION_SCALE]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    pub target_frame_rate: u32,
    pub resolution_scale: f32,
    pub shader_cache_enabled: bool,
    pub draw_call_batching: bool,
    pub adaptive_resolution: bool,
    pub async_texture_loading: bool,
    pub backend: Backend,
    pub debug_mode: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            target_frame_rate: DEFAULT_TARGET_FPS,
            resolution_scale: DEFAULT_RESOLUTION_SCALE,
            shader_cache_enabled: true,
            draw_call_batching: true,
            adaptive_resolution: true,
            async_texture_loading: true,
            backend: Backend::Vulkan,
            debug_mode: false,
        }
    }
}

impl RendererConfig {
    /// Returns a copy with every numeric field clamped into its domain.
    pub fn normalized(mut self) -> Self {
        self.resolution_scale = clamp_resolution_scale(self.resolution_scale);
        self.target_frame_rate = clamp_target_fps(i64::from(self.target_frame_rate));
        self
    }

    pub fn is_valid(&self) -> bool {
        *self == self.normalized()
    }
}

/// Clamp a resolution scale into `[0.25, 1.0]`. NaN maps to the default.
pub fn clamp_resolution_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return DEFAULT_RESOLUTION_SCALE;
    }
    scale.clamp(MIN_RESOLUTION_SCALE, MAX_RESOLUTION_SCALE)
}

pub fn clamp_target_fps(fps: i64) -> u32 {
    fps.clamp(i64::from(MIN_TARGET_FPS), i64::from(MAX_TARGET_FPS)) as u32
}

/// Map a 0..=100 slider position linearly onto the resolution scale domain.
pub fn resolution_scale_from_percent(percent: u8) -> f32 {
    let t = f32::from(percent.min(100)) / 100.0;
    MIN_RESOLUTION_SCALE + t * (MAX_RESOLUTION_SCALE - MIN_RESOLUTION_SCALE)
}

/// Inverse of [`resolution_scale_from_percent`], for positioning a slider.
pub fn percent_from_resolution_scale(scale: f32) -> u8 {
    let scale = clamp_resolution_scale(scale);
    let t = (scale - MIN_RESOLUTION_SCALE) / (MAX_RESOLUTION_SCALE - MIN_RESOLUTION_SCALE);
    (t * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(RendererConfig::default().is_valid());
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(clamp_resolution_scale(5.0), 1.0);
        assert_eq!(clamp_resolution_scale(-1.0), 0.25);
        assert_eq!(clamp_resolution_scale(f32::NAN), DEFAULT_RESOLUTION_SCALE);
        assert_eq!(clamp_target_fps(0), 1);
        assert_eq!(clamp_target_fps(1000), 240);

        let config = RendererConfig {
            resolution_scale: 1.5,
            target_frame_rate: 500,
            ..Default::default()
        };
        assert!(!config.is_valid());
        let normalized = config.normalized();
        assert_eq!(normalized.resolution_scale, 1.0);
        assert_eq!(normalized.target_frame_rate, 240);
    }

    #[test]
    fn slider_maps_onto_canonical_domain() {
        assert_eq!(resolution_scale_from_percent(0), 0.25);
        assert_eq!(resolution_scale_from_percent(100), 1.0);
        assert_eq!(resolution_scale_from_percent(200), 1.0);
        assert_eq!(percent_from_resolution_scale(0.25), 0);
        assert_eq!(percent_from_resolution_scale(1.0), 100);
        assert_eq!(percent_from_resolution_scale(resolution_scale_from_percent(40)), 40);
    }

    #[test]
    fn backend_parses_and_displays() {
        assert_eq!("Vulkan".parse::<Backend>(), Ok(Backend::Vulkan));
        assert_eq!("gl".parse::<Backend>(), Ok(Backend::OpenGL));
        assert!("metal".parse::<Backend>().is_err());
        assert_eq!(Backend::from_vulkan_flag(false).to_string(), "opengl");
    }
}
