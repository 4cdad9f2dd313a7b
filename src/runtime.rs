//! Bridge between the configuration record and the live native runtime.

use crate::config::{RendererConfig, DEFAULT_TARGET_FPS};
use crate::error::RuntimeError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Argument block of the native configuration call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeConfig {
    pub shader_cache: bool,
    pub draw_call_batching: bool,
    pub adaptive_resolution: bool,
    pub async_texture_loading: bool,
    pub vulkan_backend: bool,
    pub resolution_scale: f32,
}

impl From<&RendererConfig> for NativeConfig {
    fn from(config: &RendererConfig) -> Self {
        Self {
            shader_cache: config.shader_cache_enabled,
            draw_call_batching: config.draw_call_batching,
            adaptive_resolution: config.adaptive_resolution,
            async_texture_loading: config.async_texture_loading,
            vulkan_backend: config.backend.is_vulkan(),
            resolution_scale: config.resolution_scale,
        }
    }
}

/// The native rendering engine as seen from the bridge.
pub trait NativeRuntime: Send {
    /// Returns `false` if the engine could not start.
    fn init(&mut self, cache_dir: &Path) -> bool;
    fn shutdown(&mut self);
    fn set_config(&mut self, config: NativeConfig);
    fn set_target_fps(&mut self, fps: u32);
    fn device_profile(&self) -> String;
    /// Last frame time in seconds.
    fn frame_time(&self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Initialized,
    ShuttingDown,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Uninitialized => "uninitialized",
            RuntimeState::Initialized => "initialized",
            RuntimeState::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns a runtime handle and enforces its lifecycle.
///
/// Every call other than `initialize` and `shutdown` requires the
/// `Initialized` state and fails with [`RuntimeError::NotInitialized`]
/// otherwise.
pub struct RuntimeBridge<R: NativeRuntime> {
    runtime: R,
    state: RuntimeState,
}

impl<R: NativeRuntime> RuntimeBridge<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            state: RuntimeState::Uninitialized,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn initialize(&mut self, cache_dir: &Path) -> Result<(), RuntimeError> {
        if self.state != RuntimeState::Uninitialized {
            return Err(RuntimeError::AlreadyInitialized);
        }
        if !self.runtime.init(cache_dir) {
            warn!(cache_dir = %cache_dir.display(), "native runtime failed to start");
            return Err(RuntimeError::InitFailed(cache_dir.display().to_string()));
        }
        self.state = RuntimeState::Initialized;
        info!(cache_dir = %cache_dir.display(), "native runtime initialized");
        Ok(())
    }

    /// Push `config` into the runtime as one configuration call followed by
    /// the target frame rate.
    pub fn apply(&mut self, config: &RendererConfig) -> Result<(), RuntimeError> {
        self.ensure_initialized()?;
        let native = NativeConfig::from(config);
        self.runtime.set_config(native);
        self.runtime.set_target_fps(config.target_frame_rate);
        debug!(
            resolution_scale = native.resolution_scale,
            vulkan = native.vulkan_backend,
            target_fps = config.target_frame_rate,
            "runtime configuration applied"
        );
        Ok(())
    }

    pub fn query_device_profile(&self) -> Result<String, RuntimeError> {
        self.ensure_initialized()?;
        Ok(self.runtime.device_profile())
    }

    pub fn query_frame_time(&self) -> Result<f32, RuntimeError> {
        self.ensure_initialized()?;
        Ok(self.runtime.frame_time())
    }

    /// Shut the runtime down. Does nothing when it was never started.
    pub fn shutdown(&mut self) {
        if self.state != RuntimeState::Initialized {
            return;
        }
        self.state = RuntimeState::ShuttingDown;
        self.runtime.shutdown();
        self.state = RuntimeState::Uninitialized;
        info!("native runtime shut down");
    }

    fn ensure_initialized(&self) -> Result<(), RuntimeError> {
        match self.state {
            RuntimeState::Initialized => Ok(()),
            other => Err(RuntimeError::NotInitialized(other.as_str())),
        }
    }
}

impl<R: NativeRuntime> Drop for RuntimeBridge<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Software stand-in for the native engine.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRuntime {
    cache_dir: Option<PathBuf>,
    active: Option<NativeConfig>,
    target_fps: Option<u32>,
    configure_calls: usize,
}

impl HeadlessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration from the last `set_config` call.
    pub fn active_config(&self) -> Option<NativeConfig> {
        self.active
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps.unwrap_or(DEFAULT_TARGET_FPS)
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn configure_calls(&self) -> usize {
        self.configure_calls
    }
}

impl NativeRuntime for HeadlessRuntime {
    fn init(&mut self, cache_dir: &Path) -> bool {
        self.cache_dir = Some(cache_dir.to_path_buf());
        true
    }

    fn shutdown(&mut self) {
        self.active = None;
        self.target_fps = None;
    }

    fn set_config(&mut self, config: NativeConfig) {
        self.active = Some(config);
        self.configure_calls += 1;
    }

    fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = Some(fps);
    }

    fn device_profile(&self) -> String {
        format!("Headless ({}/{})", std::env::consts::OS, std::env::consts::ARCH)
    }

    fn frame_time(&self) -> f32 {
        1.0 / self.target_fps().max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    struct FailingRuntime;

    impl NativeRuntime for FailingRuntime {
        fn init(&mut self, _cache_dir: &Path) -> bool {
            false
        }
        fn shutdown(&mut self) {}
        fn set_config(&mut self, _config: NativeConfig) {}
        fn set_target_fps(&mut self, _fps: u32) {}
        fn device_profile(&self) -> String {
            String::new()
        }
        fn frame_time(&self) -> f32 {
            0.0
        }
    }

    #[test]
    fn calls_before_init_are_rejected() {
        let mut bridge = RuntimeBridge::new(HeadlessRuntime::new());

        assert_eq!(
            bridge.apply(&RendererConfig::default()),
            Err(RuntimeError::NotInitialized("uninitialized"))
        );
        assert!(bridge.query_device_profile().is_err());
        assert!(bridge.query_frame_time().is_err());
        assert_eq!(bridge.runtime().configure_calls(), 0);
    }

    #[test]
    fn apply_forwards_config_verbatim() {
        let mut bridge = RuntimeBridge::new(HeadlessRuntime::new());
        bridge.initialize(Path::new("/tmp/prismgl-cache")).unwrap();

        let config = RendererConfig {
            target_frame_rate: 30,
            resolution_scale: 0.5,
            shader_cache_enabled: false,
            backend: Backend::OpenGL,
            ..RendererConfig::default()
        };
        bridge.apply(&config).unwrap();

        let active = bridge.runtime().active_config().unwrap();
        assert_eq!(active, NativeConfig::from(&config));
        assert!(!active.vulkan_backend);
        assert_eq!(active.resolution_scale, 0.5);
        assert_eq!(bridge.runtime().target_fps(), 30);
        assert!((bridge.query_frame_time().unwrap() - 1.0 / 30.0).abs() < 1e-6);
        assert!(bridge.query_device_profile().unwrap().starts_with("Headless"));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut bridge = RuntimeBridge::new(HeadlessRuntime::new());
        assert_eq!(bridge.state(), RuntimeState::Uninitialized);

        // Shutdown before init is a no-op.
        bridge.shutdown();
        assert_eq!(bridge.state(), RuntimeState::Uninitialized);

        bridge.initialize(Path::new("cache")).unwrap();
        assert_eq!(bridge.state(), RuntimeState::Initialized);
        assert_eq!(bridge.initialize(Path::new("cache")), Err(RuntimeError::AlreadyInitialized));

        bridge.shutdown();
        assert_eq!(bridge.state(), RuntimeState::Uninitialized);
        assert!(bridge.apply(&RendererConfig::default()).is_err());

        bridge.initialize(Path::new("cache")).unwrap();
        assert!(bridge.apply(&RendererConfig::default()).is_ok());
    }

    #[test]
    fn failed_init_stays_uninitialized() {
        let mut bridge = RuntimeBridge::new(FailingRuntime);

        assert!(matches!(
            bridge.initialize(Path::new("cache")),
            Err(RuntimeError::InitFailed(_))
        ));
        assert_eq!(bridge.state(), RuntimeState::Uninitialized);
    }
}
