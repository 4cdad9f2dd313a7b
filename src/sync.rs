//! Keeps the preference store, the installed manifest and the live runtime
//! in agreement.
//!
//! Every pass follows the same order: the preference write must succeed
//! before the manifest is rewritten, and the runtime only sees the record
//! once both are on disk.

use crate::config::RendererConfig;
use crate::error::SyncError;
use crate::installer::{InstalledArtifactSet, Installer};
use crate::preferences::{PrefKey, PrefValue, PreferenceStore};
use crate::runtime::{NativeRuntime, RuntimeBridge};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Outcome of one synchronization pass.
#[derive(Debug)]
pub struct SyncReport {
    pub config: RendererConfig,
    pub artifacts: InstalledArtifactSet,
}

pub struct Synchronizer<R: NativeRuntime> {
    store: Arc<PreferenceStore>,
    installer: Installer,
    install_dir: PathBuf,
    bridge: RuntimeBridge<R>,
}

impl<R: NativeRuntime> Synchronizer<R> {
    pub fn new(
        store: Arc<PreferenceStore>,
        installer: Installer,
        install_dir: impl Into<PathBuf>,
        bridge: RuntimeBridge<R>,
    ) -> Self {
        Self {
            store,
            installer,
            install_dir: install_dir.into(),
            bridge,
        }
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn bridge(&self) -> &RuntimeBridge<R> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut RuntimeBridge<R> {
        &mut self.bridge
    }

    /// The record implied by the stored preferences.
    pub fn current(&self) -> RendererConfig {
        self.store.record()
    }

    /// Persist one preference, then propagate it to the manifest and runtime.
    pub fn update(&mut self, key: PrefKey, value: PrefValue) -> Result<SyncReport, SyncError> {
        self.store.set(key, value)?;
        self.apply()
    }

    /// Rewrite the manifest and push the stored record into the runtime.
    pub fn apply(&mut self) -> Result<SyncReport, SyncError> {
        let config = self.store.record();
        let artifacts = self.installer.install(&self.install_dir, &config)?;
        self.bridge.apply(&config)?;

        info!(
            dir = %self.install_dir.display(),
            state = %artifacts.state(),
            target_fps = config.target_frame_rate,
            resolution_scale = config.resolution_scale,
            "configuration synchronized"
        );
        Ok(SyncReport { config, artifacts })
    }

    /// Restore every preference to its default and re-sync.
    pub fn reset(&mut self) -> Result<SyncReport, SyncError> {
        self.store.reset()?;
        self.apply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::manifest::{read_manifest, MANIFEST_FILE_NAME};
    use crate::runtime::HeadlessRuntime;
    use tempfile::TempDir;

    fn synchronizer(root: &Path, init: bool) -> Synchronizer<HeadlessRuntime> {
        let store = Arc::new(PreferenceStore::open(&root.join("prefs")).unwrap());
        let installer = Installer::new(root.join("jniLibs")).with_abis(["arm64-v8a"]);
        let mut bridge = RuntimeBridge::new(HeadlessRuntime::new());
        if init {
            bridge.initialize(&root.join("cache")).unwrap();
        }
        Synchronizer::new(store, installer, root.join("install"), bridge)
    }

    #[test]
    fn update_converges_everywhere() {
        let dir = TempDir::new().unwrap();
        let mut sync = synchronizer(dir.path(), true);

        let report = sync
            .update(PrefKey::ResolutionScale, PrefValue::Float(0.5))
            .unwrap();
        assert_eq!(report.config.resolution_scale, 0.5);

        let manifest = read_manifest(&dir.path().join("install").join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(manifest.config.resolution_scale, 0.5);

        let active = sync.bridge().runtime().active_config().unwrap();
        assert_eq!(active.resolution_scale, 0.5);
        assert_eq!(sync.current(), manifest.config);
    }

    #[test]
    fn rejected_value_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut sync = synchronizer(dir.path(), true);

        assert!(matches!(
            sync.update(PrefKey::TargetFps, PrefValue::Bool(true)),
            Err(SyncError::Preference(_))
        ));
        assert!(!dir.path().join("install").join(MANIFEST_FILE_NAME).exists());
        assert_eq!(sync.bridge().runtime().configure_calls(), 0);
    }

    #[test]
    fn uninitialized_runtime_is_reported_after_durable_write() {
        let dir = TempDir::new().unwrap();
        let mut sync = synchronizer(dir.path(), false);

        let err = sync.update(PrefKey::TargetFps, PrefValue::Int(30)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Runtime(RuntimeError::NotInitialized(_))
        ));
        assert_eq!(sync.store().get(PrefKey::TargetFps), PrefValue::Int(30));
    }

    #[test]
    fn reset_restores_defaults() {
        let dir = TempDir::new().unwrap();
        let mut sync = synchronizer(dir.path(), true);

        sync.update(PrefKey::Vulkan, PrefValue::Bool(false)).unwrap();
        assert!(!sync.bridge().runtime().active_config().unwrap().vulkan_backend);

        let report = sync.reset().unwrap();
        assert_eq!(report.config, RendererConfig::default());
        assert!(sync.bridge().runtime().active_config().unwrap().vulkan_backend);
    }
}
