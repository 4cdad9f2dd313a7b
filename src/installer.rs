//! Installation of the renderer artifacts into shared storage.
//!
//! `install` stages the native library for the primary ABI and writes the
//! manifest into a directory that host launchers can read. Each step is
//! idempotent and every write is an atomic replace, so a host reading
//! concurrently only ever sees complete files.

use crate::config::RendererConfig;
use crate::error::InstallError;
use crate::fsutil;
use crate::manifest::{self, Compatibility, PluginIdentity, MANIFEST_FILE_NAME};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a given install directory currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    /// Manifest staged but no native library.
    ManifestOnly,
    Complete,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstallState::NotInstalled => "Not Installed",
            InstallState::ManifestOnly => "Installed, library missing",
            InstallState::Complete => "Installed and Ready",
        };
        f.write_str(text)
    }
}

/// The native library staged by an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedLibrary {
    pub abi: String,
    pub path: PathBuf,
    /// Hex MD5 of the staged bytes.
    pub digest: String,
    pub size: u64,
    /// False when an identical copy was already in place.
    pub copied: bool,
}

/// Result of an install: which artifacts were actually staged.
#[derive(Debug)]
pub struct InstalledArtifactSet {
    pub directory: PathBuf,
    pub manifest: PathBuf,
    pub library: Option<StagedLibrary>,
    /// Why the library was not staged, if it wasn't.
    pub library_error: Option<InstallError>,
    pub installed_at: DateTime<Local>,
}

impl InstalledArtifactSet {
    /// State of what this install staged.
    ///
    /// A failed library stage does not remove a library left in the
    /// directory by an earlier install, so `ManifestOnly` here can coexist
    /// with [`inspect`] reporting `Complete` and the old library still being
    /// served. Use [`inspect`] for what is actually on disk.
    pub fn state(&self) -> InstallState {
        if self.library.is_some() {
            InstallState::Complete
        } else {
            InstallState::ManifestOnly
        }
    }

    pub fn is_partial(&self) -> bool {
        self.library.is_none()
    }
}

/// Ordered ABI preference list for the running platform, most preferred first.
pub fn host_abis() -> Vec<String> {
    let abis: &[&str] = match std::env::consts::ARCH {
        "aarch64" => &["arm64-v8a", "armeabi-v7a", "armeabi"],
        "arm" => &["armeabi-v7a", "armeabi"],
        "x86_64" => &["x86_64", "x86"],
        "x86" => &["x86"],
        other => return vec![other.to_string()],
    };
    abis.iter().map(|abi| abi.to_string()).collect()
}

/// Stages the library and manifest for host discovery.
#[derive(Debug, Clone)]
pub struct Installer {
    native_lib_dir: PathBuf,
    abis: Vec<String>,
    identity: PluginIdentity,
    compatibility: Compatibility,
}

impl Installer {
    /// `native_lib_dir` holds one sub-directory per ABI, each containing the library.
    pub fn new(native_lib_dir: impl Into<PathBuf>) -> Self {
        Self {
            native_lib_dir: native_lib_dir.into(),
            abis: host_abis(),
            identity: PluginIdentity::default(),
            compatibility: Compatibility::default(),
        }
    }

    pub fn with_abis<I, S>(mut self, abis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abis = abis.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_identity(mut self, identity: PluginIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_compatibility(mut self, compatibility: Compatibility) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn identity(&self) -> &PluginIdentity {
        &self.identity
    }

    pub fn compatibility(&self) -> &Compatibility {
        &self.compatibility
    }

    /// The primary ABI and the path its library is expected at.
    pub fn source_library(&self) -> Result<(String, PathBuf), InstallError> {
        let abi = self.abis.first().ok_or(InstallError::NoAbi)?;
        let path = self.native_lib_dir.join(abi).join(&self.identity.library);
        Ok((abi.clone(), path))
    }

    /// Install (or re-install) into `target_dir`.
    ///
    /// A missing native library does not fail the install: the manifest is
    /// still written and the result reports a manifest-only state.
    pub fn install(
        &self,
        target_dir: &Path,
        config: &RendererConfig,
    ) -> Result<InstalledArtifactSet, InstallError> {
        fs::create_dir_all(target_dir).map_err(|source| InstallError::CreateDir {
            path: target_dir.to_path_buf(),
            source,
        })?;

        let (library, library_error) = match self.stage_library(target_dir) {
            Ok(staged) => (Some(staged), None),
            Err(e) => {
                warn!(dir = %target_dir.display(), error = %e, "library not staged, installing manifest only");
                (None, Some(e))
            }
        };

        let manifest = self.write_manifest(target_dir, config)?;

        let set = InstalledArtifactSet {
            directory: target_dir.to_path_buf(),
            manifest,
            library,
            library_error,
            installed_at: Local::now(),
        };
        info!(dir = %target_dir.display(), state = %set.state(), "install finished");
        Ok(set)
    }

    /// Encode the manifest for `config` and atomically replace `config.json`.
    pub fn write_manifest(
        &self,
        target_dir: &Path,
        config: &RendererConfig,
    ) -> Result<PathBuf, InstallError> {
        let path = target_dir.join(MANIFEST_FILE_NAME);
        let content = manifest::encode(config, &self.identity, &self.compatibility)?;
        fsutil::write_atomic(&path, content.as_bytes()).map_err(|source| InstallError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), bytes = content.len(), "manifest written");
        Ok(path)
    }

    fn stage_library(&self, target_dir: &Path) -> Result<StagedLibrary, InstallError> {
        let (abi, source) = self.source_library()?;
        if !source.is_file() {
            return Err(InstallError::ArtifactMissing { abi, path: source });
        }

        let dest = target_dir.join(&self.identity.library);
        let write_err = |source| InstallError::Write {
            path: dest.clone(),
            source,
        };
        let digest = fsutil::file_digest(&source).map_err(|e| {
            debug!(path = %source.display(), error = %e, "failed to read native library");
            InstallError::ArtifactMissing {
                abi: abi.clone(),
                path: source.clone(),
            }
        })?;

        let up_to_date = dest.is_file()
            && fsutil::file_digest(&dest).map(|d| d == digest).unwrap_or(false);
        let (size, copied) = if up_to_date {
            debug!(path = %dest.display(), "library already up to date");
            (fs::metadata(&dest).map_err(write_err)?.len(), false)
        } else {
            let size = fsutil::copy_atomic(&source, &dest).map_err(write_err)?;
            info!(abi = %abi, path = %dest.display(), bytes = size, "native library staged");
            (size, true)
        };

        Ok(StagedLibrary {
            abi,
            path: dest,
            digest,
            size,
            copied,
        })
    }
}

/// Inspect `dir` for a previous install of the artifact named `library`.
pub fn inspect(dir: &Path, library: &str) -> InstallState {
    if !dir.join(MANIFEST_FILE_NAME).is_file() {
        return InstallState::NotInstalled;
    }
    if dir.join(library).is_file() {
        InstallState::Complete
    } else {
        InstallState::ManifestOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn native_tree(abi: &str, bytes: &[u8]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let abi_dir = dir.path().join(abi);
        fs::create_dir_all(&abi_dir).unwrap();
        fs::write(abi_dir.join("libPrismGL.so"), bytes).unwrap();
        dir
    }

    #[test]
    fn install_stages_library_and_manifest() {
        let natives = native_tree("arm64-v8a", b"\x7fELF-native");
        let target = TempDir::new().unwrap();
        let install_dir = target.path().join("PrismGL");
        let installer = Installer::new(natives.path()).with_abis(["arm64-v8a", "armeabi-v7a"]);

        let set = installer.install(&install_dir, &RendererConfig::default()).unwrap();

        assert_eq!(set.state(), InstallState::Complete);
        let library = set.library.as_ref().unwrap();
        assert_eq!(library.abi, "arm64-v8a");
        assert!(library.copied);
        assert_eq!(fs::read(&library.path).unwrap(), b"\x7fELF-native");
        assert!(set.manifest.is_file());
        assert_eq!(inspect(&install_dir, "libPrismGL.so"), InstallState::Complete);
    }

    #[test]
    fn install_uses_primary_abi_only() {
        let natives = native_tree("armeabi-v7a", b"32-bit");
        let target = TempDir::new().unwrap();
        let installer = Installer::new(natives.path()).with_abis(["arm64-v8a", "armeabi-v7a"]);

        let set = installer.install(target.path(), &RendererConfig::default()).unwrap();

        assert!(set.is_partial());
        assert!(matches!(
            set.library_error,
            Some(InstallError::ArtifactMissing { ref abi, .. }) if abi == "arm64-v8a"
        ));
    }

    #[test]
    fn missing_library_installs_manifest_only() {
        let natives = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let installer = Installer::new(natives.path()).with_abis(["x86_64"]);

        let set = installer.install(target.path(), &RendererConfig::default()).unwrap();

        assert_eq!(set.state(), InstallState::ManifestOnly);
        assert!(set.manifest.is_file());
        assert!(!target.path().join("libPrismGL.so").exists());
        assert_eq!(inspect(target.path(), "libPrismGL.so"), InstallState::ManifestOnly);
    }

    #[test]
    fn empty_abi_list_is_partial_not_fatal() {
        let natives = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let installer = Installer::new(natives.path()).with_abis(Vec::<String>::new());

        let set = installer.install(target.path(), &RendererConfig::default()).unwrap();

        assert!(matches!(set.library_error, Some(InstallError::NoAbi)));
    }

    #[test]
    fn reinstall_is_idempotent() {
        let natives = native_tree("x86_64", b"lib");
        let target = TempDir::new().unwrap();
        let installer = Installer::new(natives.path()).with_abis(["x86_64"]);
        let config = RendererConfig {
            target_frame_rate: 45,
            ..Default::default()
        };

        let first = installer.install(target.path(), &config).unwrap();
        let first_manifest = fs::read(&first.manifest).unwrap();
        let second = installer.install(target.path(), &config).unwrap();

        assert_eq!(fs::read(&second.manifest).unwrap(), first_manifest);
        let library = second.library.unwrap();
        assert!(!library.copied);
        assert_eq!(library.digest, first.library.unwrap().digest);
    }

    #[test]
    fn reinstall_replaces_changed_library() {
        let natives = native_tree("x86_64", b"v1");
        let target = TempDir::new().unwrap();
        let installer = Installer::new(natives.path()).with_abis(["x86_64"]);
        installer.install(target.path(), &RendererConfig::default()).unwrap();

        fs::write(natives.path().join("x86_64/libPrismGL.so"), b"v2-longer").unwrap();
        let set = installer.install(target.path(), &RendererConfig::default()).unwrap();

        assert!(set.library.as_ref().unwrap().copied);
        assert_eq!(fs::read(target.path().join("libPrismGL.so")).unwrap(), b"v2-longer");
    }

    #[test]
    fn failed_reinstall_keeps_previous_library() {
        let natives = native_tree("x86_64", b"v1");
        let target = TempDir::new().unwrap();
        let installer = Installer::new(natives.path()).with_abis(["x86_64"]);
        installer.install(target.path(), &RendererConfig::default()).unwrap();

        fs::remove_file(natives.path().join("x86_64/libPrismGL.so")).unwrap();
        let set = installer.install(target.path(), &RendererConfig::default()).unwrap();

        assert_eq!(set.state(), InstallState::ManifestOnly);
        assert!(matches!(set.library_error, Some(InstallError::ArtifactMissing { .. })));
        assert_eq!(inspect(target.path(), "libPrismGL.so"), InstallState::Complete);
        assert_eq!(fs::read(target.path().join("libPrismGL.so")).unwrap(), b"v1");
    }

    #[test]
    fn manifest_is_rewritten_not_merged() {
        let natives = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(
            target.path().join(MANIFEST_FILE_NAME),
            r#"{"name":"Stale","custom":"field"}"#,
        )
        .unwrap();
        let installer = Installer::new(natives.path());

        installer.install(target.path(), &RendererConfig::default()).unwrap();

        let text = fs::read_to_string(target.path().join(MANIFEST_FILE_NAME)).unwrap();
        assert!(!text.contains("Stale"));
        assert!(!text.contains("custom"));
    }

    #[test]
    fn inspect_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(inspect(dir.path(), "libPrismGL.so"), InstallState::NotInstalled);
        assert_eq!(InstallState::NotInstalled.to_string(), "Not Installed");
    }
}
