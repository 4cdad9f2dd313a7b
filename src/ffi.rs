//! C ABI for host launchers that link the plugin directly.
//!
//! # Memory Management
//!
//! - Rust allocates every returned pointer
//! - Callers MUST release them with the matching `prismgl_free_*` function
//! - Strings are null-terminated UTF-8
//!
//! # Usage from C
//!
//! ```c
//! CRendererInfo* info = prismgl_query_info();
//! printf("%s %s\n", info->name, info->version);
//! prismgl_free_renderer_info(info);
//!
//! int status = prismgl_install(install_dir, native_lib_dir, prefs_dir);
//! char* manifest = prismgl_read_manifest(install_dir);
//! prismgl_free_string(manifest);
//! ```

use crate::discovery::RendererInfo;
use crate::installer::{inspect, InstallState, Installer};
use crate::manifest::{self, PluginIdentity, MANIFEST_FILE_NAME};
use crate::preferences::PreferenceStore;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::ptr;
use tracing::warn;

/// C-compatible renderer info row.
#[repr(C)]
pub struct CRendererInfo {
    pub name: *mut c_char,
    pub version: *mut c_char,
    pub library: *mut c_char,
    pub gl_version: *mut c_char,
    pub description: *mut c_char,
}

/// Outcome of `prismgl_install`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CInstallStatus {
    Complete = 0,
    /// Manifest staged, native library missing.
    Partial = 1,
    Error = 2,
}

/// Install state codes returned by `prismgl_install_state`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CInstallState {
    NotInstalled = 0,
    ManifestOnly = 1,
    Complete = 2,
}

impl From<InstallState> for CInstallState {
    fn from(state: InstallState) -> Self {
        match state {
            InstallState::NotInstalled => CInstallState::NotInstalled,
            InstallState::ManifestOnly => CInstallState::ManifestOnly,
            InstallState::Complete => CInstallState::Complete,
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Return the fixed renderer info row.
/// Caller MUST call prismgl_free_renderer_info() when done.
#[no_mangle]
pub extern "C" fn prismgl_query_info() -> *mut CRendererInfo {
    let info = RendererInfo::from(&PluginIdentity::default());
    Box::into_raw(Box::new(CRendererInfo {
        name: string_to_c_char(&info.name),
        version: string_to_c_char(&info.version),
        library: string_to_c_char(&info.library),
        gl_version: string_to_c_char(&info.gl_version),
        description: string_to_c_char(&info.description),
    }))
}

/// Free a struct returned by prismgl_query_info().
#[no_mangle]
pub extern "C" fn prismgl_free_renderer_info(info: *mut CRendererInfo) {
    if !info.is_null() {
        unsafe {
            let info = Box::from_raw(info);
            free_c_char(info.name);
            free_c_char(info.version);
            free_c_char(info.library);
            free_c_char(info.gl_version);
            free_c_char(info.description);
        }
    }
}

// ============================================================================
// Installation
// ============================================================================

/// Stage the library and a manifest built from the stored preferences.
/// Returns a `CInstallStatus` code.
#[no_mangle]
pub extern "C" fn prismgl_install(
    install_dir: *const c_char,
    native_lib_dir: *const c_char,
    prefs_dir: *const c_char,
) -> c_int {
    let (Some(install_dir), Some(native_lib_dir), Some(prefs_dir)) = (
        c_char_to_path(install_dir),
        c_char_to_path(native_lib_dir),
        c_char_to_path(prefs_dir),
    ) else {
        return CInstallStatus::Error as c_int;
    };

    let store = match PreferenceStore::open(&prefs_dir) {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "ffi install: preference store unavailable");
            return CInstallStatus::Error as c_int;
        }
    };

    match Installer::new(native_lib_dir).install(&install_dir, &store.record()) {
        Ok(set) if set.is_partial() => CInstallStatus::Partial as c_int,
        Ok(_) => CInstallStatus::Complete as c_int,
        Err(e) => {
            warn!(error = %e, "ffi install failed");
            CInstallStatus::Error as c_int
        }
    }
}

/// Report what a previous install left in `install_dir`.
/// Returns a `CInstallState` code, or -1 for an invalid argument.
#[no_mangle]
pub extern "C" fn prismgl_install_state(install_dir: *const c_char) -> c_int {
    match c_char_to_path(install_dir) {
        Some(dir) => CInstallState::from(inspect(&dir, &PluginIdentity::default().library)) as c_int,
        None => -1,
    }
}

/// Decode the installed manifest and return it as JSON.
/// Unreadable or malformed manifests yield the defaults.
/// Caller MUST call prismgl_free_string() when done.
#[no_mangle]
pub extern "C" fn prismgl_read_manifest(install_dir: *const c_char) -> *mut c_char {
    let Some(dir) = c_char_to_path(install_dir) else {
        return ptr::null_mut();
    };

    match manifest::load_or_default(&dir.join(MANIFEST_FILE_NAME)).to_json() {
        Ok(json) => string_to_c_char(&json),
        Err(e) => {
            warn!(error = %e, "ffi: failed to encode manifest");
            ptr::null_mut()
        }
    }
}

/// Free a string returned by any prismgl_* function.
#[no_mangle]
pub extern "C" fn prismgl_free_string(s: *mut c_char) {
    free_c_char(s);
}

// ============================================================================
// Helpers
// ============================================================================

fn c_char_to_path(s: *const c_char) -> Option<PathBuf> {
    if s.is_null() {
        return None;
    }
    let s = unsafe { CStr::from_ptr(s) };
    s.to_str().ok().map(PathBuf::from)
}

fn string_to_c_char(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn free_c_char(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn c_path(path: &std::path::Path) -> CString {
        CString::new(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn query_info_round_trips_through_c_strings() {
        let info = prismgl_query_info();
        assert!(!info.is_null());
        unsafe {
            assert_eq!(CStr::from_ptr((*info).name).to_str().unwrap(), "PrismGL");
            assert_eq!(CStr::from_ptr((*info).library).to_str().unwrap(), "libPrismGL.so");
        }
        prismgl_free_renderer_info(info);
    }

    #[test]
    fn install_reports_partial_then_complete() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("install");
        let libs = dir.path().join("jniLibs");
        let prefs = dir.path().join("prefs");
        let (install_c, libs_c, prefs_c) = (c_path(&install), c_path(&libs), c_path(&prefs));

        assert_eq!(prismgl_install_state(install_c.as_ptr()), CInstallState::NotInstalled as c_int);
        assert_eq!(
            prismgl_install(install_c.as_ptr(), libs_c.as_ptr(), prefs_c.as_ptr()),
            CInstallStatus::Partial as c_int
        );
        assert_eq!(prismgl_install_state(install_c.as_ptr()), CInstallState::ManifestOnly as c_int);

        let abi = crate::installer::host_abis().remove(0);
        fs::create_dir_all(libs.join(&abi)).unwrap();
        fs::write(libs.join(&abi).join("libPrismGL.so"), b"\x7fELF").unwrap();

        assert_eq!(
            prismgl_install(install_c.as_ptr(), libs_c.as_ptr(), prefs_c.as_ptr()),
            CInstallStatus::Complete as c_int
        );
        assert_eq!(prismgl_install_state(install_c.as_ptr()), CInstallState::Complete as c_int);
    }

    #[test]
    fn read_manifest_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let dir_c = c_path(dir.path());

        let json = prismgl_read_manifest(dir_c.as_ptr());
        assert!(!json.is_null());
        let text = unsafe { CStr::from_ptr(json) }.to_str().unwrap().to_owned();
        prismgl_free_string(json);

        let decoded = manifest::decode(&text).unwrap();
        assert_eq!(decoded, manifest::Manifest::default());
    }

    #[test]
    fn null_arguments_are_rejected() {
        assert_eq!(
            prismgl_install(ptr::null(), ptr::null(), ptr::null()),
            CInstallStatus::Error as c_int
        );
        assert_eq!(prismgl_install_state(ptr::null()), -1);
        assert!(prismgl_read_manifest(ptr::null()).is_null());
        prismgl_free_string(ptr::null_mut());
    }
}
