//! PrismGL Core Library
//!
//! Plugin discovery and configuration synchronization for the PrismGL
//! OpenGL-to-GLES renderer.
//!
//! # Architecture
//!
//! The renderer is installed into a shared directory that external host
//! launchers read from. This crate owns everything between the user's
//! settings and that directory:
//!
//! ## Configuration (`config`, `preferences` modules)
//! - `RendererConfig` - the canonical record of rendering settings
//! - `PreferenceStore` - persisted key/value preferences with typed validation
//!
//! ## Manifest (`manifest` module)
//! - `encode()` / `decode()` - the `config.json` document hosts discover
//! - Lenient decoding: missing fields take their defaults
//!
//! ## Installation (`installer` module)
//! - `Installer::install()` - stage the native library and manifest atomically
//! - `inspect()` - report what a previous install left behind
//!
//! ## Discovery (`discovery`, `endpoint` modules)
//! - `DiscoveryProvider` - read-only route table over the installed artifacts
//! - `DiscoveryServer` / `DiscoveryClient` - Unix socket transport
//!
//! ## Runtime (`runtime`, `sync` modules)
//! - `RuntimeBridge` - lifecycle-checked handle to the native renderer
//! - `Synchronizer` - preference write, then manifest rewrite, then runtime apply
//!
//! ## FFI (`ffi` module)
//! - `prismgl_*` C functions for hosts that link the library directly

pub mod config;
pub mod discovery;
#[cfg(unix)]
pub mod endpoint;
pub mod error;
pub mod ffi;
mod fsutil;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod preferences;
pub mod runtime;
pub mod settings;
pub mod sync;

pub use config::{Backend, RendererConfig};
pub use discovery::{ArtifactKind, DiscoveryProvider, RendererInfo, Route};
pub use error::{DiscoveryError, InstallError, ManifestError, PreferenceError, RuntimeError, SyncError};
pub use installer::{InstallState, InstalledArtifactSet, Installer};
pub use manifest::{Compatibility, Manifest, PluginIdentity};
pub use preferences::{PrefKey, PrefValue, PreferenceStore};
pub use runtime::{HeadlessRuntime, NativeRuntime, RuntimeBridge, RuntimeState};
pub use settings::Settings;
pub use sync::{SyncReport, Synchronizer};
