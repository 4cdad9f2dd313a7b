//! Error types for PrismGL plugin operations.

use std::path::PathBuf;
use thiserror::Error;

/// Raised when a manifest cannot be parsed as JSON at all.
///
/// Structurally valid but incomplete documents never produce this error;
/// missing fields fall back to their defaults instead.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to read manifest {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced while staging artifacts into the install directory.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The native library for the primary ABI is not present at the source path.
    /// Installation continues manifest-only when this happens.
    #[error("Native artifact missing for ABI '{abi}': {path:?}")]
    ArtifactMissing { abi: String, path: PathBuf },

    #[error("Platform reported no supported ABIs")]
    NoAbi,

    #[error("Failed to create install directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the discovery interface.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Discovery interface is read-only")]
    ReadOnly,

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the runtime bridge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// A runtime call was made outside the `Initialized` state.
    #[error("Native runtime is not initialized (state: {0})")]
    NotInitialized(&'static str),

    #[error("Native runtime is already initialized")]
    AlreadyInitialized,

    #[error("Native runtime failed to initialize with cache dir {0}")]
    InitFailed(String),
}

/// Errors from the preference store.
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Preference '{key}' expects a {expected} value")]
    TypeMismatch { key: &'static str, expected: &'static str },

    #[error("Preference '{key}' value {value} is out of range")]
    OutOfRange { key: &'static str, value: String },

    #[error("Unknown preference key: {0}")]
    UnknownKey(String),

    #[error("Failed to persist preferences to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from a synchronization pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Preference(#[from] PreferenceError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
