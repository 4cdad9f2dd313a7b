//! Read-only discovery surface for host launchers.
//!
//! Hosts address the plugin through a fixed route table under
//! [`AUTHORITY`]: one info route answering a single fixed row, and two
//! file routes handing out read-only handles to the staged library and
//! manifest. Nothing here can write into the install directory.

use crate::error::DiscoveryError;
use crate::manifest::{PluginIdentity, MANIFEST_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const AUTHORITY: &str = "com.prismgl.renderer.provider";
pub const MIME_TYPE: &str = "application/octet-stream";

pub const INFO_ROUTE: &str = "/renderer_info";
pub const LIBRARY_ROUTE: &str = "/library";
pub const CONFIG_ROUTE: &str = "/config";

/// Column names of the info row, in order.
pub const INFO_COLUMNS: [&str; 5] = ["name", "version", "library", "gl_version", "description"];

/// A staged artifact a host can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Library,
    #[serde(rename = "config")]
    Manifest,
}

impl ArtifactKind {
    pub fn route(&self) -> &'static str {
        match self {
            ArtifactKind::Library => LIBRARY_ROUTE,
            ArtifactKind::Manifest => CONFIG_ROUTE,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Library => f.write_str("library"),
            ArtifactKind::Manifest => f.write_str("config"),
        }
    }
}

/// Entry in the fixed route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Info,
    Artifact(ArtifactKind),
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Info => INFO_ROUTE,
            Route::Artifact(kind) => kind.route(),
        }
    }

    /// Full URI, e.g. `content://com.prismgl.renderer.provider/renderer_info`.
    pub fn uri(&self) -> String {
        format!("content://{}{}", AUTHORITY, self.path())
    }
}

impl FromStr for Route {
    type Err = DiscoveryError;

    /// Accepts a bare path (`/library`) or a full `content://` URI for this authority.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = match s.strip_prefix("content://") {
            Some(rest) => rest
                .strip_prefix(AUTHORITY)
                .ok_or_else(|| DiscoveryError::UnknownRoute(s.to_string()))?,
            None => s,
        };
        // Query strings carry filters, which are ignored.
        let path = path.split('?').next().unwrap_or(path);
        match path {
            INFO_ROUTE => Ok(Route::Info),
            LIBRARY_ROUTE => Ok(Route::Artifact(ArtifactKind::Library)),
            CONFIG_ROUTE => Ok(Route::Artifact(ArtifactKind::Manifest)),
            _ => Err(DiscoveryError::UnknownRoute(s.to_string())),
        }
    }
}

/// The single row answered by the info route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererInfo {
    pub name: String,
    pub version: String,
    pub library: String,
    pub gl_version: String,
    pub description: String,
}

impl RendererInfo {
    /// Values in [`INFO_COLUMNS`] order.
    pub fn row(&self) -> [&str; 5] {
        [
            self.name.as_str(),
            self.version.as_str(),
            self.library.as_str(),
            self.gl_version.as_str(),
            self.description.as_str(),
        ]
    }

    pub fn from_row(row: &[String]) -> Option<Self> {
        match row {
            [name, version, library, gl_version, description] => Some(Self {
                name: name.clone(),
                version: version.clone(),
                library: library.clone(),
                gl_version: gl_version.clone(),
                description: description.clone(),
            }),
            _ => None,
        }
    }
}

impl From<&PluginIdentity> for RendererInfo {
    fn from(identity: &PluginIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            version: identity.version.clone(),
            library: identity.library.clone(),
            gl_version: identity.gl_version.clone(),
            description: identity.description.clone(),
        }
    }
}

/// Answers discovery requests from the artifacts staged in `install_dir`.
#[derive(Debug, Clone)]
pub struct DiscoveryProvider {
    install_dir: PathBuf,
    info: RendererInfo,
}

impl DiscoveryProvider {
    pub fn new(install_dir: impl Into<PathBuf>, identity: &PluginIdentity) -> Self {
        Self {
            install_dir: install_dir.into(),
            info: RendererInfo::from(identity),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// The fixed info row.
    pub fn query_info(&self) -> RendererInfo {
        self.info.clone()
    }

    /// Route-level query. Filter arguments are accepted and ignored.
    pub fn query(&self, route: Route, _selection: Option<&str>) -> Result<RendererInfo, DiscoveryError> {
        match route {
            Route::Info => Ok(self.query_info()),
            Route::Artifact(_) => Err(DiscoveryError::UnknownRoute(route.uri())),
        }
    }

    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Library => self.install_dir.join(&self.info.library),
            ArtifactKind::Manifest => self.install_dir.join(MANIFEST_FILE_NAME),
        }
    }

    /// Open a read-only handle to a staged artifact.
    ///
    /// Because the installer replaces files by rename, the handle always
    /// refers to one complete version of the artifact.
    pub fn open_artifact(&self, kind: ArtifactKind) -> Result<File, DiscoveryError> {
        let path = self.artifact_path(kind);
        let file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DiscoveryError::NotFound(kind.to_string()));
            }
            Err(e) => return Err(DiscoveryError::Io(e)),
        };
        if !file.metadata()?.is_file() {
            return Err(DiscoveryError::NotFound(kind.to_string()));
        }
        debug!(artifact = %kind, path = %path.display(), "artifact opened");
        Ok(file)
    }

    /// Open by route, rejecting any write mode.
    pub fn open(&self, route: Route, mode: &str) -> Result<File, DiscoveryError> {
        if mode != "r" {
            return Err(DiscoveryError::ReadOnly);
        }
        match route {
            Route::Artifact(kind) => self.open_artifact(kind),
            Route::Info => Err(DiscoveryError::NotFound(route.uri())),
        }
    }

    pub fn get_type(&self, _route: Route) -> &'static str {
        MIME_TYPE
    }

    /// Always rejected. Like `update` and `delete`, it has no success value.
    pub fn insert(&self, route: Route) -> Result<Infallible, DiscoveryError> {
        debug!(route = route.path(), "rejected insert");
        Err(DiscoveryError::ReadOnly)
    }

    pub fn update(&self, route: Route) -> Result<Infallible, DiscoveryError> {
        debug!(route = route.path(), "rejected update");
        Err(DiscoveryError::ReadOnly)
    }

    pub fn delete(&self, route: Route) -> Result<Infallible, DiscoveryError> {
        debug!(route = route.path(), "rejected delete");
        Err(DiscoveryError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn provider(dir: &Path) -> DiscoveryProvider {
        DiscoveryProvider::new(dir, &PluginIdentity::default())
    }

    #[test]
    fn info_row_is_fixed() {
        let dir = TempDir::new().unwrap();
        let provider = provider(dir.path());

        let info = provider.query(Route::Info, Some("name = 'other'")).unwrap();

        assert_eq!(
            info.row(),
            [
                "PrismGL",
                "1.0.0",
                "libPrismGL.so",
                "4.6",
                "High-performance OpenGL 4.x to GLES 3.x renderer"
            ]
        );
        assert_eq!(info, provider.query_info());
    }

    #[test]
    fn parses_routes() {
        assert_eq!("/renderer_info".parse::<Route>().unwrap(), Route::Info);
        assert_eq!(
            "content://com.prismgl.renderer.provider/config".parse::<Route>().unwrap(),
            Route::Artifact(ArtifactKind::Manifest)
        );
        assert_eq!(
            "/library?abi=x86".parse::<Route>().unwrap(),
            Route::Artifact(ArtifactKind::Library)
        );
        assert!(matches!(
            "content://other.provider/library".parse::<Route>(),
            Err(DiscoveryError::UnknownRoute(_))
        ));
        assert!("/settings".parse::<Route>().is_err());
        assert_eq!(Route::Info.uri().parse::<Route>().unwrap(), Route::Info);
    }

    #[test]
    fn unstaged_artifacts_are_not_found() {
        let dir = TempDir::new().unwrap();
        let provider = provider(dir.path());

        for kind in [ArtifactKind::Library, ArtifactKind::Manifest] {
            assert!(matches!(
                provider.open_artifact(kind),
                Err(DiscoveryError::NotFound(_))
            ));
        }
    }

    #[test]
    fn opened_handles_are_read_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE_NAME), "{}").unwrap();
        let provider = provider(dir.path());

        let mut file = provider.open_artifact(ArtifactKind::Manifest).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "{}");
        assert!(file.write_all(b"tamper").is_err());
        assert_eq!(fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME)).unwrap(), "{}");
    }

    #[test]
    fn mutations_are_rejected() {
        let dir = TempDir::new().unwrap();
        let provider = provider(dir.path());
        let route = Route::Artifact(ArtifactKind::Manifest);

        assert!(matches!(provider.insert(route), Err(DiscoveryError::ReadOnly)));
        assert!(matches!(provider.update(route), Err(DiscoveryError::ReadOnly)));
        assert!(matches!(provider.delete(route), Err(DiscoveryError::ReadOnly)));
        assert!(matches!(provider.open(route, "rw"), Err(DiscoveryError::ReadOnly)));
        assert_eq!(provider.get_type(route), MIME_TYPE);
    }

    #[test]
    fn directory_in_place_of_artifact_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("libPrismGL.so")).unwrap();
        let provider = provider(dir.path());

        assert!(provider.open_artifact(ArtifactKind::Library).is_err());
    }
}
