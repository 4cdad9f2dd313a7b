//! Cross-process transport for the discovery interface.
//!
//! A Unix domain socket at a fixed path accepts newline-delimited JSON
//! requests and answers each with one JSON response line. A successful
//! `open` response is followed by exactly `size` raw bytes read from the
//! read-only artifact handle.

use crate::discovery::{ArtifactKind, DiscoveryProvider, RendererInfo, Route, INFO_COLUMNS};
use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Longest request line accepted, newline excluded.
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

/// Connections served at once. Further peers get a `busy` error.
pub const MAX_CONNECTIONS: usize = 32;

// Upper bound on what the client reserves up front for an artifact body.
const MAX_PREALLOC: u64 = 1024 * 1024;

fn read_mode() -> String {
    "r".to_string()
}

/// A request from a host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Query {
        uri: String,
        #[serde(default)]
        projection: Vec<String>,
        #[serde(default)]
        selection: Option<String>,
    },
    Open {
        uri: String,
        #[serde(default = "read_mode")]
        mode: String,
    },
    GetType {
        uri: String,
    },
    Insert {
        uri: String,
    },
    Update {
        uri: String,
    },
    Delete {
        uri: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    ReadOnly,
    UnknownRoute,
    BadRequest,
    Busy,
    Internal,
}

/// A response header sent back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// Followed on the wire by `size` bytes of artifact content.
    Artifact { artifact: ArtifactKind, size: u64 },
    Type { mime: String },
    Error { code: ErrorCode, message: String },
}

impl From<&DiscoveryError> for Response {
    fn from(err: &DiscoveryError) -> Self {
        let (code, message) = match err {
            DiscoveryError::NotFound(what) => (ErrorCode::NotFound, what.clone()),
            DiscoveryError::ReadOnly => (ErrorCode::ReadOnly, err.to_string()),
            DiscoveryError::UnknownRoute(uri) => (ErrorCode::UnknownRoute, uri.clone()),
            DiscoveryError::Protocol(msg) => (ErrorCode::BadRequest, msg.clone()),
            DiscoveryError::Io(e) => (ErrorCode::Internal, e.to_string()),
        };
        Response::Error { code, message }
    }
}

impl Response {
    fn info(info: &RendererInfo) -> Self {
        Response::Rows {
            columns: INFO_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: vec![info.row().iter().map(|v| v.to_string()).collect()],
        }
    }

    /// Convert an error response back into the typed error.
    fn into_result(self) -> Result<Response, DiscoveryError> {
        match self {
            Response::Error { code, message } => Err(match code {
                ErrorCode::NotFound => DiscoveryError::NotFound(message),
                ErrorCode::ReadOnly => DiscoveryError::ReadOnly,
                ErrorCode::UnknownRoute => DiscoveryError::UnknownRoute(message),
                ErrorCode::BadRequest | ErrorCode::Busy | ErrorCode::Internal => {
                    DiscoveryError::Protocol(message)
                }
            }),
            other => Ok(other),
        }
    }
}

/// Listens on a Unix socket and serves discovery requests.
pub struct DiscoveryServer {
    listener: UnixListener,
    socket_path: PathBuf,
    provider: Arc<DiscoveryProvider>,
    active: Arc<AtomicUsize>,
}

impl DiscoveryServer {
    /// Bind the endpoint, replacing a stale socket left by a previous run.
    pub fn bind(socket_path: impl Into<PathBuf>, provider: DiscoveryProvider) -> io::Result<Self> {
        let socket_path = socket_path.into();
        if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), install_dir = %provider.install_dir().display(), "discovery endpoint listening");
        Ok(Self {
            listener,
            socket_path,
            provider: Arc::new(provider),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, serving each on its own thread, up to
    /// [`MAX_CONNECTIONS`] at a time.
    pub fn serve(&self) -> io::Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(mut stream) => {
                    let Some(slot) = ConnectionSlot::acquire(&self.active) else {
                        warn!(limit = MAX_CONNECTIONS, "discovery connection limit reached");
                        let busy = Response::Error {
                            code: ErrorCode::Busy,
                            message: "too many connections".to_string(),
                        };
                        let _ = write_response(&mut stream, &busy);
                        continue;
                    };
                    let provider = Arc::clone(&self.provider);
                    thread::spawn(move || {
                        let _slot = slot;
                        if let Err(e) = handle_connection(&provider, stream) {
                            warn!(error = %e, "discovery connection failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept discovery connection"),
            }
        }
        Ok(())
    }
}

/// Counts one live connection until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_CONNECTIONS).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(active)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for DiscoveryServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

/// Serve requests on one connection until the peer hangs up.
pub fn handle_connection(provider: &DiscoveryProvider, stream: UnixStream) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let limit = MAX_REQUEST_LINE as u64 + 1;
        if (&mut reader).take(limit).read_line(&mut line)? == 0 {
            return Ok(());
        }
        if !line.ends_with('\n') && line.len() > MAX_REQUEST_LINE {
            // The rest of the oversized line cannot be resynchronized.
            warn!(limit = MAX_REQUEST_LINE, "discovery request line too long, closing connection");
            let response = Response::Error {
                code: ErrorCode::BadRequest,
                message: format!("request line exceeds {MAX_REQUEST_LINE} bytes"),
            };
            write_response(&mut writer, &response)?;
            return writer.flush();
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => dispatch(provider, request, &mut writer)?,
            Err(e) => {
                debug!(error = %e, "rejected malformed discovery request");
                let response = Response::Error {
                    code: ErrorCode::BadRequest,
                    message: e.to_string(),
                };
                write_response(&mut writer, &response)?;
            }
        }
        writer.flush()?;
    }
}

fn dispatch<W: Write>(provider: &DiscoveryProvider, request: Request, writer: &mut W) -> io::Result<()> {
    debug!(?request, "discovery request");
    let response = match request {
        Request::Query { uri, selection, .. } => uri
            .parse::<Route>()
            .and_then(|route| provider.query(route, selection.as_deref()))
            .map(|info| Response::info(&info)),
        Request::Open { uri, mode } => {
            let opened = uri.parse::<Route>().and_then(|route| {
                let file = provider.open(route, &mode)?;
                match route {
                    Route::Artifact(kind) => Ok((kind, file)),
                    Route::Info => Err(DiscoveryError::NotFound(uri.clone())),
                }
            });
            return match opened {
                Ok((kind, file)) => stream_artifact(kind, file, writer),
                Err(e) => write_response(writer, &Response::from(&e)),
            };
        }
        Request::GetType { uri } => uri.parse::<Route>().map(|route| Response::Type {
            mime: provider.get_type(route).to_string(),
        }),
        Request::Insert { uri } => Err(rejected(&uri, |route| provider.insert(route))),
        Request::Update { uri } => Err(rejected(&uri, |route| provider.update(route))),
        Request::Delete { uri } => Err(rejected(&uri, |route| provider.delete(route))),
    };

    let response = response.unwrap_or_else(|e| Response::from(&e));
    write_response(writer, &response)
}

fn rejected<F>(uri: &str, mutation: F) -> DiscoveryError
where
    F: FnOnce(Route) -> Result<Infallible, DiscoveryError>,
{
    match uri.parse::<Route>().and_then(mutation) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

fn stream_artifact<W: Write>(kind: ArtifactKind, file: fs::File, writer: &mut W) -> io::Result<()> {
    let size = file.metadata()?.len();
    write_response(writer, &Response::Artifact { artifact: kind, size })?;
    let sent = io::copy(&mut file.take(size), writer)?;
    if sent != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("artifact {kind} shrank while streaming: {sent} of {size} bytes"),
        ));
    }
    debug!(artifact = %kind, bytes = size, "artifact streamed");
    Ok(())
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, response)?;
    writer.write_all(b"\n")
}

/// Blocking client used by host processes.
pub struct DiscoveryClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl DiscoveryClient {
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let stream = UnixStream::connect(socket_path)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    /// Send a raw request and read the response header.
    pub fn send(&mut self, request: &Request) -> Result<Response, DiscoveryError> {
        let mut line = serde_json::to_vec(request).map_err(|e| DiscoveryError::Protocol(e.to_string()))?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(DiscoveryError::Protocol("connection closed".to_string()));
        }
        serde_json::from_str(reply.trim()).map_err(|e| DiscoveryError::Protocol(e.to_string()))
    }

    pub fn query_info(&mut self) -> Result<RendererInfo, DiscoveryError> {
        let request = Request::Query {
            uri: Route::Info.uri(),
            projection: Vec::new(),
            selection: None,
        };
        match self.send(&request)?.into_result()? {
            Response::Rows { rows, .. } => rows
                .first()
                .and_then(|row| RendererInfo::from_row(row))
                .ok_or_else(|| DiscoveryError::Protocol("info route returned no row".to_string())),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch the full contents of a staged artifact.
    pub fn open_artifact(&mut self, kind: ArtifactKind) -> Result<Vec<u8>, DiscoveryError> {
        let request = Request::Open {
            uri: Route::Artifact(kind).uri(),
            mode: read_mode(),
        };
        match self.send(&request)?.into_result()? {
            Response::Artifact { size, .. } => {
                let mut content = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
                let read = (&mut self.reader).take(size).read_to_end(&mut content)?;
                if read as u64 != size {
                    return Err(DiscoveryError::Protocol(format!(
                        "artifact truncated: {read} of {size} bytes"
                    )));
                }
                Ok(content)
            }
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_type(&mut self, route: Route) -> Result<String, DiscoveryError> {
        match self.send(&Request::GetType { uri: route.uri() })?.into_result()? {
            Response::Type { mime } => Ok(mime),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> DiscoveryError {
    DiscoveryError::Protocol(format!("unexpected response: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let request: Request =
            serde_json::from_str(r#"{"op":"open","uri":"/config"}"#).unwrap();
        assert_eq!(
            request,
            Request::Open {
                uri: "/config".to_string(),
                mode: "r".to_string()
            }
        );

        let request: Request = serde_json::from_str(
            r#"{"op":"query","uri":"/renderer_info","selection":"ignored"}"#,
        )
        .unwrap();
        assert!(matches!(request, Request::Query { ref projection, .. } if projection.is_empty()));
    }

    #[test]
    fn error_responses_map_back_to_typed_errors() {
        let response = Response::from(&DiscoveryError::NotFound("library".to_string()));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"status":"error","code":"not_found","message":"library"}"#);

        let back: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.into_result(), Err(DiscoveryError::NotFound(ref m)) if m == "library"));
    }

    #[test]
    fn artifact_header_wire_format() {
        let json = serde_json::to_string(&Response::Artifact {
            artifact: ArtifactKind::Manifest,
            size: 12,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"artifact","artifact":"config","size":12}"#);
    }
}
