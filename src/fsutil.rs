//! Atomic file replacement helpers.
//!
//! Every write lands in a temporary file in the destination directory and is
//! renamed over the target only after the full contents are flushed, so
//! readers observe either the previous file or the complete new one.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically replace `path` with `contents`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    finish(tmp, path)
}

/// Atomically replace `dst` with a byte-for-byte copy of `src`.
/// Returns the number of bytes copied.
pub(crate) fn copy_atomic(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut source = File::open(src)?;
    let expected = source.metadata()?.len();

    let mut tmp = NamedTempFile::new_in(parent_dir(dst))?;
    let copied = io::copy(&mut source, tmp.as_file_mut())?;
    if copied != expected {
        // tmp is dropped here and removed
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short copy from {:?}: {} of {} bytes", src, copied, expected),
        ));
    }

    finish(tmp, dst)?;
    Ok(copied)
}

fn finish(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    // Temp files are created 0600; hosts run as a different user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(0o644))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(parent_dir(path));
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Hex MD5 digest of a file's contents.
pub(crate) fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}
