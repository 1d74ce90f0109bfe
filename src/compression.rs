//! Reproducible gzip output.
//!
//! gzip headers normally carry the compression time and the source file name,
//! so compressing the same bytes twice yields different files. Everything
//! written here uses a fixed header instead:
//!
//! - MTIME is 0
//! - no FNAME field
//! - OS byte is 255 (unknown)
//!
//! XFL only depends on the compression level, so identical payloads compressed
//! at the same level are byte-identical on any host, at any time, under any
//! destination name.

use crate::config::DEFAULT_COMPRESSION_LEVEL;
use crate::error::Result;
use flate2::{Compression, GzBuilder};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// gzip OS header value for "unknown".
const OS_UNKNOWN: u8 = 255;

/// Compress `payload` in memory with a fixed gzip header.
pub fn gzip_bytes(payload: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(OS_UNKNOWN)
        .write(Vec::with_capacity(payload.len() / 2 + 32), Compression::new(level.min(9)));
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Compress `payload` to `destination` with the default level.
///
/// # Errors
///
/// Propagates the underlying IO error, e.g. when the destination directory
/// does not exist or is not writable.
pub fn compress(payload: &[u8], destination: &Path) -> Result<()> {
    compress_with_level(payload, destination, DEFAULT_COMPRESSION_LEVEL)
}

/// Compress `payload` to `destination` with an explicit level.
pub fn compress_with_level(payload: &[u8], destination: &Path, level: u32) -> Result<()> {
    let compressed = gzip_bytes(payload, level)?;
    write_atomic(destination, &compressed)?;
    log::debug!(
        "Wrote {} ({} bytes -> {} bytes)",
        destination.display(),
        payload.len(),
        compressed.len()
    );
    Ok(())
}

/// Write `bytes` to `destination` through a temporary file in the same
/// directory, renamed into place once fully written.
///
/// A failed write leaves no file at `destination`. A replaced file keeps its
/// permissions; a new one gets the mode `File::create` would give it under
/// the current umask.
pub fn write_atomic(destination: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // masked by the umask at open(2)
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    if let Ok(existing) = fs::metadata(destination) {
        fs::set_permissions(tmp.path(), existing.permissions())?;
    }

    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}
