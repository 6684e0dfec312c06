//! Filesystem helpers. Grounded on `crab-cert`'s `write_secret_file` and its
//! registry write-to-temp-then-rename discipline.

use std::path::Path;

/// Write a file with restrictive permissions (0o600 on Unix) suitable for
/// private key material.
pub fn write_secret_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    write_secret_file_inner(path.as_ref(), contents.as_ref())
}

#[cfg(unix)]
fn write_secret_file_inner(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_secret_file_inner(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Atomically write `contents` to `path` by writing to a sibling temp file
/// and renaming over the destination. Used by the certificate registry and
/// the cached CRL so a crash mid-write never leaves a torn document.
pub fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents.as_ref())?;
    tmp.persist(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}
