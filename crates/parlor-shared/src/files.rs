//! Filesystem helpers shared by the server storage engine and the client
//! transfer coordinator.

use std::io;
use std::path::Path;

/// Replace every byte outside `[A-Za-z0-9._-]` with `_`. Multi-byte
/// characters sanitize per byte. An empty result becomes the literal `file`.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-' {
                b as char
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "file".to_owned()
    } else {
        sanitized
    }
}

pub fn ensure_dir(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists but is not a directory", path.display()),
        ));
    }
    std::fs::create_dir_all(path)
}
