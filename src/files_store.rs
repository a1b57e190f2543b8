use crate::error::ApiError;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// SHA-256 hex digest of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes `bytes` to `<files_dir>/<id><ext>`, returning the stored filename
/// (id + extension). Maps disk-write failures onto the ApiError taxonomy per
/// the errno mapping: out of space -> 507, permission denied -> 500, other -> 500.
pub fn write_blob(files_dir: &str, id: &str, ext: &str, bytes: &[u8]) -> Result<String, ApiError> {
    std::fs::create_dir_all(files_dir)
        .map_err(|e| ApiError::Internal(format!("files dir unavailable: {e}")))?;
    let stored_filename = format!("{id}{ext}");
    let path: PathBuf = Path::new(files_dir).join(&stored_filename);
    std::fs::write(&path, bytes).map_err(|e| match e.kind() {
        ErrorKind::StorageFull => ApiError::OutOfStorage(e.to_string()),
        ErrorKind::PermissionDenied => ApiError::Internal(e.to_string()),
        _ if e.raw_os_error() == Some(libc_enospc()) => ApiError::OutOfStorage(e.to_string()),
        _ => ApiError::Internal(e.to_string()),
    })?;
    Ok(stored_filename)
}

/// `ENOSPC` on Linux; used as a fallback check since `ErrorKind::StorageFull`
/// is not yet stable on every platform/toolchain combination.
fn libc_enospc() -> i32 {
    28
}

/// Best-effort removal — a missing file is not an error.
pub fn remove_blob(files_dir: &str, stored_filename: &str) {
    let path = Path::new(files_dir).join(stored_filename);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file blob");
        }
    }
}

/// Extracts the extension (dot included) from an original filename, or the
/// empty string if there is none.
pub fn extension_of(original_name: &str) -> String {
    match Path::new(original_name).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    }
}
