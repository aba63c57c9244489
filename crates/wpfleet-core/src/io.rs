use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting generated files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Restrict `path` to owner read/write.
#[cfg(unix)]
pub fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

/// Replace the text strictly between `start_marker` and `end_marker`, keeping
/// both markers. Returns `None` when either marker is missing.
pub fn replace_between_markers(
    content: &str,
    start_marker: &str,
    end_marker: &str,
    body: &str,
) -> Option<String> {
    let start_pos = content.find(start_marker)?;
    let body_start = start_pos + start_marker.len();
    let end_offset = content[body_start..].find(end_marker)?;
    let body_end = body_start + end_offset;

    let mut updated = String::with_capacity(content.len() + body.len());
    updated.push_str(&content[..body_start]);
    updated.push('\n');
    updated.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&content[body_end..]);
    Some(updated)
}

/// Copy a directory tree. Used to restore snapshots across filesystems.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
