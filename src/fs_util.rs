use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::ProvisionError;

/// Ensures a directory exists with the given mode.
///
/// # Errors
/// Returns an error if the directory cannot be created or permissions cannot
/// be set.
pub async fn ensure_dir(path: &Path, mode: u32) -> Result<(), ProvisionError> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| ProvisionError::io(format!("failed to create {}", path.display()), e))?;
    ensure_mode(path, mode).await
}

/// Applies the given permission bits to a path.
///
/// # Errors
/// Returns an error if permissions cannot be set.
pub async fn ensure_mode(path: &Path, mode: u32) -> Result<(), ProvisionError> {
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| {
            ProvisionError::io(
                format!("failed to set mode {mode:o} on {}", path.display()),
                e,
            )
        })
}

/// Transfers ownership of a path.
///
/// # Errors
/// Returns an error if ownership cannot be changed (typically: not root).
pub fn ensure_owner(path: &Path, uid: u32, gid: u32) -> Result<(), ProvisionError> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .map_err(|e| ProvisionError::io(format!("failed to chown {}", path.display()), e))
}

/// Reports whether a path exists with exactly the given permission bits.
///
/// # Errors
/// Returns an error only on metadata failures other than "not found".
pub async fn has_mode(path: &Path, mode: u32) -> Result<bool, ProvisionError> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.permissions().mode() & 0o777 == mode),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProvisionError::io(
            format!("failed to stat {}", path.display()),
            e,
        )),
    }
}

/// Appends `line` to `path` unless an identical line is already present.
/// Returns whether the file was modified. A missing file is created.
///
/// The containment check is an exact whole-line match, so re-running never
/// duplicates the line.
///
/// # Errors
/// Returns an error when the file cannot be read or written.
pub async fn append_line_if_absent(path: &Path, line: &str) -> Result<bool, ProvisionError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(ProvisionError::io(
                format!("failed to read {}", path.display()),
                e,
            ));
        }
    };
    if contents.lines().any(|existing| existing == line) {
        return Ok(false);
    }
    let mut updated = contents;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(line);
    updated.push('\n');
    fs::write(path, updated)
        .await
        .map_err(|e| ProvisionError::io(format!("failed to write {}", path.display()), e))?;
    Ok(true)
}

/// Reports whether `path` contains `line` as an exact whole line.
///
/// # Errors
/// Returns an error only on read failures other than "not found".
pub async fn contains_line(path: &Path, line: &str) -> Result<bool, ProvisionError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(contents.lines().any(|existing| existing == line)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProvisionError::io(
            format!("failed to read {}", path.display()),
            e,
        )),
    }
}

/// Writes `contents` to `path` atomically with the given mode.
///
/// The temporary file lives in the destination directory and carries the
/// final mode before any content is written, so the file is never observable
/// with looser permissions and a crash mid-write leaves the canonical path
/// absent or unchanged.
///
/// # Errors
/// Returns an error when the destination has no parent directory or any
/// write/rename fails.
pub async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), ProvisionError> {
    let parent = path.parent().ok_or_else(|| {
        ProvisionError::validation(format!("{} has no parent directory", path.display()))
    })?;
    let temp_path = temp_sibling(path)?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(&temp_path)
        .await
        .map_err(|e| ProvisionError::io(format!("failed to create {}", temp_path.display()), e))?;
    // Create-time mode only applies to newly created files; a leftover temp
    // file from a crashed run may carry different bits.
    ensure_mode(&temp_path, mode).await?;
    file.write_all(contents)
        .await
        .map_err(|e| ProvisionError::io(format!("failed to write {}", temp_path.display()), e))?;
    file.sync_all()
        .await
        .map_err(|e| ProvisionError::io(format!("failed to sync {}", temp_path.display()), e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(ProvisionError::io(
            format!(
                "failed to rename {} into {}",
                temp_path.display(),
                parent.display()
            ),
            e,
        ));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> Result<PathBuf, ProvisionError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ProvisionError::validation(format!("{} has no file name", path.display())))?;
    Ok(path.with_file_name(format!(".{file_name}.tmp")))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_ensure_dir_sets_mode() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("ssh");

        ensure_dir(&target, 0o700).await.unwrap();

        assert!(has_mode(&target, 0o700).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_mode_missing_path_is_false() {
        let dir = tempdir().unwrap();
        assert!(!has_mode(&dir.path().join("absent"), 0o600).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_line_if_absent_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pg_hba.conf");
        fs::write(&path, "local all all peer\n").await.unwrap();

        let first = append_line_if_absent(&path, "host maasdb maas 0/0 md5")
            .await
            .unwrap();
        let second = append_line_if_absent(&path, "host maasdb maas 0/0 md5")
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        let contents = fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.matches("host maasdb maas 0/0 md5").count(), 1);
    }

    #[tokio::test]
    async fn test_append_line_if_absent_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");

        let appended = append_line_if_absent(&path, "ssh-ed25519 AAAA key")
            .await
            .unwrap();

        assert!(appended);
        assert!(contains_line(&path, "ssh-ed25519 AAAA key").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_atomic_sets_mode_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.creds");

        write_atomic(&path, b"KEY=VALUE\n", 0o600).await.unwrap();

        assert!(has_mode(&path, 0o600).await.unwrap());
        let contents = fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "KEY=VALUE\n");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.creds");
        write_atomic(&path, b"OLD=1\n", 0o600).await.unwrap();

        write_atomic(&path, b"NEW=2\n", 0o600).await.unwrap();

        let contents = fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "NEW=2\n");
    }
}
