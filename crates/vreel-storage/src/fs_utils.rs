//! Filesystem utilities for atomic checkpoint writes.
//!
//! A checkpoint is first written to a uniquely named temporary file in the
//! destination directory, flushed to disk, and then renamed over the
//! destination. Readers therefore see either the old file or the new one,
//! never a partial write.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageResult;

/// Temporary sibling path used while writing `dst`.
fn temp_path_for(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoint".to_string());
    dst.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

/// Atomically replace `dst` with `data`.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the
/// temporary file cannot be written or renamed. The temporary file is
/// removed on failure.
pub async fn write_atomic(dst: impl AsRef<Path>, data: &[u8]) -> StorageResult<()> {
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path_for(dst);
    if let Err(e) = write_and_rename(&tmp, dst, data).await {
        let _ = fs::remove_file(&tmp).await;
        tracing::error!(
            "Failed to write checkpoint atomically: {}: {}",
            dst.display(),
            e
        );
        return Err(e.into());
    }

    tracing::debug!("Wrote {} ({} bytes)", dst.display(), data.len());
    Ok(())
}

async fn write_and_rename(tmp: &Path, dst: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, dst).await
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was removed.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> StorageResult<bool> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_creates_file() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("nested").join("stage1.json");

        write_atomic(&dst, b"{}").await.unwrap();

        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("stage2.json");

        write_atomic(&dst, b"old content").await.unwrap();
        write_atomic(&dst, b"new content").await.unwrap();

        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new content");

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["stage2.json".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.json");

        assert!(!remove_if_exists(&path).await.unwrap());
        fs::write(&path, b"1").await.unwrap();
        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let tmp = temp_path_for(Path::new("/data/ckpt/stage3_assembled.json"));
        assert_eq!(tmp.parent(), Some(Path::new("/data/ckpt")));
        let name = tmp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".stage3_assembled.json."));
        assert!(name.ends_with(".tmp"));
    }
}
