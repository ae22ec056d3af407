//! # Scratch Upload Files
//!
//! Every request that passes validation writes its audio to exactly one scratch
//! file inside the configured upload directory. The file belongs to the request:
//! it is removed explicitly once the response is ready, and removed again on drop
//! if the request bailed out early (error, panic, client disconnect).
//!
//! ## Naming:
//! `<uuid-v4>-<sanitised original name>`. The caller-supplied name is reduced to
//! its final path component and a conservative character set, so `../../x` can't
//! escape the directory and two uploads called `audio.wav` never collide.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 100;
const FALLBACK_NAME: &str = "upload";

/// Reduce a caller-supplied file name to something safe to put on disk.
///
/// Keeps the last path component (either separator style), replaces anything
/// outside `[A-Za-z0-9._-]` with `_`, strips leading dots and caps the length.
/// The extension survives, which matters because the audio decoder uses it as a
/// format hint.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    // Keep the tail so the extension is not cut off.
    let len = trimmed.len();
    if len > MAX_NAME_LEN {
        trimmed[len - MAX_NAME_LEN..].to_string()
    } else {
        trimmed.to_string()
    }
}

/// A request-owned audio file on disk.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    /// Write `bytes` to a fresh, uniquely named file in `dir`.
    pub async fn persist(dir: &Path, original_name: &str, bytes: &[u8]) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create upload directory {}", dir.display()))?;

        let file_name = format!("{}-{}", Uuid::new_v4(), sanitize_filename(original_name));
        let path = dir.join(file_name);

        // Own the path before writing, so a half-written file is still cleaned up.
        let scratch = Self { path, removed: false };
        tokio::fs::write(&scratch.path, bytes)
            .await
            .with_context(|| format!("failed to save upload to {}", scratch.path.display()))?;

        debug!(path = %scratch.path.display(), bytes = bytes.len(), "Saved upload");
        Ok(scratch)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Failures are logged and otherwise ignored.
    pub fn remove(mut self) {
        self.remove_now();
    }

    fn remove_now(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Cleaned up upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not clean up upload"),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.remove_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\clip.wav"), "clip.wav");
        assert_eq!(sanitize_filename("/abs/path/hello.mp3"), "hello.mp3");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("my clip (1).wav"), "my_clip__1_.wav");
        assert_eq!(sanitize_filename("héllo.ogg"), "h_llo.ogg");
    }

    #[test]
    fn test_sanitize_falls_back_when_nothing_is_left() {
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn test_sanitize_keeps_extension_of_long_names() {
        let long = format!("{}.flac", "a".repeat(300));
        let cleaned = sanitize_filename(&long);
        assert_eq!(cleaned.len(), MAX_NAME_LEN);
        assert!(cleaned.ends_with(".flac"));
    }

    #[tokio::test]
    async fn test_persist_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::persist(dir.path(), "hello.wav", b"RIFF").await.unwrap();

        let path = scratch.path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("-hello.wav"));
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");

        scratch.remove();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchFile::persist(dir.path(), "a.wav", b"x").await.unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_same_name_uploads_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = ScratchFile::persist(dir.path(), "audio.wav", b"one").await.unwrap();
        let second = ScratchFile::persist(dir.path(), "audio.wav", b"two").await.unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(std::fs::read(first.path()).unwrap(), b"one");
        assert_eq!(std::fs::read(second.path()).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::persist(dir.path(), "gone.wav", b"x").await.unwrap();
        std::fs::remove_file(scratch.path()).unwrap();
        scratch.remove();
    }
}
