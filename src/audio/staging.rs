//! # Staged Uploads
//!
//! The engine reads audio from a file path, so every upload is written to a
//! uniquely named file first. `StagedAudio` owns that file and deletes it when
//! dropped, whatever way the request ends.
//!
//! ## Key Rust Concepts:
//! - **RAII**: cleanup lives in `Drop`, so early returns, errors and panics
//!   all remove the file
//! - **Move semantics**: moving the guard into a blocking task keeps the file
//!   alive exactly as long as that task needs it

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

const MAX_EXTENSION_LEN: usize = 8;

/// A temporary audio file that is removed on drop.
#[derive(Debug)]
pub struct StagedAudio {
    path: PathBuf,
    /// `None` once the file has been removed
    file: Option<NamedTempFile>,
}

impl StagedAudio {
    /// Write `bytes` to a fresh `upload-<random>[.ext]` file inside `dir`.
    ///
    /// Only the extension of `original_filename` is used, and only when it
    /// is short and alphanumeric. The client filename never reaches the
    /// filesystem otherwise.
    pub fn write(dir: &Path, original_filename: Option<&str>, bytes: &[u8]) -> io::Result<Self> {
        let suffix = original_filename
            .and_then(safe_extension)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        // A failed write drops the NamedTempFile, which removes it
        let mut file = Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;

        let path = file.path().to_path_buf();
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Staged upload");
        Ok(Self { path, file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Calling this more than once is fine, and a file
    /// that is already gone is not an error.
    pub fn cleanup(&mut self) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        match file.close() {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for StagedAudio {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to remove staged upload");
        }
    }
}

/// Lowercased extension of a client filename, if it is safe to reuse.
fn safe_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entries(dir: &TempDir) -> usize {
        fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_write_and_drop_removes_file() {
        let dir = TempDir::new().unwrap();
        let staged = StagedAudio::write(dir.path(), Some("meeting.MP3"), b"audio").unwrap();

        let path = staged.path().to_path_buf();
        assert_eq!(fs::read(&path).unwrap(), b"audio");
        assert_eq!(path.extension().unwrap(), "mp3");
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("upload-"));

        drop(staged);
        assert!(!path.exists());
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut staged = StagedAudio::write(dir.path(), None, b"audio").unwrap();

        staged.cleanup().unwrap();
        staged.cleanup().unwrap();
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_already_deleted_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut staged = StagedAudio::write(dir.path(), Some("a.wav"), b"audio").unwrap();

        fs::remove_file(staged.path()).unwrap();
        assert!(staged.cleanup().is_ok());
    }

    #[test]
    fn test_unsafe_extension_gets_no_suffix() {
        let dir = TempDir::new().unwrap();
        let staged = StagedAudio::write(dir.path(), Some("../../etc/passwd"), b"audio").unwrap();

        assert_eq!(staged.path().parent().unwrap(), dir.path());
        assert!(staged.path().extension().is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let a = StagedAudio::write(dir.path(), Some("same.wav"), b"1").unwrap();
        let b = StagedAudio::write(dir.path(), Some("same.wav"), b"2").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(entries(&dir), 2);
    }

    #[test]
    fn test_unsafe_extensions_are_dropped() {
        assert_eq!(safe_extension("clip.wav"), Some("wav".to_string()));
        assert_eq!(safe_extension("../../etc/passwd"), None);
        assert_eq!(safe_extension("x.tar.g z"), None);
        assert_eq!(safe_extension("noext"), None);
        assert_eq!(safe_extension("x.waytoolongext"), None);
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(StagedAudio::write(&missing, Some("a.wav"), b"audio").is_err());
    }
}
