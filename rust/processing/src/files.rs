// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Files owned by a pipeline run
//!
//! Both guards delete their file when dropped, whether the run succeeded,
//! failed, or unwound from a panic. A missing file is not an error.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::classifier::extension_of;

fn remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
    }
}

/// An uploaded model file; deleted when dropped
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    file_name: String,
    extension: String,
    size: u64,
}

impl SourceFile {
    /// Take ownership of an upload whose size was reported by the upload
    /// source. Does not touch the filesystem.
    pub fn from_upload(path: impl Into<PathBuf>, file_name: impl Into<String>, size: u64) -> Self {
        let file_name = file_name.into();
        Self {
            path: path.into(),
            extension: extension_of(&file_name),
            file_name,
            size,
        }
    }

    /// Take ownership of a file on disk, reading its size
    pub fn open(path: impl Into<PathBuf>, file_name: impl Into<String>) -> io::Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self::from_upload(path, file_name, size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the file was uploaded under
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Lower-cased extension of the original file name
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// File name without extension, reduced to characters safe in paths
    pub fn stem(&self) -> String {
        let stem = Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let safe: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if safe.is_empty() {
            "model".to_string()
        } else {
            safe
        }
    }
}

impl Drop for SourceFile {
    fn drop(&mut self) {
        remove(&self.path);
    }
}

/// A uniquely named path in a work directory; the file, if one was created
/// there, is deleted when the guard is dropped unless it was persisted
#[derive(Debug)]
pub struct TempFile {
    path: Option<PathBuf>,
}

impl TempFile {
    /// Reserve `<dir>/<stem>-<uuid>.<extension>`, creating `dir` if needed.
    /// The file itself is not created.
    pub fn reserve(dir: &Path, stem: &str, extension: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = format!("{}-{}.{}", stem, Uuid::new_v4().simple(), extension);
        Ok(Self {
            path: Some(dir.join(name)),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Keep the file past the guard's lifetime and return its path
    pub fn persist(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, b"solid x\nendsolid x\n").unwrap();

        let source = SourceFile::open(&path, "Bracket V2.STL").unwrap();
        assert_eq!(source.size(), 19);
        assert_eq!(source.extension(), "stl");
        assert_eq!(source.stem(), "Bracket_V2");
        drop(source);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_fine() {
        let source = SourceFile::from_upload("/nonexistent/solidvol/upload", "a.step", 10);
        assert_eq!(source.extension(), "step");
        drop(source);
    }

    #[test]
    fn test_source_file_removed_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.obj");
        std::fs::write(&path, b"v 0 0 0\n").unwrap();

        let moved = SourceFile::open(&path, "part.obj").unwrap();
        let outcome = std::panic::catch_unwind(move || {
            let _owned = moved;
            panic!("decoder bug");
        });
        assert!(outcome.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("exports");

        let temp = TempFile::reserve(&work, "part", "stl").unwrap();
        let path = temp.path().to_path_buf();
        assert!(work.is_dir());
        assert!(!path.exists());
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("part-"));
        std::fs::write(&path, b"data").unwrap();
        drop(temp);
        assert!(!path.exists());

        let kept = TempFile::reserve(&work, "part", "stl").unwrap();
        std::fs::write(kept.path(), b"data").unwrap();
        let path = kept.persist();
        assert!(path.exists());

        let a = TempFile::reserve(&work, "part", "png").unwrap();
        let b = TempFile::reserve(&work, "part", "png").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
