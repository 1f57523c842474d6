//! Temporary files for in-memory firmware images.
//!
//! The sandbox only accepts firmware as a file path, so images handed over as
//! bytes are written to a uniquely named file first. The [`StagedFile`] owns
//! that file and deletes it exactly once: on the first terminal signal of the
//! owning operation, or when it is dropped.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A firmware image written to a temporary file.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    /// Write `contents` to `<dir>/<uuid>.<extension>`.
    ///
    /// Names are drawn until one does not exist yet, up to `attempts` times.
    /// The file is created exclusively so a concurrent writer can never share it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written, or if every
    /// attempted name was already taken.
    pub fn create(dir: &Path, extension: &str, contents: &[u8], attempts: u32) -> io::Result<Self> {
        for attempt in 1..=attempts {
            let path = dir.join(format!("{}.{extension}", Uuid::new_v4()));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::trace!(path = %path.display(), attempt, "Staging name taken, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = file.write_all(contents).and_then(|()| file.sync_all()) {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(e);
            }

            tracing::debug!(path = %path.display(), size = contents.len(), "Staged firmware");
            return Ok(Self {
                path,
                released: false,
            });
        }

        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free staging file name after {attempts} attempts"),
        ))
    }

    /// Path of the staged file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed staged firmware"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staged firmware")
            }
        }
    }

    /// Check if the file has been deleted.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.release();
    }
}
