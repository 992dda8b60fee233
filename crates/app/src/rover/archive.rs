//! On-disk store for trigger-class crops.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub(crate) enum ArchiveError {
    #[error("failed to create crop directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write crop {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("more than {MAX_PER_SECOND} crops named {stem} within one second")]
    Exhausted { stem: String },
}

const MAX_PER_SECOND: u32 = 1000;

/// Writes JPEG crops as `<label>_<YYYYMMDD_HHMMSS>.jpg`. Further crops in the
/// same second get `_1`, `_2`, ... before the extension; existing files are
/// never overwritten. The directory is created on first use.
pub(crate) struct CropArchive {
    dir: PathBuf,
    trigger_label: String,
}

impl CropArchive {
    pub(crate) fn new(dir: impl Into<PathBuf>, trigger_label: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            trigger_label: trigger_label.into(),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn is_trigger(&self, label: &str) -> bool {
        label == self.trigger_label
    }

    fn file_stem(&self, at: DateTime<Local>) -> String {
        format!(
            "{}_{}",
            self.trigger_label.replace(' ', "_"),
            at.format("%Y%m%d_%H%M%S")
        )
    }

    pub(crate) fn persist(&self, jpeg: &[u8], at: DateTime<Local>) -> Result<PathBuf, ArchiveError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArchiveError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let stem = self.file_stem(at);
        for sequence in 0..MAX_PER_SECOND {
            let name = match sequence {
                0 => format!("{stem}.jpg"),
                n => format!("{stem}_{n}.jpg"),
            };
            let path = self.dir.join(name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArchiveError::Write { path, source }),
            };
            if let Err(source) = file.write_all(jpeg) {
                return Err(ArchiveError::Write { path, source });
            }
            debug!("saved crop to {}", path.display());
            return Ok(path);
        }
        Err(ArchiveError::Exhausted { stem })
    }
}
