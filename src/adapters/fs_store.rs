//! Filesystem session store.
//!
//! Layout under the data directory:
//!
//! | File               | Written                                   |
//! |--------------------|-------------------------------------------|
//! | `{stem}.journal`   | appended and fsynced per frame; a failed  |
//! |                    | append is truncated back off the file     |
//! | `{stem}.json.tmp`  | canonical document before the rename      |
//! | `{stem}.json`      | final data file, appears atomically       |

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::app::ports::{SessionStore, StorageError};

pub const JOURNAL_EXT: &str = "journal";
pub const DATA_EXT: &str = "json";

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("Session data directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn journal_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}.{JOURNAL_EXT}"))
    }

    pub fn data_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}.{DATA_EXT}"))
    }

    /// Journals left behind by sessions that never finalized.
    pub fn orphaned_journals(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == JOURNAL_EXT) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

impl SessionStore for FsStore {
    fn append_journal(&mut self, stem: &str, frame: &[u8]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path(stem))?;
        let committed = file.metadata()?.len();
        if let Err(e) = file.write_all(frame).and_then(|()| file.sync_data()) {
            // Drop whatever part of the frame landed.
            if let Err(trim) = file.set_len(committed) {
                warn!("journal {stem}: could not trim torn append: {trim}");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn write_canonical(&mut self, stem: &str, document: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.data_path(stem);
        let tmp = target.with_extension(format!("{DATA_EXT}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(document)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        // Make the rename itself durable.
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        debug!("Wrote {} ({} bytes)", target.display(), document.len());
        Ok(target)
    }

    fn remove_journal(&mut self, stem: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.journal_path(stem)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
