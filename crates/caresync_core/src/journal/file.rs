//! File-backed journal.

use crate::error::{CoreError, CoreResult};
use crate::journal::backend::JournalBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_SUFFIX: &str = "lock";
const TEMP_SUFFIX: &str = "compact";

/// A journal stored in a single file.
///
/// An exclusive advisory lock on a sibling `.lock` file keeps a second
/// process from opening the same journal.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    _lock_file: File,
}

impl FileJournal {
    /// Opens or creates the journal at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalLocked`] if another process holds the
    /// journal, or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling(path, LOCK_SUFFIX))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::JournalLocked);
        }

        let file = open_data_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            _lock_file: lock_file,
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_data_file(path: &Path) -> CoreResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl JournalBackend for FileJournal {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        let size = self.file.metadata()?.len();
        if len > size {
            return Err(CoreError::invalid_operation(format!(
                "cannot truncate {size} byte journal to {len}"
            )));
        }
        self.file.set_len(len)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        let temp = sibling(&self.path, TEMP_SUFFIX);
        {
            let mut out = File::create(&temp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        self.file = open_data_file(&self.path)?;
        Ok(())
    }

    fn len(&self) -> CoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }
}
