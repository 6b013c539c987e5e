//! Disk manager: file-level and page-level I/O primitives.
//!
//! Each open file is a flat concatenation of fixed-size pages: page
//! `n` occupies byte range `[n*PAGE_SIZE, (n+1)*PAGE_SIZE)`. The manager does
//! not serialize its own methods; callers operating on distinct files proceed
//! in parallel, and `allocate_page` is atomic per file via a per-file
//! counter. The Buffer Pool Manager is responsible for serializing access to
//! any single page.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::common::config::{FileId, PageNo, PAGE_SIZE};
use crate::error::{BufferPoolError, Result};

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Bookkeeping for a single open file.
struct OpenFile {
    path: PathBuf,
    file: File,
    /// Next unused page number, initialized from `ceil(file_size / PAGE_SIZE)`.
    next_page_no: AtomicU32,
}

/// Creates/opens/closes files and performs page-level reads and writes.
///
/// Owns a table of open files keyed by `file_id`, plus the reverse
/// `path -> file_id` mapping needed to make `open_file` idempotent per path
/// per path.
pub struct DiskManager {
    files: Mutex<HashMap<FileId, Arc<OpenFile>>>,
    path_to_id: Mutex<HashMap<PathBuf, FileId>>,
    next_file_id: AtomicU32,
}

impl DiskManager {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            path_to_id: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(0),
        }
    }

    /// Creates a new, empty file. Fails with `FileExists` if `path` already
    /// exists.
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(BufferPoolError::FileExists(path.to_path_buf()));
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        debug!(path = %path.display(), "created file");
        Ok(())
    }

    /// Removes a file from disk. Fails with `FileStillOpen` if the path is
    /// currently open, or `FileNotFound` if it does not exist.
    pub fn destroy_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.path_to_id.lock().contains_key(path) {
            return Err(BufferPoolError::FileStillOpen(path.to_path_buf()));
        }
        if !path.exists() {
            return Err(BufferPoolError::FileNotFound(path.to_path_buf()));
        }
        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "destroyed file");
        Ok(())
    }

    /// Opens `path` for read/write, returning its `file_id`. Idempotent: a
    /// second call on an already-open path returns the same `file_id`.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<FileId> {
        let path = path.as_ref();

        if let Some(id) = self.path_to_id.lock().get(path) {
            return Ok(*id);
        }

        if !path.exists() {
            return Err(BufferPoolError::FileNotFound(path.to_path_buf()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let next_page_no = len.div_ceil(PAGE_SIZE as u64) as u32;

        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let opened = Arc::new(OpenFile {
            path: path.to_path_buf(),
            file,
            next_page_no: AtomicU32::new(next_page_no),
        });

        self.files.lock().insert(file_id, opened);
        self.path_to_id.lock().insert(path.to_path_buf(), file_id);

        debug!(path = %path.display(), file_id, next_page_no, "opened file");
        Ok(file_id)
    }

    /// Closes an open file handle. Fails with `FileNotOpen` if `file_id` is
    /// unknown.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        let removed = self.files.lock().remove(&file_id);
        match removed {
            Some(opened) => {
                self.path_to_id.lock().remove(&opened.path);
                debug!(file_id, "closed file");
                Ok(())
            }
            None => Err(BufferPoolError::FileNotOpen(file_id)),
        }
    }

    /// Pure filesystem probe: does `path` exist as a regular file?
    pub fn is_file(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    fn lookup(&self, file_id: FileId) -> Result<Arc<OpenFile>> {
        self.files
            .lock()
            .get(&file_id)
            .cloned()
            .ok_or(BufferPoolError::FileNotOpen(file_id))
    }

    /// Reads exactly `nbytes` at `page_no * PAGE_SIZE` into `buffer`. Fails
    /// with `ShortRead` if fewer bytes are available (e.g. the page is past
    /// end-of-file).
    pub fn read_page(
        &self,
        file_id: FileId,
        page_no: PageNo,
        buffer: &mut [u8],
        nbytes: usize,
    ) -> Result<()> {
        let opened = self.lookup(file_id)?;
        let offset = page_no as u64 * PAGE_SIZE as u64;

        let mut total_read = 0;
        while total_read < nbytes {
            let n = pread(
                &opened.file,
                &mut buffer[total_read..nbytes],
                offset + total_read as u64,
            )?;
            if n == 0 {
                warn!(
                    file_id,
                    page_no, total_read, nbytes, "short read past end of file"
                );
                return Err(BufferPoolError::ShortRead {
                    expected: nbytes,
                    actual: total_read,
                });
            }
            total_read += n;
        }

        trace!(file_id, page_no, nbytes, "read page");
        Ok(())
    }

    /// Writes exactly `nbytes` at `page_no * PAGE_SIZE`, extending the file
    /// if necessary. Fails with `ShortWrite` if the OS accepts fewer bytes
    /// than requested without raising an I/O error.
    pub fn write_page(
        &self,
        file_id: FileId,
        page_no: PageNo,
        buffer: &[u8],
        nbytes: usize,
    ) -> Result<()> {
        let opened = self.lookup(file_id)?;
        let offset = page_no as u64 * PAGE_SIZE as u64;

        let mut total_written = 0;
        while total_written < nbytes {
            let n = pwrite(
                &opened.file,
                &buffer[total_written..nbytes],
                offset + total_written as u64,
            )?;
            if n == 0 {
                return Err(BufferPoolError::ShortWrite {
                    expected: nbytes,
                    actual: total_written,
                });
            }
            total_written += n;
        }

        trace!(file_id, page_no, nbytes, "wrote page");
        Ok(())
    }

    /// Returns the next unused page number for `file_id` and advances the
    /// per-file counter. Purely logical: no on-disk allocation bitmap.
    pub fn allocate_page(&self, file_id: FileId) -> Result<PageNo> {
        let opened = self.lookup(file_id)?;
        let page_no = opened.next_page_no.fetch_add(1, Ordering::SeqCst);
        trace!(file_id, page_no, "allocated page");
        Ok(page_no)
    }

    /// Size in bytes of the file at `path`.
    pub fn get_file_size(&self, path: impl AsRef<Path>) -> Result<i64> {
        Ok(std::fs::metadata(path.as_ref())?.len() as i64)
    }

    /// Path of the file identified by `file_id`.
    pub fn get_file_name(&self, file_id: FileId) -> Result<PathBuf> {
        Ok(self.lookup(file_id)?.path.clone())
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}
