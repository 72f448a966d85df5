//! Filesystem capability traits and their `std::fs` implementation.
//!
//! The storage core never touches `std::fs` directly; it consumes these
//! narrow interfaces so tests and embedders can substitute their own file
//! plumbing. Operations return a status and never panic on I/O failure.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::flock::FileLock;

/// Sequential append sink. A table or log file is written through one of
/// these and must be explicitly synced before it is considered published.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;
    /// Pushes buffered bytes to the OS.
    fn flush(&mut self) -> Result<()>;
    /// Forces bytes to stable storage.
    fn sync(&mut self) -> Result<()>;
}

/// Positioned reads into an immutable file. Safe for unsynchronized
/// concurrent use.
pub trait RandomAccessFile: Send + Sync {
    /// Reads up to `n` bytes starting at `offset`. A short result means the
    /// file ended; callers decide whether that is corruption.
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn RandomAccessFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RandomAccessFile")
    }
}

/// Forward-only reads, used for log replay.
pub trait SequentialFile: Send {
    /// Reads up to `buf.len()` bytes, returning the count; 0 at EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// The filesystem surface the storage core consumes.
pub trait Env: Send + Sync {
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>>;
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;
    fn get_children(&self, dir: &Path) -> Result<Vec<String>>;
    fn lock_file(&self, path: &Path) -> Result<FileLock>;
    fn file_size(&self, path: &Path) -> Result<u64>;
}

/// `std::fs`-backed environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEnv;

struct FsWritableFile {
    writer: BufWriter<File>,
}

impl WritableFile for FsWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
struct FsRandomAccessFile {
    file: File,
}

#[cfg(unix)]
impl RandomAccessFile for FsRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;

        let mut buf = vec![0u8; n];
        let mut read = 0;
        while read < n {
            let got = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if got == 0 {
                break;
            }
            read += got;
        }
        buf.truncate(read);
        Ok(buf)
    }
}

#[cfg(not(unix))]
struct FsRandomAccessFile {
    file: std::sync::Mutex<File>,
}

#[cfg(not(unix))]
impl RandomAccessFile for FsRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock().map_err(|e| Error::Io(e.to_string()))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; n];
        let mut read = 0;
        while read < n {
            let got = file.read(&mut buf[read..])?;
            if got == 0 {
                break;
            }
            read += got;
        }
        buf.truncate(read);
        Ok(buf)
    }
}

struct FsSequentialFile {
    file: File,
}

impl SequentialFile for FsSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.file.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

impl Env for FsEnv {
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        Ok(Box::new(FsWritableFile {
            writer: BufWriter::new(file),
        }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        #[cfg(unix)]
        {
            Ok(Arc::new(FsRandomAccessFile { file }))
        }
        #[cfg(not(unix))]
        {
            Ok(Arc::new(FsRandomAccessFile {
                file: std::sync::Mutex::new(file),
            }))
        }
    }

    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        Ok(Box::new(FsSequentialFile { file }))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| open_error(path, e))
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| open_error(from, e))
    }

    fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| open_error(dir, e))? {
            let entry = entry.map_err(|e| open_error(dir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        FileLock::lock(path)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path).map_err(|e| open_error(path, e))?.len())
    }
}

fn open_error(path: &Path, err: std::io::Error) -> Error {
    Error::Io(format!("{}: {err}", path.display()))
}

/// Convenience constructor used throughout tests and by embedders that do
/// not need a custom environment.
pub fn default_env() -> Arc<dyn Env> {
    Arc::new(FsEnv)
}
