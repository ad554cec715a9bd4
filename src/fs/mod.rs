//! Pluggable filesystem abstraction for the file-backed level.
//!
//! The engine only needs a narrow slice of filesystem behavior, so the shim
//! stays narrow: tests and embedded deployments can inject an instrumented
//! backend without touching the level itself. Hard links are deliberately
//! not part of the shim; snapshots call the host syscall directly.

mod os;

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parquet::{
    errors::ParquetError,
    file::reader::{ChunkReader, Length},
};

pub use os::OsFs;

/// Open mode bits for [`Fs::open_file`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Truncate the file to zero length on open.
    pub truncate: bool,
}

impl OpenFlags {
    /// Read-only access to an existing file.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Read-write access, creating the file if missing.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: false,
        }
    }
}

/// Subset of file metadata the engine consumes.
#[derive(Clone, Copy, Debug)]
pub struct Metadata {
    /// Size of the file in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// A single directory entry returned by [`Fs::read_dir`].
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// Full path of the entry.
    pub path: PathBuf,
    /// Metadata captured at listing time.
    pub metadata: Metadata,
}

/// Filesystem operations required by the file-backed level.
pub trait Fs: Send + Sync {
    /// Open a file with the given flags and, on creation, permission bits.
    fn open_file(&self, name: &Path, flags: OpenFlags, perm: u32) -> io::Result<Arc<dyn File>>;

    /// Stat a path.
    fn stat(&self, name: &Path) -> io::Result<Metadata>;

    /// Create a directory and all missing parents.
    fn mkdir_all(&self, path: &Path, perm: u32) -> io::Result<()>;

    /// Remove a path and everything below it. Missing paths are not errors.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Rename a path.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// List a directory. Entries are sorted by path.
    fn read_dir(&self, name: &Path) -> io::Result<Vec<DirEntry>>;
}

/// An open file handle. Closing happens on drop.
///
/// Writes append at the handle's cursor while positional reads leave it
/// untouched, so one handle can serve the active writer and any number of
/// bounded readers over already-published byte ranges.
pub trait File: Send + Sync {
    /// Read into `buf` at `offset`, returning the number of bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write at the current cursor, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Flush file contents to durable storage.
    fn sync(&self) -> io::Result<()>;

    /// Truncate the file to `size` bytes.
    fn truncate(&self, size: u64) -> io::Result<()>;

    /// Stat the open file.
    fn stat(&self) -> io::Result<Metadata>;

    /// Path the file was opened with.
    fn name(&self) -> &Path;

    /// Read exactly `buf.len()` bytes at `offset`.
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "reached end of file before filling buffer",
                    ))
                }
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Write all of `buf` at the current cursor.
    fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
enum SectionSource {
    File(Arc<dyn File>),
    Bytes(Bytes),
}

/// A cheaply cloneable view over a fixed byte range of a file or buffer.
///
/// Implements Parquet's [`ChunkReader`] so a single record inside a level
/// file can be opened as a complete Parquet file without copying it out.
#[derive(Clone)]
pub struct SectionReader {
    src: SectionSource,
    offset: u64,
    length: u64,
}

impl SectionReader {
    /// View `[offset, offset + length)` of `file`.
    pub fn file(file: Arc<dyn File>, offset: u64, length: u64) -> Self {
        Self {
            src: SectionSource::File(file),
            offset,
            length,
        }
    }

    /// View an entire in-memory buffer.
    pub fn bytes(bytes: Bytes) -> Self {
        let length = bytes.len() as u64;
        Self {
            src: SectionSource::Bytes(bytes),
            offset: 0,
            length,
        }
    }

    /// Length of the section in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the section is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn read_section(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(pos);
        if remaining == 0 {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(remaining) as usize;
        match &self.src {
            SectionSource::Bytes(bytes) => {
                let start = pos as usize;
                buf[..n].copy_from_slice(&bytes[start..start + n]);
                Ok(n)
            }
            SectionSource::File(file) => file.read_at(&mut buf[..n], self.offset + pos),
        }
    }
}

impl std::fmt::Debug for SectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionReader")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

impl Length for SectionReader {
    fn len(&self) -> u64 {
        self.length
    }
}

impl ChunkReader for SectionReader {
    type T = SectionCursor;

    fn get_read(&self, start: u64) -> Result<Self::T, ParquetError> {
        if start > self.length {
            return Err(ParquetError::EOF(format!(
                "section read at {start} beyond length {}",
                self.length
            )));
        }
        Ok(SectionCursor {
            section: self.clone(),
            pos: start,
        })
    }

    fn get_bytes(&self, start: u64, length: usize) -> Result<Bytes, ParquetError> {
        let end = start
            .checked_add(length as u64)
            .filter(|end| *end <= self.length)
            .ok_or_else(|| {
                ParquetError::EOF(format!(
                    "section read of {length} bytes at {start} beyond length {}",
                    self.length
                ))
            })?;
        match &self.src {
            SectionSource::Bytes(bytes) => Ok(bytes.slice(start as usize..end as usize)),
            SectionSource::File(file) => {
                let mut buf = vec![0u8; length];
                file.read_exact_at(&mut buf, self.offset + start)
                    .map_err(|err| ParquetError::External(Box::new(err)))?;
                Ok(buf.into())
            }
        }
    }
}

/// Sequential reader over a [`SectionReader`].
pub struct SectionCursor {
    section: SectionReader,
    pos: u64,
}

impl io::Read for SectionCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.section.read_section(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn section_cursor_is_bounded() {
        let section = SectionReader::bytes(Bytes::from_static(b"hello world"));
        let mut cursor = section.get_read(6).unwrap();
        let mut out = String::new();
        cursor.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
    }

    #[test]
    fn get_bytes_rejects_out_of_range() {
        let section = SectionReader::bytes(Bytes::from_static(b"abc"));
        assert!(section.get_bytes(1, 2).is_ok());
        assert!(section.get_bytes(2, 2).is_err());
        assert!(section.get_bytes(u64::MAX, 1).is_err());
    }
}
