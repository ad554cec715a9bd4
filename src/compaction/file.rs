//! On-disk level backed by an append-only log of parts.
//!
//! A level directory holds numbered `.idx` files. Each file is a
//! concatenation of records: a Parquet-encoded row group followed by an
//! 8-byte little-endian trailer carrying the payload length. Only the last
//! file is writable; recovery walks each file back to front, trailer by
//! trailer.

use std::{
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::Level as LogLevel;
use parquet::format::KeyValue;

use super::{CompactionError, Level};
use crate::{
    codec::{Compaction, SerializedBuffer, COMPACTION_TX_KEY},
    fs::{File, Fs, OpenFlags, SectionReader},
    logging::terrace_log,
    part::{Part, ReleaseFn, WaitGroup},
};

/// Extension of level files.
pub const INDEX_FILE_EXTENSION: &str = "idx";

const TRAILER_SIZE: u64 = 8;
const DIR_PERMS: u32 = 0o755;
const FILE_PERMS: u32 = 0o640;

/// A level persisted as an append-only multi-file part log.
pub struct FileCompaction {
    dir: PathBuf,
    compact: Arc<dyn Compaction>,
    max_size: u64,
    fs: Arc<dyn Fs>,

    index_files: Vec<Arc<dyn File>>,
    /// Write offset into the active (last) file.
    offset: u64,
    /// Parts currently referencing this level.
    parts: WaitGroup,
}

impl fmt::Debug for FileCompaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCompaction")
            .field("dir", &self.dir)
            .field("max_size", &self.max_size)
            .field("index_files", &self.index_files.len())
            .field("offset", &self.offset)
            .finish()
    }
}

impl FileCompaction {
    /// Open a fresh level at `dir`: the directory is created if missing,
    /// along with an initial active file with id 0.
    pub fn open(
        dir: impl Into<PathBuf>,
        max_size: u64,
        compact: Arc<dyn Compaction>,
        fs: Arc<dyn Fs>,
    ) -> Result<Self, CompactionError> {
        let mut level = Self::empty(dir.into(), max_size, compact, fs)?;
        level.create_index_file()?;
        Ok(level)
    }

    /// Recover a level from `dir`.
    ///
    /// Walks the directory in lexicographic order and rebuilds the parts of
    /// every non-empty `.idx` file, newest record first within each file.
    /// Records missing a parseable `compaction_tx` are downgraded to
    /// transaction 0: lost provenance is not lost data. A fresh active file
    /// is created afterwards so writes may resume. `options` are release
    /// hooks attached to every recovered part.
    pub fn recover(
        dir: impl Into<PathBuf>,
        max_size: u64,
        compact: Arc<dyn Compaction>,
        fs: Arc<dyn Fs>,
        options: &[ReleaseFn],
    ) -> Result<(Self, Vec<Part>), CompactionError> {
        let mut level = Self::empty(dir.into(), max_size, compact, fs)?;
        let recovered = level.recover_parts(options);

        // Writes must be able to resume even when part of the walk failed.
        if let Err(err) = level.create_index_file() {
            terrace_log!(
                LogLevel::Error,
                "recover",
                "failed to create new level file dir={:?} err={}",
                level.dir,
                err,
            );
        }

        Ok((level, recovered?))
    }

    fn empty(
        dir: PathBuf,
        max_size: u64,
        compact: Arc<dyn Compaction>,
        fs: Arc<dyn Fs>,
    ) -> Result<Self, CompactionError> {
        fs.mkdir_all(&dir, DIR_PERMS)?;
        Ok(Self {
            dir,
            compact,
            max_size,
            fs,
            index_files: Vec::new(),
            offset: 0,
            parts: WaitGroup::default(),
        })
    }

    fn index_path(&self, id: usize) -> PathBuf {
        self.dir.join(format!("{id:020}.{INDEX_FILE_EXTENSION}"))
    }

    /// Create the next active file, rendering the previous one immutable.
    fn create_index_file(&mut self) -> Result<(), CompactionError> {
        let path = self.index_path(self.index_files.len());
        let file = self.fs.open_file(&path, OpenFlags::read_write(), FILE_PERMS)?;
        self.offset = 0;
        self.index_files.push(file);
        Ok(())
    }

    /// The currently active index file.
    fn active(&self) -> &Arc<dyn File> {
        self.index_files.last().expect("level has no active file")
    }

    /// Flush the active file to durable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.active().sync()
    }

    /// Release hook that drains one slot of the live-part counter.
    fn release_slot(&self) -> ReleaseFn {
        self.parts.add(1);
        let parts = self.parts.clone();
        Arc::new(move || parts.done())
    }

    fn recover_parts(&mut self, options: &[ReleaseFn]) -> Result<Vec<Part>, CompactionError> {
        let mut recovered = Vec::new();
        for entry in self.fs.read_dir(&self.dir)? {
            if entry.metadata.is_dir
                || entry.path.extension().and_then(|e| e.to_str()) != Some(INDEX_FILE_EXTENSION)
            {
                continue;
            }
            if entry.metadata.size == 0 {
                // File empty, nothing to recover.
                continue;
            }

            let file = self
                .fs
                .open_file(&entry.path, OpenFlags::read_only(), FILE_PERMS)?;
            self.index_files.push(file.clone());

            match self.recover_file(&file, entry.metadata.size, options) {
                Ok(mut parts) => recovered.append(&mut parts),
                Err(err) => {
                    // Dropping the handle closes the file; the partial
                    // parts were already released when recover_file
                    // unwound.
                    self.index_files.pop();
                    return Err(err);
                }
            }
        }
        Ok(recovered)
    }

    /// Recover all parts of one file, last record first.
    ///
    /// On failure the partially recovered parts are dropped here, firing
    /// their release hooks before the error reaches the caller.
    fn recover_file(
        &mut self,
        file: &Arc<dyn File>,
        size: u64,
        options: &[ReleaseFn],
    ) -> Result<Vec<Part>, CompactionError> {
        let mut parts = Vec::new();
        let mut offset = size;
        while offset > 0 {
            offset = offset
                .checked_sub(TRAILER_SIZE)
                .ok_or_else(|| CompactionError::Truncated {
                    path: file.name().to_path_buf(),
                    offset,
                })?;
            let mut trailer = [0u8; TRAILER_SIZE as usize];
            file.read_exact_at(&mut trailer, offset)?;
            let payload_size = u64::from_le_bytes(trailer);

            offset = offset
                .checked_sub(payload_size)
                .ok_or_else(|| CompactionError::Truncated {
                    path: file.name().to_path_buf(),
                    offset,
                })?;
            let buffer =
                SerializedBuffer::open(SectionReader::file(file.clone(), offset, payload_size))?;

            let tx = match buffer.lookup_metadata(COMPACTION_TX_KEY) {
                Some(raw) => match raw.parse::<u64>() {
                    Ok(tx) => tx,
                    Err(err) => {
                        terrace_log!(
                            LogLevel::Warn,
                            "recover",
                            "failed to parse compaction_tx metadata file={:?} err={}",
                            file.name(),
                            err,
                        );
                        0
                    }
                },
                None => {
                    terrace_log!(
                        LogLevel::Warn,
                        "recover",
                        "failed to find compaction_tx metadata file={:?}",
                        file.name(),
                    );
                    0
                }
            };

            let mut releases = options.to_vec();
            releases.push(self.release_slot());
            parts.push(Part::new(tx, buffer, releases));
        }
        Ok(parts)
    }
}

/// Counts the bytes the codec writes to the active file.
struct AccountingWriter<'a> {
    file: &'a dyn File,
    written: u64,
}

impl Write for AccountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Level for FileCompaction {
    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn compact(
        &mut self,
        inputs: &[Part],
        options: &[ReleaseFn],
    ) -> Result<(Vec<Part>, u64, u64), CompactionError> {
        if inputs.is_empty() {
            return Err(CompactionError::EmptyInput);
        }

        let tx = inputs[0].tx();
        let active = self.active().clone();
        let mut accountant = AccountingWriter {
            file: active.as_ref(),
            written: 0,
        };
        // Compacting up through the first input's transaction.
        let pre_compaction_size = self.compact.compact(
            &mut accountant,
            inputs,
            vec![KeyValue::new(COMPACTION_TX_KEY.to_owned(), tx.to_string())],
        )?;
        let payload_size = accountant.written;

        // Record the payload length for recovery, then make the record
        // durable before publishing it.
        let prev_offset = self.offset;
        active.write_all(&payload_size.to_le_bytes())?;
        self.offset += payload_size + TRAILER_SIZE;
        active.sync()?;

        let buffer =
            SerializedBuffer::open(SectionReader::file(active, prev_offset, payload_size))?;

        let mut releases = options.to_vec();
        releases.push(self.release_slot());
        Ok((
            vec![Part::new(tx, buffer, releases)],
            pre_compaction_size,
            payload_size,
        ))
    }

    /// Hard-link every level file into `dir`, then rotate the active file
    /// so everything snapshotted is immutable. Parts and the writer are
    /// ignored; the files already hold the level's whole state.
    fn snapshot(
        &mut self,
        _live_parts: &[Part],
        _writer: &mut dyn FnMut(&Part) -> Result<(), CompactionError>,
        dir: &Path,
    ) -> Result<(), CompactionError> {
        self.fs.mkdir_all(dir, DIR_PERMS)?;

        let last = self.index_files.len().saturating_sub(1);
        for (i, file) in self.index_files.iter().enumerate() {
            if i == last {
                if self.offset > 0 {
                    file.sync()?;
                } else {
                    // Skip the empty active file; nothing new to rotate.
                    return Ok(());
                }
            }

            let base = file.name().file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "level file path has no base name")
            })?;
            // Hard links need a content-identity primitive the Fs shim does
            // not model, so this goes straight to the host filesystem.
            std::fs::hard_link(file.name(), dir.join(base))?;
        }

        self.create_index_file()
    }

    /// Wait for every part to be released, then delete and recreate the
    /// level directory with one fresh active file. Errors are logged; the
    /// caller has no recourse at this point.
    fn reset(&mut self) {
        self.parts.wait();

        // Closing happens as the handles drop.
        self.index_files.clear();

        if let Err(err) = self.fs.remove_all(&self.dir) {
            terrace_log!(
                LogLevel::Error,
                "reset",
                "failed to remove level directory dir={:?} err={}",
                self.dir,
                err,
            );
        }
        if let Err(err) = self.fs.mkdir_all(&self.dir, DIR_PERMS) {
            terrace_log!(
                LogLevel::Error,
                "reset",
                "failed to create level directory dir={:?} err={}",
                self.dir,
                err,
            );
        }
        if let Err(err) = self.create_index_file() {
            terrace_log!(
                LogLevel::Error,
                "reset",
                "failed to create new level file dir={:?} err={}",
                self.dir,
                err,
            );
        }
    }
}
