//! Host-filesystem adapter.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{DirEntry, File, Fs, Metadata, OpenFlags};

/// [`Fs`] implementation backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFs;

impl Fs for OsFs {
    fn open_file(&self, name: &Path, flags: OpenFlags, perm: u32) -> io::Result<Arc<dyn File>> {
        let mut options = fs::OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if flags.create {
                options.mode(perm);
            }
        }
        #[cfg(not(unix))]
        let _ = perm;
        let file = options.open(name)?;
        Ok(Arc::new(OsFile {
            file,
            path: name.to_path_buf(),
        }))
    }

    fn stat(&self, name: &Path) -> io::Result<Metadata> {
        let meta = fs::metadata(name)?;
        Ok(Metadata {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;
        builder.create(path)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn read_dir(&self, name: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(name)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                path: entry.path(),
                metadata: Metadata {
                    size: meta.len(),
                    is_dir: meta.is_dir(),
                },
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

struct OsFile {
    file: fs::File,
    path: PathBuf,
}

impl File for OsFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            self.file.seek_read(buf, offset)
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        (&self.file).write(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn stat(&self) -> io::Result<Metadata> {
        let meta = self.file.metadata()?;
        Ok(Metadata {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn name(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_dir_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.idx", "a.idx", "c.idx"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let entries = OsFs.read_dir(dir.path()).unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.idx", "b.idx", "c.idx"]);
    }

    #[test]
    fn positional_reads_ignore_write_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let file = OsFs
            .open_file(&dir.path().join("f"), OpenFlags::read_write(), 0o640)
            .unwrap();
        file.write_all(b"abcdef").unwrap();
        let mut buf = [0u8; 3];
        file.read_exact_at(&mut buf, 1).unwrap();
        assert_eq!(&buf, b"bcd");
        file.write_all(b"gh").unwrap();
        assert_eq!(file.stat().unwrap().size, 8);
    }
}
