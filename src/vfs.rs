use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Read-side capabilities of a vlog file.
///
/// `read`/`skip_from_head` drive the buffered sequential scan and share a
/// cursor; `read_exact_at` is stateless and safe to call concurrently with
/// the scan.
pub trait SequentialFile: Send + Sync {
    /// Reads up to `buf.len()` bytes at the current cursor, advancing it.
    /// Returns 0 only at end of file.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Repositions the cursor to an absolute offset from the start.
    fn skip_from_head(&mut self, offset: u64) -> io::Result<()>;

    /// Reads exactly `buf.len()` bytes at `offset` without touching the
    /// cursor.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Releases the underlying blocks for `[offset, offset + len)` while
    /// keeping the file's logical size.
    fn deallocate_range(&self, offset: u64, len: u64) -> io::Result<()>;
}

/// Append-side capabilities of a vlog file.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

/// Filesystem capabilities the value log consumes from its environment.
pub trait FileSystem: Send + Sync {
    fn new_sequential_file(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>>;
    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;
    fn delete_file(&self, path: &Path) -> io::Result<()>;
    fn file_size(&self, path: &Path) -> io::Result<u64>;
}

/// Returns the path of the vlog file with the given id.
pub fn vlog_file_name(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:06}.vlog"))
}

impl SequentialFile for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn skip_from_head(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    #[cfg(not(unix))]
    fn read_exact_at(&self, _offset: u64, _buf: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "positional reads are not supported on this platform",
        ))
    }

    #[cfg(target_os = "linux")]
    fn deallocate_range(&self, offset: u64, len: u64) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let ret = unsafe {
            libc::fallocate(
                self.as_raw_fd(),
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                offset as libc::off_t,
                len as libc::off_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn deallocate_range(&self, _offset: u64, _len: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "hole punching is not supported on this platform",
        ))
    }
}

impl WritableFile for BufWriter<File> {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn sync(&mut self) -> io::Result<()> {
        Write::flush(self)?;
        self.get_ref().sync_all()
    }
}

/// Local-disk implementation of the filesystem capabilities.
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn new_sequential_file(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>> {
        // Write access is required for deallocate_range.
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(file))
    }

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }
}
