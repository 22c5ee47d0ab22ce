use std::io;
use std::path::Path;

use crate::error::Result;
use crate::record::{self, VLOG_HEADER_SIZE};
use crate::vfs::{vlog_file_name, FileSystem, WritableFile};

/// Appender for a single vlog file.
///
/// Each live vlog has exactly one writer. A record is written as header
/// bytes then payload bytes then a flush; appends are not atomic, so the
/// reader tolerates a partial record at the tail of the file.
pub struct VlogWriter {
    dest: Box<dyn WritableFile>,
    /// ID of this vlog file
    file_id: u32,
    /// Current size of the file, also the offset of the next frame
    offset: u64,
}

impl VlogWriter {
    /// Opens the vlog file with the given id for appending, creating it if
    /// needed and resuming at its current size.
    pub fn new(fs: &dyn FileSystem, dir: &Path, file_id: u32) -> Result<Self> {
        let path = vlog_file_name(dir, file_id);
        let offset = match fs.file_size(&path) {
            Ok(size) => size,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let dest = fs.new_writable_file(&path)?;

        Ok(Self {
            dest,
            file_id,
            offset,
        })
    }

    /// Appends one framed record and returns the byte offset at which the
    /// payload begins, for the caller to install as an index pointer.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<u64> {
        let header = record::encode_header(payload)?;
        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.dest.flush()?;

        let payload_offset = self.offset + VLOG_HEADER_SIZE as u64;
        self.offset += (VLOG_HEADER_SIZE + payload.len()) as u64;
        Ok(payload_offset)
    }

    /// Flushes and fsyncs the file.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()?;
        Ok(())
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Current size of the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
