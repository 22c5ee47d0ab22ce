use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::record::{self, BLOCK_SIZE, VLOG_HEADER_SIZE};
use crate::vfs::SequentialFile;

/// Reporter interface for corruption found during sequential scans.
///
/// `bytes` is the approximate number of bytes dropped.
pub trait Reporter: Send {
    fn corruption(&mut self, bytes: usize, reason: &str);
}

/// Buffered state of the sequential scan path.
///
/// Not shared with the random-read path: positional reads never touch the
/// scan cursor, so the two can proceed concurrently.
struct SeqState {
    /// Block-sized read buffer
    buffer: Box<[u8]>,
    /// Unconsumed region of `buffer` is `start..end`
    start: usize,
    end: usize,
    /// Last refill hit the end of the file. Sticky for the sequential path;
    /// reset by `skip_to_pos`.
    eof: bool,
    reporter: Option<Box<dyn Reporter>>,
}

impl SeqState {
    fn buffered(&self) -> usize {
        self.end - self.start
    }

    fn report_corruption(&mut self, bytes: usize, reason: &str) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.corruption(bytes, reason);
        }
    }
}

/// Reader over one vlog file.
///
/// Supports sequential record iteration (GC and recovery), mutex-guarded
/// random reads at known offsets (index lookups), hole punching, and
/// repositioning for resumed scans.
pub struct VlogReader {
    file: Mutex<Box<dyn SequentialFile>>,
    seq: Mutex<SeqState>,
    verify_checksum: bool,
    /// Offset cleaning of this vlog has reached, installed during recovery
    clean_pos: AtomicU64,
}

impl VlogReader {
    pub fn new(
        file: Box<dyn SequentialFile>,
        reporter: Option<Box<dyn Reporter>>,
        verify_checksum: bool,
    ) -> Self {
        Self {
            file: Mutex::new(file),
            seq: Mutex::new(SeqState {
                buffer: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
                start: 0,
                end: 0,
                eof: false,
                reporter,
            }),
            verify_checksum,
            clean_pos: AtomicU64::new(0),
        }
    }

    /// Reads the next record into `record`.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` at end of input. A
    /// short header or short payload at the end of the file is treated as
    /// end of input with nothing reported: a torn final append is expected
    /// after a crash. A checksum mismatch in the middle of the file is
    /// reported to the reporter with `7 + length` dropped bytes and
    /// surfaces as `Corruption` so scans can tell it apart from a clean
    /// end; the reader stays usable afterwards.
    pub fn read_record(&self, record: &mut Vec<u8>) -> Result<bool> {
        record.clear();
        let mut seq = self.seq.lock().unwrap();
        let seq = &mut *seq;

        if seq.buffered() < VLOG_HEADER_SIZE {
            if seq.eof {
                seq.start = 0;
                seq.end = 0;
                return Ok(false);
            }
            self.refill(seq)?;
            if seq.buffered() < VLOG_HEADER_SIZE {
                return Ok(false);
            }
        }

        // Capture the expected CRC before any further buffer mutation: the
        // straddle path below reuses the buffer that holds the header.
        let header = &seq.buffer[seq.start..seq.start + VLOG_HEADER_SIZE];
        let (expected_crc, length) = record::parse_header(header);

        if VLOG_HEADER_SIZE + length <= seq.buffered() {
            // The whole record is buffered
            let payload_start = seq.start + VLOG_HEADER_SIZE;
            let payload = &seq.buffer[payload_start..payload_start + length];
            if self.verify_checksum {
                let actual_crc = record::checksum(payload);
                if actual_crc != expected_crc {
                    seq.report_corruption(VLOG_HEADER_SIZE + length, "checksum mismatch");
                    return Err(Error::Corruption("checksum mismatch".to_string()));
                }
            }
            record.extend_from_slice(payload);
            seq.start += VLOG_HEADER_SIZE + length;
            return Ok(true);
        }

        if seq.eof {
            // Truncated trailing record: ignore, report nothing
            return Ok(false);
        }

        // The payload straddles the buffer. Move the available suffix out,
        // then fetch the remainder.
        record.reserve(length);
        record.extend_from_slice(&seq.buffer[seq.start + VLOG_HEADER_SIZE..seq.end]);
        seq.start = 0;
        seq.end = 0;

        let remainder = length - record.len();
        if remainder > BLOCK_SIZE / 2 {
            // Large remainder: one read straight into the scratch tail
            let filled = record.len();
            record.resize(length, 0);
            let n = {
                let mut file = self.file.lock().unwrap();
                read_full(file.as_mut(), &mut record[filled..])?
            };
            if n < remainder {
                seq.eof = true;
                record.clear();
                return Ok(false);
            }
        } else {
            // Small remainder: refill a block and copy out of it
            let n = {
                let mut file = self.file.lock().unwrap();
                read_full(file.as_mut(), &mut seq.buffer[..])?
            };
            seq.end = n;
            if n < BLOCK_SIZE {
                seq.eof = true;
            }
            if n < remainder {
                record.clear();
                return Ok(false);
            }
            record.extend_from_slice(&seq.buffer[..remainder]);
            seq.start = remainder;
        }

        if self.verify_checksum {
            let actual_crc = record::checksum(record);
            if actual_crc != expected_crc {
                seq.report_corruption(VLOG_HEADER_SIZE + length, "checksum mismatch");
                record.clear();
                return Err(Error::Corruption("checksum mismatch".to_string()));
            }
        }
        Ok(true)
    }

    /// Copies any buffered leftover to the front and fills the rest of the
    /// block from the file.
    fn refill(&self, seq: &mut SeqState) -> Result<()> {
        let leftover = seq.buffered();
        if leftover > 0 {
            seq.buffer.copy_within(seq.start..seq.end, 0);
        }
        seq.start = 0;
        seq.end = leftover;

        let n = {
            let mut file = self.file.lock().unwrap();
            match read_full(file.as_mut(), &mut seq.buffer[leftover..]) {
                Ok(n) => n,
                Err(e) => {
                    seq.end = 0;
                    seq.eof = true;
                    return Err(e.into());
                }
            }
        };
        seq.end += n;
        if leftover + n < BLOCK_SIZE {
            seq.eof = true;
        }
        Ok(())
    }

    /// Repositions the sequential scan to an absolute offset, clearing the
    /// buffer and the end-of-file state.
    pub fn skip_to_pos(&self, pos: u64) -> Result<()> {
        let mut seq = self.seq.lock().unwrap();
        {
            let mut file = self.file.lock().unwrap();
            file.skip_from_head(pos)?;
        }
        seq.start = 0;
        seq.end = 0;
        seq.eof = false;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes at `offset`. Safe to call from many
    /// threads and concurrently with a sequential scan; a partial read is
    /// an error.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.read_exact_at(offset, buf)?;
        Ok(())
    }

    /// Punches a hole over `[offset, offset + len)`, releasing the
    /// underlying blocks while keeping the file's logical size. Callers
    /// must only punch ranges no live pointer references.
    pub fn deallocate_range(&self, offset: u64, len: u64) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.deallocate_range(offset, len)?;
        Ok(())
    }

    /// Whether the sequential scan has hit the end of the file.
    pub fn is_end(&self) -> bool {
        self.seq.lock().unwrap().eof
    }

    pub fn set_clean_pos(&self, pos: u64) {
        self.clean_pos.store(pos, Ordering::SeqCst);
    }

    pub fn clean_pos(&self) -> u64 {
        self.clean_pos.load(Ordering::SeqCst)
    }
}

/// Reads until `buf` is full or the file ends, returning the bytes read.
fn read_full(file: &mut dyn SequentialFile, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
