use std::path::{Path, PathBuf};

use crate::batch::{BatchIter, WriteBatch};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::manager::VlogManager;
use crate::pointer::TailPointer;
use crate::record::VLOG_HEADER_SIZE;
use crate::vfs::{vlog_file_name, FileSystem};
use crate::Options;

/// How a collection scan stopped.
enum ScanExit {
    /// Clean end of file: every record was examined
    Eof,
    /// Checksum mismatch or malformed batch: the range up to `pos` was
    /// examined, the rest is unreachable
    Corrupt,
    /// The database began shutting down mid-scan
    Shutdown,
}

/// One-pass garbage collector for a vlog file.
///
/// Borrows the manager, index, and filesystem for the duration of a pass;
/// it owns nothing. Records are scanned sequentially, each one a serialized
/// write batch; a value is live iff the index's current pointer for its key
/// still decodes to the exact bytes under the scan cursor. Live values are
/// re-inserted through the index's normal write path (landing in the
/// currently-appended vlog) before the scanned range is reclaimed.
pub struct GarbageCollector<'a> {
    manager: &'a VlogManager,
    index: &'a dyn Index,
    fs: &'a dyn FileSystem,
    dir: PathBuf,
    clean_write_buffer_size: usize,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(
        manager: &'a VlogManager,
        index: &'a dyn Index,
        fs: &'a dyn FileSystem,
        dir: &Path,
        opts: &Options,
    ) -> Self {
        Self {
            manager,
            index,
            fs,
            dir: dir.to_path_buf(),
            clean_write_buffer_size: opts.clean_write_buffer_size,
        }
    }

    /// Collects the vlog under cleaning, or promotes a candidate if none
    /// is. Returns false when there is nothing to do.
    pub fn run(&self) -> Result<bool> {
        if self.manager.cleaning().is_none() && !self.manager.has_candidate() {
            return Ok(false);
        }
        let file_id = self.manager.pick_for_cleaning();
        let start = self
            .manager
            .get_reader(file_id)
            .map_or(0, |reader| reader.clean_pos());
        self.collect(file_id, start)?;
        Ok(true)
    }

    /// Collects vlog `file_id` from byte offset `start` (0 for a fresh
    /// pass, the persisted tail for a resumed one).
    pub fn collect(&self, file_id: u32, start: u64) -> Result<()> {
        if !self.manager.try_begin_gc() {
            return Err(Error::GcAlreadyInProgress);
        }
        let _guard = scopeguard::guard((), |_| {
            self.manager.end_gc();
        });

        let reader = self
            .manager
            .get_reader(file_id)
            .ok_or(Error::VlogNotFound(file_id))?;
        reader.skip_to_pos(start)?;
        log::debug!("collecting vlog {file_id} from offset {start}");

        let mut pos = start;
        let mut record = Vec::new();
        let mut live = WriteBatch::new();

        let exit = loop {
            if self.index.is_shutdown() {
                break ScanExit::Shutdown;
            }
            match reader.read_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break ScanExit::Eof,
                Err(Error::Corruption(reason)) => {
                    log::warn!("vlog {file_id} corrupt past offset {pos}: {reason}");
                    break ScanExit::Corrupt;
                }
                Err(e) => return Err(e),
            }
            pos += VLOG_HEADER_SIZE as u64;
            let payload_start = pos;

            let iter = match BatchIter::new(&record) {
                Ok(iter) => iter,
                Err(e) => {
                    log::warn!("vlog {file_id}: malformed batch at offset {payload_start}: {e}");
                    break ScanExit::Corrupt;
                }
            };
            let mut malformed = false;
            for entry in iter {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("vlog {file_id}: malformed batch at offset {payload_start}: {e}");
                        malformed = true;
                        break;
                    }
                };
                pos = payload_start + entry.end_offset as u64;

                // Deletions are dropped: the index's own log remembers them
                let value = match entry.value {
                    Some(value) => value,
                    None => continue,
                };

                // Live iff the index still points at exactly these bytes;
                // (file, offset + size) is a primary key within the vlog,
                // so the value itself never needs decoding.
                match self.index.get_pointer(entry.key) {
                    Ok(Some(ptr)) if ptr.file_id == file_id && ptr.end_offset() == pos => {
                        live.put(entry.key, value);
                    }
                    _ => {}
                }
            }
            if malformed {
                break ScanExit::Corrupt;
            }
            pos = payload_start + record.len() as u64;

            if !live.is_empty() && live.byte_size() > self.clean_write_buffer_size {
                self.index.write(std::mem::take(&mut live))?;
            }
        };

        if !live.is_empty() {
            self.index.write(std::mem::take(&mut live))?;
        }

        if pos == start {
            return Ok(());
        }

        match exit {
            ScanExit::Shutdown => {
                // Leave the range intact and the persisted tail untouched:
                // the re-inserted values are already durable, so the next
                // pass rescans the same range and finds them dead.
                log::info!("vlog {file_id} collection stopped by shutdown at offset {pos}");
            }
            ScanExit::Eof => {
                self.fs.delete_file(&vlog_file_name(&self.dir, file_id))?;
                self.manager.finish(file_id);
                log::info!("vlog {file_id} collected to EOF and deleted");
            }
            ScanExit::Corrupt => {
                if let Err(e) = reader.deallocate_range(start, pos - start) {
                    log::warn!(
                        "vlog {file_id}: failed to release {} reclaimed bytes: {e}",
                        pos - start
                    );
                } else {
                    reader.set_clean_pos(pos);
                    // The tail is written only after the punch: a crash in
                    // between re-scans an already-punched region instead of
                    // trusting reclaimed bytes.
                    if let Err(e) = self.index.put_tail(TailPointer::new(file_id, pos)) {
                        log::warn!(
                            "vlog {file_id}: tail write at offset {pos} failed ({e}); \
                             the range will be rescanned next run"
                        );
                    }
                    log::info!("vlog {file_id} reclaimed up to offset {pos}");
                }
            }
        }
        Ok(())
    }
}
