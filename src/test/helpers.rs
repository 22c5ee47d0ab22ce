use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::batch::{BatchIter, WriteBatch};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::manager::VlogManager;
use crate::pointer::{TailPointer, ValuePointer};
use crate::reader::{Reporter, VlogReader};
use crate::vfs::{vlog_file_name, FileSystem, LocalFs};
use crate::writer::VlogWriter;
use crate::Options;

/// Minimal in-memory stand-in for the LSM index: a key -> pointer map over
/// the real vlog write path. Overwrites and deletes bump the superseded
/// vlog's stale counter the way the index write path does.
pub(crate) struct TestIndex {
    pub(crate) manager: Arc<VlogManager>,
    dir: PathBuf,
    opts: Options,
    state: Mutex<IndexState>,
    shutdown: AtomicBool,
}

struct IndexState {
    pointers: HashMap<Vec<u8>, ValuePointer>,
    tail: Option<TailPointer>,
    writer: Option<VlogWriter>,
    next_file_id: u32,
    /// When set, the index shuts down after this many more write() calls,
    /// simulating a crash mid-GC.
    writes_until_shutdown: Option<u32>,
}

impl TestIndex {
    pub(crate) fn new(dir: &Path, opts: Options) -> Self {
        Self {
            manager: Arc::new(VlogManager::new(opts.clean_threshold)),
            dir: dir.to_path_buf(),
            opts,
            state: Mutex::new(IndexState {
                pointers: HashMap::new(),
                tail: None,
                writer: None,
                next_file_id: 1,
                writes_until_shutdown: None,
            }),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Rolls to a fresh vlog: new writer, new reader, registered as "now".
    pub(crate) fn roll(&self) -> u32 {
        let file_id = {
            let mut state = self.state.lock().unwrap();
            let file_id = state.next_file_id;
            state.next_file_id += 1;
            state.writer = Some(VlogWriter::new(&LocalFs, &self.dir, file_id).unwrap());
            file_id
        };

        let file = LocalFs
            .new_sequential_file(&vlog_file_name(&self.dir, file_id))
            .unwrap();
        let reader = Arc::new(VlogReader::new(file, None, self.opts.verify_checksums));
        self.manager.add_vlog(file_id, reader);
        self.manager.set_now(file_id);
        file_id
    }

    pub(crate) fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    pub(crate) fn delete_key(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Dereferences a key's pointer into the vlog it names.
    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let ptr = self.pointer_of(key)?;
        let reader = self.manager.get_reader(ptr.file_id)?;
        let mut buf = vec![0u8; ptr.size as usize];
        reader.read(ptr.offset, &mut buf).ok()?;
        Some(buf)
    }

    pub(crate) fn pointer_of(&self, key: &[u8]) -> Option<ValuePointer> {
        self.state.lock().unwrap().pointers.get(key).copied()
    }

    pub(crate) fn tail(&self) -> Option<TailPointer> {
        self.state.lock().unwrap().tail
    }

    pub(crate) fn set_shutdown(&self, value: bool) {
        self.shutdown.store(value, Ordering::SeqCst);
    }

    /// Arms the crash simulation: shutdown trips after `n` more writes.
    pub(crate) fn fail_after_writes(&self, n: u32) {
        self.state.lock().unwrap().writes_until_shutdown = Some(n);
    }

    pub(crate) fn vlog_path(&self, file_id: u32) -> PathBuf {
        vlog_file_name(&self.dir, file_id)
    }
}

impl Index for TestIndex {
    fn get_pointer(&self, key: &[u8]) -> Result<Option<ValuePointer>> {
        Ok(self.state.lock().unwrap().pointers.get(key).copied())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        let payload = batch.into_bytes();

        let mut state = self.state.lock().unwrap();
        let (file_id, payload_offset) = {
            let writer = state.writer.as_mut().expect("no active vlog");
            let offset = writer.add_record(&payload)?;
            writer.sync()?;
            (writer.file_id(), offset)
        };

        for entry in BatchIter::new(&payload).unwrap() {
            let entry = entry.unwrap();
            let superseded = match entry.value {
                Some(value) => {
                    let ptr = ValuePointer::new(
                        file_id,
                        payload_offset + entry.value_offset as u64,
                        value.len() as u32,
                    );
                    state.pointers.insert(entry.key.to_vec(), ptr)
                }
                None => state.pointers.remove(entry.key),
            };
            if let Some(old) = superseded {
                self.manager.inc_stale(old.file_id);
            }
        }

        if let Some(left) = state.writes_until_shutdown {
            if left <= 1 {
                state.writes_until_shutdown = None;
                self.shutdown.store(true, Ordering::SeqCst);
            } else {
                state.writes_until_shutdown = Some(left - 1);
            }
        }
        Ok(())
    }

    fn put_tail(&self, tail: TailPointer) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        self.state.lock().unwrap().tail = Some(tail);
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Reporter that remembers every corruption callback.
#[derive(Clone, Default)]
pub(crate) struct CountingReporter {
    pub(crate) events: Arc<Mutex<Vec<(usize, String)>>>,
}

impl Reporter for CountingReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        self.events.lock().unwrap().push((bytes, reason.to_string()));
    }
}

impl CountingReporter {
    pub(crate) fn dropped_bytes(&self) -> usize {
        self.events.lock().unwrap().iter().map(|(b, _)| *b).sum()
    }

    pub(crate) fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}
