use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::reader::VlogReader;

struct VlogInfo {
    reader: Arc<VlogReader>,
    /// Lower bound on the records in this vlog whose index entries no
    /// longer point at them
    stale_count: u64,
}

struct Inner {
    vlogs: HashMap<u32, VlogInfo>,
    /// Vlogs whose counter crossed the threshold, by id
    candidates: BTreeSet<u32>,
    /// The active append target; never eligible for cleaning
    now: u32,
    /// The single vlog currently being garbage-collected
    cleaning: Option<u32>,
}

/// Process-wide registry of open vlogs.
///
/// Tracks one reader handle and one stale-record counter per vlog, the
/// active append target, the candidate set for cleaning, and which vlog (if
/// any) is mid-GC. The write path calls [`inc_stale`](Self::inc_stale)
/// whenever it supersedes a key's old vlog pointer; the collector consumes
/// candidates through [`pick_for_cleaning`](Self::pick_for_cleaning).
pub struct VlogManager {
    clean_threshold: u64,
    inner: Mutex<Inner>,
    /// Prevents concurrent garbage collection
    gc_in_progress: AtomicBool,
}

impl VlogManager {
    pub fn new(clean_threshold: u64) -> Self {
        Self {
            clean_threshold,
            inner: Mutex::new(Inner {
                vlogs: HashMap::new(),
                candidates: BTreeSet::new(),
                now: 0,
                cleaning: None,
            }),
            gc_in_progress: AtomicBool::new(false),
        }
    }

    /// Registers a new vlog and makes it the active append target.
    ///
    /// # Panics
    ///
    /// Panics if `file_id` is already registered.
    pub fn add_vlog(&self, file_id: u32, reader: Arc<VlogReader>) {
        let mut inner = self.inner.lock().unwrap();
        let prev = inner.vlogs.insert(
            file_id,
            VlogInfo {
                reader,
                stale_count: 0,
            },
        );
        assert!(prev.is_none(), "vlog {file_id} registered twice");
        inner.now = file_id;
    }

    /// Marks a registered vlog as the active append target.
    ///
    /// Candidacy is re-derived: the new target leaves the candidate set,
    /// and any other vlog whose counter already crossed the threshold while
    /// it was the target becomes eligible now.
    pub fn set_now(&self, file_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.now = file_id;
        // The active append target is never eligible for cleaning
        inner.candidates.remove(&file_id);
        let eligible: Vec<u32> = inner
            .vlogs
            .iter()
            .filter(|(id, info)| **id != file_id && info.stale_count >= self.clean_threshold)
            .map(|(id, _)| *id)
            .collect();
        inner.candidates.extend(eligible);
    }

    pub fn now(&self) -> u32 {
        self.inner.lock().unwrap().now
    }

    pub fn get_reader(&self, file_id: u32) -> Option<Arc<VlogReader>> {
        let inner = self.inner.lock().unwrap();
        inner.vlogs.get(&file_id).map(|info| info.reader.clone())
    }

    /// Increments the stale-record counter for a vlog. Counts for a vlog
    /// that is no longer registered are dropped: it was already cleaned.
    pub fn inc_stale(&self, file_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.now;
        if let Some(info) = inner.vlogs.get_mut(&file_id) {
            info.stale_count += 1;
            if info.stale_count >= self.clean_threshold && file_id != now {
                inner.candidates.insert(file_id);
            }
        }
    }

    pub fn stale_count(&self, file_id: u32) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.vlogs.get(&file_id).map_or(0, |info| info.stale_count)
    }

    pub fn has_candidate(&self) -> bool {
        !self.inner.lock().unwrap().candidates.is_empty()
    }

    /// Snapshot of the vlogs currently eligible for cleaning.
    pub fn candidates(&self) -> Vec<u32> {
        self.inner.lock().unwrap().candidates.iter().copied().collect()
    }

    /// Returns the vlog to clean, promoting a candidate if no cleaning is
    /// in progress. Repeated calls return the same id until
    /// [`finish`](Self::finish) runs, so an interrupted pass resumes on the
    /// same vlog.
    ///
    /// # Panics
    ///
    /// Panics if no cleaning is in progress and the candidate set is empty;
    /// callers gate on [`has_candidate`](Self::has_candidate).
    pub fn pick_for_cleaning(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        match inner.cleaning {
            Some(file_id) => file_id,
            None => {
                let file_id = inner
                    .candidates
                    .iter()
                    .next()
                    .copied()
                    .expect("pick_for_cleaning requires a candidate vlog");
                inner.cleaning = Some(file_id);
                file_id
            }
        }
    }

    pub fn cleaning(&self) -> Option<u32> {
        self.inner.lock().unwrap().cleaning
    }

    /// Unregisters a fully-cleaned vlog: drops its reader, removes it from
    /// the candidate set, and clears the cleaning slot.
    pub fn finish(&self, file_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.vlogs.remove(&file_id);
        inner.candidates.remove(&file_id);
        if inner.cleaning == Some(file_id) {
            inner.cleaning = None;
        }
    }

    /// Serializes the per-vlog counters as repeated 8-byte tokens
    /// `(count << 32) | file_id`, the counter saturating at `u32::MAX`.
    pub fn serialize(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(inner.vlogs.len() * 8);
        for (file_id, info) in &inner.vlogs {
            let count = info.stale_count.min(u32::MAX as u64);
            let token = (count << 32) | *file_id as u64;
            out.extend_from_slice(&token.to_le_bytes());
        }
        out
    }

    /// Restores counters from a [`serialize`](Self::serialize) image.
    /// Tokens for vlogs that are no longer registered are skipped (deleted
    /// since the image was taken); the candidate set is re-derived.
    pub fn deserialize(&self, data: &[u8]) -> Result<()> {
        if data.len() % 8 != 0 {
            return Err(Error::Corruption(format!(
                "vlog counter image of {} bytes is not a token multiple",
                data.len()
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        let now = inner.now;
        for token in data.chunks_exact(8) {
            let code = u64::from_le_bytes(token.try_into().unwrap());
            let file_id = (code & 0xffff_ffff) as u32;
            let count = code >> 32;
            if let Some(info) = inner.vlogs.get_mut(&file_id) {
                info.stale_count = count;
                if count >= self.clean_threshold && file_id != now {
                    inner.candidates.insert(file_id);
                }
            }
        }
        Ok(())
    }

    /// After restart, records that GC was mid-pass on `file_id` and had
    /// reclaimed up to `tail`: the reader's clean position is set and the
    /// vlog goes back to being the one under cleaning.
    pub fn recover(&self, file_id: u32, tail: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(info) = inner.vlogs.get(&file_id) {
            debug_assert!(info.stale_count >= self.clean_threshold);
            info.reader.set_clean_pos(tail);
            inner.cleaning = Some(file_id);
        }
    }

    /// Claims the process-wide GC slot. Returns false if a collection is
    /// already running.
    pub fn try_begin_gc(&self) -> bool {
        self.gc_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_gc(&self) {
        self.gc_in_progress.store(false, Ordering::SeqCst);
    }
}
