use crate::batch::WriteBatch;
use crate::error::Result;
use crate::pointer::{TailPointer, ValuePointer};

/// Reserved index key holding the persisted GC resume point.
pub const TAIL_KEY: &[u8] = b"tail";

/// The slice of the LSM index the value log consumes.
///
/// The index owns the authoritative key -> pointer mapping and the durable
/// write path; the value log only asks it three things: what a key currently
/// points at, to re-insert live values through the normal write path, and to
/// persist GC progress under [`TAIL_KEY`].
pub trait Index: Send + Sync {
    /// Returns the current value pointer for `key` without dereferencing it
    /// into the vlog, or `None` if the key is absent or deleted.
    fn get_pointer(&self, key: &[u8]) -> Result<Option<ValuePointer>>;

    /// Durable put/delete path. Values land in the currently-appended vlog
    /// and fresh pointers are installed. May fail during shutdown.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Persists the GC resume point under the reserved tail key.
    fn put_tail(&self, tail: TailPointer) -> Result<()>;

    /// Whether the database has begun shutting down.
    fn is_shutdown(&self) -> bool;
}
