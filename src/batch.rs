use bytes::{BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;

use crate::error::{Error, Result};

/// Size of the count header at the front of a serialized batch.
const BATCH_HEADER_SIZE: usize = 4;

const KIND_DELETE: u8 = 0;
const KIND_PUT: u8 = 1;

/// An ordered set of put/delete operations, serialized as the payload of a
/// single vlog record.
///
/// Layout:
///
/// ```text
/// [count: u32 LE]
/// entry*: put    = [0x01][key_len varint][key][value_len varint][value]
///         delete = [0x00][key_len varint][key]
/// ```
///
/// The value bytes are the last field of a put entry, so the cursor position
/// after parsing an entry equals the end offset of its value. The garbage
/// collector's liveness check depends on that property.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: BytesMut,
    count: u32,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        let mut rep = BytesMut::with_capacity(64);
        rep.put_u32_le(0);
        Self { rep, count: 0 }
    }

    /// Queues an insert or overwrite of `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.rep.put_u8(KIND_PUT);
        self.put_varint(key.len() as u64);
        self.rep.put_slice(key);
        self.put_varint(value.len() as u64);
        self.rep.put_slice(value);
        self.bump_count();
    }

    /// Queues a deletion of `key`.
    pub fn delete(&mut self, key: &[u8]) {
        self.rep.put_u8(KIND_DELETE);
        self.put_varint(key.len() as u64);
        self.rep.put_slice(key);
        self.bump_count();
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Serialized size in bytes, header included.
    pub fn byte_size(&self) -> usize {
        self.rep.len()
    }

    pub fn clear(&mut self) {
        self.rep.truncate(BATCH_HEADER_SIZE);
        self.rep[..BATCH_HEADER_SIZE].fill(0);
        self.count = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.rep
    }

    pub fn into_bytes(self) -> Bytes {
        self.rep.freeze()
    }

    fn put_varint(&mut self, n: u64) {
        let mut buf = [0u8; 10];
        let used = n.encode_var(&mut buf);
        self.rep.put_slice(&buf[..used]);
    }

    fn bump_count(&mut self) {
        self.count += 1;
        self.rep[..BATCH_HEADER_SIZE].copy_from_slice(&self.count.to_le_bytes());
    }
}

/// One decoded batch entry.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchEntry<'a> {
    pub key: &'a [u8],
    /// `None` for deletions.
    pub value: Option<&'a [u8]>,
    /// Byte offset of the value within the serialized batch; equals
    /// `end_offset` for deletions.
    pub value_offset: usize,
    /// Cursor position just past this entry within the serialized batch.
    pub end_offset: usize,
}

/// Streaming decoder over a serialized batch payload.
pub struct BatchIter<'a> {
    payload: &'a [u8],
    pos: usize,
    remaining: u32,
}

impl<'a> BatchIter<'a> {
    pub fn new(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "batch payload of {} bytes is shorter than its header",
                payload.len()
            )));
        }
        let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Self {
            payload,
            pos: BATCH_HEADER_SIZE,
            remaining: count,
        })
    }

    fn read_varint(&mut self) -> Result<u64> {
        let (n, used) = u64::decode_var(&self.payload[self.pos..])
            .ok_or_else(|| Error::Corruption("truncated varint in batch entry".to_string()))?;
        self.pos += used;
        Ok(n)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.payload.len() - self.pos {
            return Err(Error::Corruption(format!(
                "batch entry of {} bytes overruns the {} remaining",
                len,
                self.payload.len() - self.pos
            )));
        }
        let slice = &self.payload[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn next_entry(&mut self) -> Result<BatchEntry<'a>> {
        if self.pos >= self.payload.len() {
            return Err(Error::Corruption(
                "batch count exceeds its serialized entries".to_string(),
            ));
        }
        let kind = self.payload[self.pos];
        self.pos += 1;

        let key_len = self.read_varint()? as usize;
        let key = self.read_slice(key_len)?;

        match kind {
            KIND_DELETE => Ok(BatchEntry {
                key,
                value: None,
                value_offset: self.pos,
                end_offset: self.pos,
            }),
            KIND_PUT => {
                let value_len = self.read_varint()? as usize;
                let value_offset = self.pos;
                let value = self.read_slice(value_len)?;
                Ok(BatchEntry {
                    key,
                    value: Some(value),
                    value_offset,
                    end_offset: self.pos,
                })
            }
            other => Err(Error::Corruption(format!(
                "unknown batch entry kind {other}"
            ))),
        }
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<BatchEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let entry = self.next_entry();
        if entry.is_err() {
            // Do not keep parsing past the first malformed entry
            self.remaining = 0;
        }
        Some(entry)
    }
}
