//! Backing storage for event string data.
//!
//! A `SourceBuffer` is the arena owned by an event group. Strings copied into
//! it come back as immutable `Bytes` views into a shared chunk, so a group
//! full of small fields costs a handful of allocations rather than one per
//! field. Views are refcounted and keep their chunk alive on their own, which
//! makes the "view must not outlive the buffer" contract of the original
//! design structurally impossible to violate.

use bytes::{Bytes, BytesMut};

/// Granularity of the arena chunks. Allocations larger than this get a
/// dedicated chunk.
const CHUNK_SIZE: usize = 4096;

/// A chunked append-only arena for string data owned by one event group.
#[derive(Debug, Default)]
pub struct SourceBuffer {
    chunk: BytesMut,
}

impl SourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `data` into the arena and returns an immutable view of it.
    pub fn copy_string(&mut self, data: impl AsRef<[u8]>) -> Bytes {
        let data = data.as_ref();
        if self.chunk.capacity() - self.chunk.len() < data.len() {
            self.chunk = BytesMut::with_capacity(CHUNK_SIZE.max(data.len()));
        }
        self.chunk.extend_from_slice(data);
        self.chunk.split_to(data.len()).freeze()
    }

    /// Returns a writable region with capacity for at least `n` bytes.
    ///
    /// Callers fill the region and freeze it into a `Bytes` view, typically to
    /// build a composite value out of several pieces before attaching it to an
    /// event.
    pub fn allocate(&mut self, n: usize) -> BytesMut {
        BytesMut::with_capacity(n)
    }
}
