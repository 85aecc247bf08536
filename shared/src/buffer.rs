//! Fixed-capacity receive window used by every connection's read loop.
//!
//! The buffer is split into a readable head `[read_pos, write_pos)` holding
//! bytes that arrived but were not yet consumed as whole frames, and a
//! writable tail `[write_pos, capacity)` that the next socket read fills.
//! [`RecvBuffer::compact`] runs before every read so the tail is as large as
//! possible; a dangling partial frame is slid to offset zero untouched.

/// Byte window with independent read and write cursors.
#[derive(Debug)]
pub struct RecvBuffer {
    buffer: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl RecvBuffer {
    /// Creates a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes received but not yet consumed.
    pub fn data_size(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available for the next read.
    pub fn free_size(&self) -> usize {
        self.buffer.len() - self.write_pos
    }

    /// Returns true once a pending partial frame fills the whole window.
    ///
    /// A frame plus its backlog may never exceed capacity; hitting this is a
    /// protocol violation and the owning connection must be dropped.
    pub fn is_full(&self) -> bool {
        self.free_size() == 0
    }

    pub fn read_segment(&self) -> &[u8] {
        &self.buffer[self.read_pos..self.write_pos]
    }

    pub fn write_segment(&mut self) -> &mut [u8] {
        &mut self.buffer[self.write_pos..]
    }

    /// Advances the read cursor past `num_bytes` consumed bytes.
    ///
    /// Returns false (and leaves the cursor alone) if more bytes are claimed
    /// than are buffered.
    pub fn on_read(&mut self, num_bytes: usize) -> bool {
        if num_bytes > self.data_size() {
            return false;
        }
        self.read_pos += num_bytes;
        true
    }

    /// Advances the write cursor after a socket read of `num_bytes`.
    pub fn on_write(&mut self, num_bytes: usize) -> bool {
        if num_bytes > self.free_size() {
            return false;
        }
        self.write_pos += num_bytes;
        true
    }

    /// Reclaims consumed space at the front of the window.
    pub fn compact(&mut self) {
        let data_size = self.data_size();
        if data_size == 0 {
            self.read_pos = 0;
            self.write_pos = 0;
        } else if self.read_pos > 0 {
            self.buffer.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = data_size;
        }
    }
}
