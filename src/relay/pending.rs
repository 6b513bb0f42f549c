//! Per-direction pending buffer

use std::num::NonZeroUsize;

/// Bytes read from a source and not yet accepted by the destination
///
/// Filled only when empty (one read at most `capacity` bytes), drained from
/// the front by as many partial writes as it takes.
#[derive(Debug)]
pub struct PendingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl PendingBuffer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            buf: vec![0; capacity.get()].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Bytes waiting to be written, oldest first
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.head..self.tail]
    }

    /// Refill the buffer with a single read
    ///
    /// `read` gets the whole buffer and returns how many bytes it stored.
    /// Must only be called while the buffer is empty.
    pub fn fill<E>(&mut self, read: impl FnOnce(&mut [u8]) -> Result<usize, E>) -> Result<usize, E> {
        debug_assert!(self.is_empty(), "refill before drain");
        self.head = 0;
        self.tail = 0;
        let n = read(&mut self.buf)?;
        self.tail = n.min(self.buf.len());
        Ok(self.tail)
    }

    /// Drop `n` bytes from the front after a (possibly partial) write
    pub fn consume(&mut self, n: usize) {
        self.head = (self.head + n).min(self.tail);
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_fill_and_drain() {
        let mut pending = PendingBuffer::new(capacity(8));
        assert!(pending.is_empty());
        assert_eq!(pending.capacity(), 8);

        let n = pending
            .fill(|buf| -> Result<usize, ()> {
                assert_eq!(buf.len(), 8);
                buf[..5].copy_from_slice(b"hello");
                Ok(5)
            })
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(pending.as_slice(), b"hello");

        pending.consume(2);
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.as_slice(), b"llo");

        pending.consume(3);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_partial_writes_preserve_order() {
        let mut pending = PendingBuffer::new(capacity(16));
        pending
            .fill(|buf| -> Result<usize, ()> {
                buf[..10].copy_from_slice(b"0123456789");
                Ok(10)
            })
            .unwrap();

        let mut written = Vec::new();
        while !pending.is_empty() {
            // Destination accepts three bytes at a time
            let chunk = &pending.as_slice()[..pending.len().min(3)];
            written.extend_from_slice(chunk);
            let n = chunk.len();
            pending.consume(n);
        }
        assert_eq!(written, b"0123456789");
    }

    #[test]
    fn test_failed_fill_leaves_buffer_empty() {
        let mut pending = PendingBuffer::new(capacity(4));
        let res = pending.fill(|_| Err("boom"));
        assert_eq!(res, Err("boom"));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_over_consume_is_clamped() {
        let mut pending = PendingBuffer::new(capacity(4));
        pending.fill(|buf| -> Result<usize, ()> { buf[0] = 7; Ok(1) }).unwrap();
        pending.consume(10);
        assert!(pending.is_empty());
        assert_eq!(pending.len(), 0);
    }
}
