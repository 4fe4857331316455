//! Output staging buffer.
//!
//! Formatted bytes are coalesced here before the multiplexer hands them to
//! its transport endpoints. The buffer drains through the sink whenever a
//! newline lands in it or the staging area fills, so interactive output is
//! line-paced without a syscall per byte.

use bytes::BytesMut;
use memchr::memchr;

/// Staging capacity; also the per-iteration copy bound of the write loop.
pub(crate) const BATCH_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct OutputBatcher {
    buf: BytesMut,
}

impl OutputBatcher {
    pub(crate) fn new() -> Self {
        Self { buf: BytesMut::with_capacity(BATCH_CAPACITY) }
    }

    pub(crate) fn capacity(&self) -> usize {
        BATCH_CAPACITY
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Hand everything staged to the sink.
    pub(crate) fn flush(&mut self, sink: &mut dyn FnMut(&[u8])) {
        if !self.buf.is_empty() {
            sink(&self.buf);
            self.buf.clear();
        }
    }

    /// Stage bytes, draining through `sink` at newline and capacity
    /// boundaries.
    pub(crate) fn push(&mut self, data: &[u8], sink: &mut dyn FnMut(&[u8])) {
        let mut data = data;
        while !data.is_empty() {
            let room = BATCH_CAPACITY - self.buf.len();
            if room == 0 {
                self.flush(sink);
                continue;
            }
            let take = data.len().min(room);
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            self.drain_line(sink);
            debug_assert!(self.len() <= BATCH_CAPACITY);
        }
    }

    /// Flush up to and including the first staged newline; later bytes stay
    /// staged for the next boundary.
    fn drain_line(&mut self, sink: &mut dyn FnMut(&[u8])) {
        if let Some(pos) = memchr(b'\n', &self.buf) {
            sink(&self.buf[..=pos]);
            let rest = self.buf.split_off(pos + 1);
            self.buf = rest;
        }
    }
}
