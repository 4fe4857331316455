//! Channels: named, independently buffered byte-stream endpoints.
//!
//! A channel owns one outbound and one inbound ring buffer, the attribute
//! flags that govern byte translation in both directions, and the lifecycle
//! flags the garbage-collection protocol consults. Display attachment is a
//! single back-reference to at most one multiplexer.

mod attrs;
pub mod ring;

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use chrono::Local;
use tokio::sync::Notify;

pub use attrs::{Attributes, InputFlags, LocalFlags, OutputFlags};

use crate::mux::MuxId;
use ring::RingBuffer;

/// ANSI color assigned to a channel's tagged output. `0` means uncolored;
/// otherwise the low three bits select the base color and bit 3 brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color(u8);

impl Color {
    pub const NONE: Color = Color(0);

    pub fn from_code(code: u8) -> Self {
        Color(code & 0xf)
    }

    /// Single-letter color name; uppercase selects the bright variant.
    pub fn from_name(name: char) -> Self {
        let (bright, base) = match name.to_ascii_lowercase() {
            'n' => (name.is_ascii_uppercase(), 0),
            'r' => (name.is_ascii_uppercase(), 1),
            'g' => (name.is_ascii_uppercase(), 2),
            'y' => (name.is_ascii_uppercase(), 3),
            'b' => (name.is_ascii_uppercase(), 4),
            'm' => (name.is_ascii_uppercase(), 5),
            'c' => (name.is_ascii_uppercase(), 6),
            'w' => (name.is_ascii_uppercase(), 7),
            _ => (false, 0),
        };
        Color(((bright as u8) << 3) | base)
    }

    pub fn is_set(&self) -> bool {
        self.0 != 0
    }

    pub fn base(&self) -> u8 {
        self.0 & 7
    }

    pub fn bright(&self) -> bool {
        self.0 & 8 != 0
    }
}

/// Status flags delivered with every producer-side read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatus {
    /// More inbound data (or a marker) is waiting after this read.
    pub pending: bool,
    /// This read landed on a break marker; no bytes accompany it.
    pub break_seen: bool,
}

/// A named, colored, addressable byte-stream endpoint.
#[derive(Debug)]
pub struct Channel {
    tag: String,
    idx: u32,
    color: Color,
    key: Option<char>,
    keep: bool,
    dead: bool,
    timestamp: bool,
    preempted: bool,
    at_line_start: bool,
    attached: Option<MuxId>,
    attrs: Attributes,
    /// Outbound: producer → displays.
    wbuf: RingBuffer,
    /// Inbound: operator → producer.
    rbuf: RingBuffer,
    notify: Arc<Notify>,
}

impl Channel {
    pub fn new(tag: &str, color: Color, obuf_size: usize, ibuf_size: usize, key: Option<char>) -> Self {
        Self {
            tag: tag.to_string(),
            idx: 0,
            color,
            key,
            keep: false,
            dead: false,
            timestamp: false,
            preempted: false,
            at_line_start: true,
            attached: None,
            attrs: Attributes::default(),
            wbuf: RingBuffer::new(obuf_size),
            rbuf: RingBuffer::new(ibuf_size),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Disambiguation index among channels sharing a tag; 0 for the first.
    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub(crate) fn set_idx(&mut self, idx: u32) {
        self.idx = idx;
    }

    /// `tag` or `tag:idx` as shown in listings and accepted by lookups.
    pub fn display_name(&self) -> String {
        if self.idx == 0 {
            self.tag.clone()
        } else {
            format!("{}:{}", self.tag, self.idx)
        }
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn key(&self) -> Option<char> {
        self.key
    }

    pub fn set_key(&mut self, key: Option<char>) {
        self.key = key;
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn dead(&self) -> bool {
        self.dead
    }

    pub fn timestamp(&self) -> bool {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, ts: bool) {
        self.timestamp = ts;
    }

    /// The producer vanished. Returns whether immediate deletion is permitted
    /// (it is not while the channel is pinned with `keep`).
    pub fn mark_gone(&mut self) -> bool {
        self.dead = true;
        !self.keep
    }

    pub fn line_preempted(&self) -> bool {
        self.preempted
    }

    pub(crate) fn preempt_line(&mut self) {
        self.preempted = true;
    }

    pub(crate) fn line_done(&mut self) {
        self.preempted = false;
    }

    /// The multiplexer currently displaying this channel, if any.
    pub fn attached(&self) -> Option<MuxId> {
        self.attached
    }

    pub(crate) fn attach(&mut self, mux: Option<MuxId>) {
        self.attached = mux;
    }

    pub fn attrs(&self) -> Attributes {
        self.attrs
    }

    pub fn set_attrs(&mut self, attrs: Attributes) {
        self.attrs = attrs;
    }

    pub fn echo(&self) -> bool {
        self.attrs.local.contains(LocalFlags::ECHO)
    }

    pub fn wbuf(&self) -> &RingBuffer {
        &self.wbuf
    }

    /// Raw outbound buffer access, bypassing the cooked translation path.
    pub fn wbuf_mut(&mut self) -> &mut RingBuffer {
        &mut self.wbuf
    }

    pub fn rbuf(&self) -> &RingBuffer {
        &self.rbuf
    }

    pub(crate) fn rbuf_mut(&mut self) -> &mut RingBuffer {
        &mut self.rbuf
    }

    /// Wake object for the channel's producer; cloned into handles.
    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Signal the producer that inbound data or a marker is ready.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Append producer output to the outbound buffer with timestamping and
    /// output translation applied per byte. Returns how many bytes were
    /// actually appended (the newly written range for display forwarding).
    pub fn cooked_append(&mut self, data: &[u8]) -> usize {
        let mut staged = BytesMut::with_capacity(data.len() + 16);
        let mut at_start = self.at_line_start;

        for &b in data {
            if at_start && self.timestamp {
                let stamp = Local::now().format("[%d %b %y %H:%M:%S] ").to_string();
                staged.extend_from_slice(stamp.as_bytes());
                at_start = false;
            }

            if b == b'\n' && self.attrs.output.contains(OutputFlags::ONLCR) {
                staged.put_u8(b'\r');
                staged.put_u8(b'\n');
            } else if b == b'\r' && self.attrs.output.contains(OutputFlags::OCRNL) {
                staged.put_u8(b'\n');
            } else if b == b'\r' && self.attrs.output.contains(OutputFlags::ONLRET) {
                // suppressed
            } else {
                staged.put_u8(b);
            }

            if let Some(&last) = staged.last() {
                at_start = last == b'\n';
            }
        }

        self.at_line_start = at_start;
        self.wbuf.put_all(&staged);
        staged.len()
    }

    /// Producer-side read from the inbound buffer.
    ///
    /// Delivery stops exactly at a marker boundary: a read that begins on a
    /// marker consumes it and returns zero bytes with `break_seen` set, so the
    /// caller always observes the marker as a read of its own.
    pub fn read(&mut self, out: &mut [u8]) -> (usize, ReadStatus) {
        if self.rbuf.next_is_marker(0) {
            self.rbuf.consume_marker();
            let pending = self.rbuf.distance() > 0 || self.rbuf.next_is_marker(0);
            return (0, ReadStatus { pending, break_seen: true });
        }

        let limit = self.rbuf.next_marker_offset().unwrap_or(usize::MAX);
        let mut n = 0;
        while n < out.len() && n < limit {
            let Some(run) = self.rbuf.get(n) else { break };
            let take = run.len().min(out.len() - n).min(limit - n);
            out[n..n + take].copy_from_slice(&run[..take]);
            n += take;
            if take < run.len() {
                break;
            }
        }
        self.rbuf.clear(n);

        let pending = self.rbuf.distance() > 0 || self.rbuf.next_is_marker(0);
        (n, ReadStatus { pending, break_seen: false })
    }
}
