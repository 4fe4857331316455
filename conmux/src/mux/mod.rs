//! Multiplexer core: routes channel output to attached displays.
//!
//! Each `Mux` is one display context: a set of transport endpoints, an output
//! batcher, the exclusive-connection state, and the prompt editor. Shared
//! output is prefixed with a fixed-width channel tag and optional color; the
//! exclusively connected channel streams through untouched. A pseudo-channel
//! owned by the mux itself carries prompt, command and system output so it
//! participates in the same tagging state machine as real channels.

pub(crate) mod batcher;
pub(crate) mod escape;
pub(crate) mod input;

use std::collections::HashSet;

use log::debug;
use memchr::memchr;

use crate::channel::{Channel, Color};
use crate::config::Config;
use crate::registry::{ChannelId, Registry};
use crate::transport::{TransportEndpoint, broadcast};
use batcher::OutputBatcher;
use escape::EscDetector;
use input::EditBuffer;

/// Index handle for one multiplexer owned by a
/// [`ConsoleServer`](crate::ConsoleServer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MuxId(pub(crate) usize);

/// Output attribution: a registered channel, or the mux's own pseudo-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChanKey {
    SelfChan,
    Chan(ChannelId),
}

/// Bytes processed between polls of the endpoints for pending operator input.
const INPUT_CHECK_INTERVAL: usize = 1500;

/// One display multiplexer.
pub struct Mux {
    name: String,
    /// Carries prompt, command and system output through the write path.
    self_chan: Channel,
    batcher: OutputBatcher,
    endpoints: Vec<Box<dyn TransportEndpoint>>,
    /// Exclusive connection; `SelfChan` means prompt mode.
    pub(crate) connected: ChanKey,
    /// Where the connected channel was attached before, for restoration.
    pub(crate) pre_connect: Option<MuxId>,
    /// Attribution of the last bytes written, for tag/color transitions.
    pub(crate) last_output: Option<ChanKey>,
    pub(crate) edit: EditBuffer,
    /// One-shot hotkey state: the next byte selects a hotkey action.
    pub(crate) in_cmd_seq: bool,
    pub(crate) esc: EscDetector,
    /// Tags this mux connects to automatically at registration.
    pub(crate) auto_connect: HashSet<String>,
    tag_width: usize,
}

struct LineState {
    tag: String,
    color: Color,
}

impl Mux {
    pub(crate) fn new(name: &str, config: &Config) -> Self {
        Self {
            name: name.to_string(),
            self_chan: Channel::new("CONS", Color::NONE, 512, 512, None),
            batcher: OutputBatcher::new(),
            endpoints: Vec::new(),
            connected: ChanKey::SelfChan,
            pre_connect: None,
            last_output: None,
            edit: EditBuffer::default(),
            in_cmd_seq: false,
            esc: EscDetector::new(),
            auto_connect: HashSet::new(),
            tag_width: config.tag_width,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when a channel holds the exclusive connection.
    pub fn is_connected(&self) -> bool {
        self.connected != ChanKey::SelfChan
    }

    /// The exclusively connected channel, if any.
    pub fn connected_channel(&self) -> Option<ChannelId> {
        match self.connected {
            ChanKey::Chan(id) => Some(id),
            ChanKey::SelfChan => None,
        }
    }

    pub(crate) fn add_endpoint(&mut self, ep: Box<dyn TransportEndpoint>) {
        self.endpoints.push(ep);
    }

    /// Drain staged output onto every endpoint.
    pub(crate) fn flush(&mut self) {
        let Self { batcher, endpoints, .. } = self;
        batcher.flush(&mut |b| broadcast(endpoints, b));
    }

    fn out_bytes(&mut self, data: &[u8]) {
        let Self { batcher, endpoints, .. } = self;
        batcher.push(data, &mut |b| broadcast(endpoints, b));
    }

    fn poll_endpoints_input(&mut self) -> bool {
        self.endpoints.iter_mut().any(|e| e.poll_input())
    }

    fn view(&self, reg: &Registry, key: ChanKey) -> Option<LineState> {
        let c = self.chan(reg, key)?;
        Some(LineState { tag: c.tag().to_string(), color: c.color() })
    }

    fn chan<'a>(&'a self, reg: &'a Registry, key: ChanKey) -> Option<&'a Channel> {
        match key {
            ChanKey::SelfChan => Some(&self.self_chan),
            ChanKey::Chan(id) => reg.get(id),
        }
    }

    fn is_preempted(&self, reg: &Registry, key: ChanKey) -> bool {
        self.chan(reg, key).is_some_and(|c| c.line_preempted())
    }

    fn set_preempted(&mut self, reg: &mut Registry, key: ChanKey, preempted: bool) {
        let c = match key {
            ChanKey::SelfChan => Some(&mut self.self_chan),
            ChanKey::Chan(id) => reg.get_mut(id),
        };
        if let Some(c) = c {
            if preempted {
                c.preempt_line();
            } else {
                c.line_done();
            }
        }
    }

    /// Route one channel's freshly produced bytes to the endpoints, cycling
    /// tag and color state as attribution changes. NUL terminates the write.
    ///
    /// Every ~1500 bytes the endpoints are polled for pending operator input;
    /// a large flood is abandoned with a visible notice so the operator can
    /// get a word in.
    pub(crate) fn write_from(&mut self, reg: &mut Registry, key: ChanKey, msg: &[u8]) {
        let Some(cur) = self.view(reg, key) else { return };
        let tagged = key != self.connected;

        // close the color of another channel's dangling line
        if let Some(prev) = self.last_output {
            if prev != key && tagged && self.is_preempted(reg, prev) {
                if self.view(reg, prev).is_some_and(|p| p.color.is_set()) {
                    self.out_bytes(b"\x1b[0m");
                }
            }
        }

        let mut msg = msg;
        let mut input_check = 0usize;
        while !msg.is_empty() && msg[0] != 0 {
            if self.last_output != Some(key) {
                if tagged && cur.color.is_set() {
                    let esc = if cur.color.bright() {
                        format!("\x1b[01;3{}m", cur.color.base())
                    } else {
                        format!("\x1b[3{}m", cur.color.base())
                    };
                    self.out_bytes(esc.as_bytes());
                } else {
                    self.out_bytes(b"\x1b[0m");
                }

                if self.last_output.is_some() {
                    self.out_bytes(b"\r\n");
                }

                if tagged {
                    let continuation = self.is_preempted(reg, key);
                    self.write_tag(&cur.tag, continuation);
                }
            }

            // copy up to the next newline, NUL, or staging-capacity boundary
            let scan = msg.len().min(self.batcher.capacity());
            let stop_nl = memchr(b'\n', &msg[..scan]).unwrap_or(usize::MAX);
            let stop_nul = memchr(0, &msg[..scan]).unwrap_or(usize::MAX);
            let i = scan.min(stop_nl).min(stop_nul);
            self.out_bytes(&msg[..i]);

            let mut advance = i;
            if i == stop_nl {
                if tagged && cur.color.is_set() {
                    self.out_bytes(b"\x1b[0m\n");
                } else {
                    self.out_bytes(b"\n");
                }
                self.set_preempted(reg, key, false);
                self.last_output = None;
                advance += 1;
            } else {
                self.last_output = Some(key);
                self.set_preempted(reg, key, true);
            }
            msg = &msg[advance..];

            input_check += advance;
            if input_check > INPUT_CHECK_INTERVAL {
                if self.poll_endpoints_input() {
                    self.out_bytes(b"[Got input, stopping output.]\n");
                    return;
                }
                input_check = 0;
            }
        }
    }

    /// Fixed-width tag field: `tag     | ` for a fresh line, `tag     : ` for
    /// the continuation of a preempted one.
    fn write_tag(&mut self, tag: &str, continuation: bool) {
        let width = self.tag_width;
        let shown: String = tag.chars().take(width).collect();
        let field = format!("{shown:<width$}");
        self.out_bytes(field.as_bytes());
        self.out_bytes(if continuation { b": " } else { b"| " });
    }

    /// Cooked write through the mux's own pseudo-channel: prompt, command
    /// replies and system messages all take this path.
    pub(crate) fn print(&mut self, reg: &mut Registry, text: &str) {
        self.print_bytes(reg, text.as_bytes());
    }

    pub(crate) fn print_bytes(&mut self, reg: &mut Registry, bytes: &[u8]) {
        let appended = self.self_chan.cooked_append(bytes);
        let mut fresh = Vec::with_capacity(appended);
        self.self_chan.wbuf().copy_last(appended, &mut fresh);
        self.write_from(reg, ChanKey::SelfChan, &fresh);
    }

    /// Raw write attributed to the connected channel (echo, erase sequences).
    pub(crate) fn raw(&mut self, reg: &mut Registry, bytes: &[u8]) {
        self.write_from(reg, self.connected, bytes);
    }

    /// Dump a channel's live history (`taillines == None`) or its last N
    /// lines through the pseudo-channel path, bypassing tag cycling.
    pub(crate) fn dump(
        &mut self,
        reg: &mut Registry,
        id: ChannelId,
        taillines: Option<usize>,
        add_nl: bool,
    ) {
        let (bytes, ends_open) = {
            let Some(chan) = reg.get(id) else { return };
            let b = chan.wbuf();
            let mut p = b.tail();
            if let Some(mut n) = taillines {
                p = b.head();
                while n > 0 {
                    n -= 1;
                    p = b.find_backward(b'\n', p);
                    if p == b.tail() {
                        break;
                    }
                }
                if p != b.head() && b[p] == b'\n' {
                    p = p.next();
                }
            }
            let mut bytes = Vec::new();
            b.copy_from(p, &mut bytes);
            let ends_open = !b.is_empty() && b[b.head().prev()] != b'\n';
            (bytes, ends_open)
        };

        self.write_from(reg, ChanKey::SelfChan, &bytes);
        self.flush();

        if add_nl && ends_open {
            self.write_from(reg, ChanKey::SelfChan, b"\r\n");
        }
    }

    /// Redraw the prompt line: `name> ` plus the current edit buffer.
    pub(crate) fn prompt(&mut self, reg: &mut Registry) {
        let mut line = Vec::with_capacity(self.name.len() + 2 + self.edit.len());
        line.extend_from_slice(self.name.as_bytes());
        line.extend_from_slice(b"> ");
        line.extend_from_slice(self.edit.bytes());
        self.print_bytes(reg, &line);
        debug!("mux {}: prompt redrawn", self.name);
    }
}
