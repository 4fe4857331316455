//! Operator input routing.
//!
//! Two top-level states per multiplexer: **connected** forwards bytes into
//! the exclusive channel's inbound buffer, **prompt** drives a line editor.
//! Both share the command-prefix hotkey table; prompt mode additionally runs
//! the escape-sequence recognizer and the command console.

use log::debug;

use crate::console;
use crate::mux::MuxId;
use crate::registry::ChannelId;
use crate::server::ConsoleServer;

/// The in-band command prefix byte (Ctrl-E).
pub(crate) const CMD_PREFIX: u8 = 0x05;

/// Echoed while waiting for the hotkey selector in connected mode.
const SEQ_STR: &[u8] = b"[Ctrl-E]";

/// Maximum command-line length.
pub(crate) const EDIT_CAPACITY: usize = 160;

/// Fixed-size prompt edit buffer.
#[derive(Debug, Default)]
pub(crate) struct EditBuffer {
    buf: Vec<u8>,
}

impl EditBuffer {
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Append one byte; refused (false) once the line is full.
    pub(crate) fn push(&mut self, b: u8) -> bool {
        if self.buf.len() >= EDIT_CAPACITY {
            return false;
        }
        self.buf.push(b);
        true
    }

    pub(crate) fn pop(&mut self) -> bool {
        self.buf.pop().is_some()
    }

    /// Take the whole line, leaving the buffer empty.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Replace `start..end` with `with`, refusing to exceed capacity.
    pub(crate) fn replace_range(&mut self, start: usize, end: usize, with: &[u8]) -> bool {
        let new_len = self.buf.len() - (end - start) + with.len();
        if new_len > EDIT_CAPACITY {
            return false;
        }
        self.buf.splice(start..end, with.iter().copied());
        true
    }
}

impl ConsoleServer {
    /// Operator input entry point for one multiplexer.
    pub fn input(&mut self, m: MuxId, buf: &[u8]) {
        if self.muxes[m.0].is_connected() {
            self.connected_input(m, buf);
        } else {
            self.prompt_input(m, buf);
        }
    }

    fn connected_input(&mut self, m: MuxId, buf: &[u8]) {
        let mut i = 0;
        while i < buf.len() {
            let Some(id) = self.muxes[m.0].connected_channel() else {
                // connection dissolved mid-buffer; the rest is prompt input
                self.prompt_input(m, &buf[i..]);
                return;
            };

            let c = buf[i];
            let mut do_trigger = false;

            if self.muxes[m.0].in_cmd_seq {
                self.muxes[m.0].in_cmd_seq = false;
                match c {
                    b'.' => {
                        self.disconnect(m, id, true);
                        self.prompt_input(m, &buf[i + 1..]);
                        return;
                    }
                    b'q' => {
                        self.clear_seq_echo(m, false);
                        do_trigger = self.inject(m, id, 0x1b);
                    }
                    b'e' => {
                        self.clear_seq_echo(m, false);
                        do_trigger = self.inject(m, id, CMD_PREFIX);
                    }
                    b'z' => {
                        self.clear_seq_echo(m, false);
                        do_trigger = self.inject(m, id, 0x1a);
                    }
                    b'c' => {
                        self.clear_seq_echo(m, false);
                        do_trigger = self.inject(m, id, 0x03);
                    }
                    b'l' => {
                        self.clear_seq_echo(m, true);
                        if let Some(ch) = self.registry.get_mut(id) {
                            do_trigger = ch.rbuf_mut().mark();
                        }
                        self.mux_raw(m, b"[Break]");
                        self.muxes[m.0].flush();
                    }
                    other => {
                        self.clear_seq_echo(m, true);
                        if self.global_hotkey(m, other) {
                            return;
                        }
                        do_trigger = self.inject(m, id, CMD_PREFIX);
                    }
                }
            } else if c == CMD_PREFIX {
                self.mux_raw(m, SEQ_STR);
                self.muxes[m.0].flush();
                self.muxes[m.0].in_cmd_seq = true;
            } else {
                do_trigger = self.inject(m, id, c);
            }

            if do_trigger {
                if let Some(ch) = self.registry.get(id) {
                    ch.trigger();
                }
            }
            i += 1;
        }
    }

    fn prompt_input(&mut self, m: MuxId, buf: &[u8]) {
        for (pos, &c) in buf.iter().enumerate() {
            if self.muxes[m.0].in_cmd_seq {
                self.muxes[m.0].in_cmd_seq = false;
                if self.global_hotkey(m, c) {
                    // now connected; the rest of the buffer belongs there
                    self.input(m, &buf[pos + 1..]);
                    return;
                }
            } else if self.muxes[m.0].esc.active() {
                if let Some(key) = self.muxes[m.0].esc.feed(c) {
                    // recognized keys are reserved for history/scrollback
                    debug!("mux {}: escape key {key:?} ignored", self.muxes[m.0].name());
                }
            } else {
                match c {
                    CMD_PREFIX => self.muxes[m.0].in_cmd_seq = true,
                    b'\t' => {
                        let cnt = console::complete::complete_line(self, m);
                        if cnt > 0 {
                            self.mux_raw(m, b"\r");
                            let (mux, reg) = self.mux_reg(m);
                            mux.prompt(reg);
                        }
                    }
                    0x0c => {
                        // Ctrl-L: clear screen, redraw
                        self.mux_print(m, "\x1b[H\x1b[2J");
                        let (mux, reg) = self.mux_reg(m);
                        mux.prompt(reg);
                    }
                    b'\n' => {}
                    b'\r' => {
                        self.mux_raw(m, b"\r\n");
                        let line = self.muxes[m.0].edit.take();
                        console::execute(self, m, &line);
                        if !self.muxes[m.0].is_connected() {
                            let (mux, reg) = self.mux_reg(m);
                            mux.prompt(reg);
                        }
                    }
                    0x7f => {
                        if !self.muxes[m.0].edit.is_empty() {
                            self.mux_raw(m, b"\x08 \x08");
                            self.muxes[m.0].edit.pop();
                        }
                    }
                    0x1b => self.muxes[m.0].esc.begin(),
                    _ => {
                        if self.muxes[m.0].edit.push(c) {
                            self.mux_raw(m, &[c]);
                        }
                    }
                }
            }
        }
    }

    /// Global hotkey table shared by both input states. Returns true when the
    /// key switched the exclusive connection.
    fn global_hotkey(&mut self, m: MuxId, key: u8) -> bool {
        match key {
            b'h' => {
                let current = self.muxes[m.0].connected_channel();
                for id in self.registry.ids() {
                    let on_this_mux =
                        self.registry.get(id).is_some_and(|c| c.attached() == Some(m));
                    if on_this_mux && Some(id) != current {
                        self.hide(id);
                    }
                }
                false
            }
            b's' => {
                for id in self.registry.ids() {
                    if self.registry.get(id).is_some_and(|c| c.attached().is_none()) {
                        self.show(m, id);
                    }
                }
                false
            }
            other => {
                let Some(id) = self.registry.find_by_key(other as char) else {
                    return false;
                };
                if self.muxes[m.0].connected_channel() == Some(id) {
                    return false;
                }
                if let Some(cur) = self.muxes[m.0].connected_channel() {
                    self.disconnect(m, cur, false);
                }
                let tag = self
                    .registry
                    .get(id)
                    .map(|c| c.tag().to_string())
                    .unwrap_or_default();
                self.mux_print(
                    m,
                    &format!("------------- Connecting to '{tag}' -------------\n"),
                );
                self.connect(m, id);
                true
            }
        }
    }

    /// Visually retract the echoed `[Ctrl-E]` marker: erase it when the
    /// selector consumed it, otherwise just back over it.
    fn clear_seq_echo(&mut self, m: MuxId, erase: bool) {
        for _ in 0..SEQ_STR.len() {
            self.mux_raw(m, if erase { b"\x08 \x08" } else { b"\x08" });
        }
        self.muxes[m.0].flush();
    }

    /// Translate one operator byte per the connected channel's input flags
    /// and append it to the inbound buffer, echoing locally if enabled.
    /// Returns whether the buffer went from empty to non-empty.
    fn inject(&mut self, m: MuxId, id: ChannelId, c: u8) -> bool {
        use crate::channel::InputFlags;

        let Some(ch) = self.registry.get_mut(id) else { return false };
        let flags = ch.attrs().input;
        let mut c = c;
        if flags.contains(InputFlags::INLCR) && c == b'\n' {
            c = b'\r';
        }
        if flags.contains(InputFlags::IGNCR) && c == b'\r' {
            return false;
        }
        if flags.contains(InputFlags::ICRNL) && c == b'\r' {
            c = b'\n';
        }
        let was_empty = ch.rbuf_mut().put(c);
        let echo = ch.echo();
        if echo {
            self.mux_raw(m, &[c]);
        }
        was_empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::ChannelOptions;
    use crate::transport::MemoryEndpoint;

    fn fixture() -> (ConsoleServer, MuxId, MemoryEndpoint) {
        let mut server = ConsoleServer::new(Config::default());
        let m = server.add_mux("cons");
        let ep = MemoryEndpoint::new();
        server.add_transport(m, Box::new(ep.clone()));
        ep.take();
        (server, m, ep)
    }

    fn typed(server: &mut ConsoleServer, m: MuxId, ep: &MemoryEndpoint, bytes: &[u8]) -> String {
        server.input(m, bytes);
        server.flush_output(m);
        String::from_utf8_lossy(&ep.take()).into_owned()
    }

    #[test]
    fn test_prompt_echoes_and_executes_on_cr() {
        let (mut server, m, ep) = fixture();
        let out = typed(&mut server, m, &ep, b"bogus\r");
        assert!(out.contains("bogus"), "echo missing: {out:?}");
        assert!(out.contains("Unknown command 'bogus'. Use 'help'."), "got {out:?}");
        // prompt redrawn with an empty edit buffer
        assert!(out.ends_with("cons> "), "got {out:?}");
        assert!(!server.mux(m).is_connected());
    }

    #[test]
    fn test_backspace_erases_visually_and_in_buffer() {
        let (mut server, m, ep) = fixture();
        typed(&mut server, m, &ep, b"ab");
        let out = typed(&mut server, m, &ep, &[0x7f]);
        assert!(out.contains("\x08 \x08"), "got {out:?}");
        assert_eq!(server.muxes[m.0].edit.bytes(), b"a");
        // backspace on an empty line does nothing
        typed(&mut server, m, &ep, &[0x7f]);
        let out = typed(&mut server, m, &ep, &[0x7f]);
        assert!(!out.contains("\x08"));
    }

    #[test]
    fn test_tab_completes_unique_command() {
        let (mut server, m, ep) = fixture();
        typed(&mut server, m, &ep, b"co");
        let out = typed(&mut server, m, &ep, b"\t");
        assert_eq!(server.muxes[m.0].edit.bytes(), b"connect ");
        // the prompt line is redrawn with the completed text
        assert!(out.contains("cons> connect "), "got {out:?}");
    }

    #[test]
    fn test_tab_lists_ambiguous_channel_names() {
        let (mut server, m, ep) = fixture();
        server.create_channel(ChannelOptions::new("app"));
        server.create_channel(ChannelOptions::new("apricot"));
        ep.take();
        typed(&mut server, m, &ep, b"connect a");
        let out = typed(&mut server, m, &ep, b"\t");
        assert!(out.contains("app"), "got {out:?}");
        assert!(out.contains("apricot"), "got {out:?}");
        assert_eq!(server.muxes[m.0].edit.bytes(), b"connect ap");
    }

    #[test]
    fn test_escape_sequences_do_not_reach_the_editor() {
        let (mut server, m, ep) = fixture();
        typed(&mut server, m, &ep, b"ls");
        typed(&mut server, m, &ep, b"\x1b[A\x1b[5~");
        assert_eq!(server.muxes[m.0].edit.bytes(), b"ls");
        let _ = ep.take();
    }

    #[test]
    fn test_connected_input_lands_in_inbound_buffer_with_echo() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.connect(m, h.id());
        ep.take();

        let out = typed(&mut server, m, &ep, b"hi\r");
        // ICRNL turns the CR into NL on the way in
        let mut buf = [0u8; 8];
        let (n, _) = server.channel_read(h.id(), &mut buf);
        assert_eq!(&buf[..n], b"hi\n");
        // local echo of the translated byte
        assert!(out.contains("hi\n"), "got {out:?}");
    }

    #[test]
    fn test_cmd_seq_dot_disconnects_to_prompt() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.connect(m, h.id());
        ep.take();

        let out = typed(&mut server, m, &ep, &[CMD_PREFIX, b'.']);
        assert!(!server.mux(m).is_connected());
        assert!(out.contains("[Ctrl-E]"), "got {out:?}");
        assert!(out.contains("cons> "), "got {out:?}");
        // leftover bytes after the hotkey go to the prompt editor
        server.connect(m, h.id());
        ep.take();
        typed(&mut server, m, &ep, &[CMD_PREFIX, b'.', b'l', b's']);
        assert_eq!(server.muxes[m.0].edit.bytes(), b"ls");
    }

    #[test]
    fn test_cmd_seq_injects_control_bytes() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.connect(m, h.id());
        ep.take();

        server.input(m, &[CMD_PREFIX, b'q', CMD_PREFIX, b'c', CMD_PREFIX, b'e']);
        let mut buf = [0u8; 8];
        let (n, _) = server.channel_read(h.id(), &mut buf);
        assert_eq!(&buf[..n], &[0x1b, 0x03, CMD_PREFIX]);
    }

    #[test]
    fn test_cmd_seq_break_records_marker_and_notice() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.connect(m, h.id());
        ep.take();

        let out = typed(&mut server, m, &ep, &[CMD_PREFIX, b'l']);
        assert!(out.contains("[Break]"), "got {out:?}");

        let mut buf = [0u8; 8];
        let (n, st) = server.channel_read(h.id(), &mut buf);
        assert_eq!(n, 0);
        assert!(st.break_seen);
    }

    #[test]
    fn test_hotkey_switches_connection_from_prompt() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app").key('x'));
        ep.take();

        let out = typed(&mut server, m, &ep, &[CMD_PREFIX, b'x']);
        assert_eq!(server.mux(m).connected_channel(), Some(h.id()));
        assert!(out.contains("Connecting to 'app'"), "got {out:?}");
    }

    #[test]
    fn test_hotkey_switches_connection_while_connected() {
        let (mut server, m, ep) = fixture();
        let a = server.create_channel(ChannelOptions::new("aa"));
        let b = server.create_channel(ChannelOptions::new("bb").key('b'));
        server.connect(m, a.id());
        ep.take();

        typed(&mut server, m, &ep, &[CMD_PREFIX, b'b']);
        assert_eq!(server.mux(m).connected_channel(), Some(b.id()));
        assert_eq!(server.channel(a.id()).unwrap().attached(), None);
    }

    #[test]
    fn test_hide_all_and_show_all_hotkeys() {
        let (mut server, m, ep) = fixture();
        let a = server.create_channel(ChannelOptions::new("aa").show(true));
        let b = server.create_channel(ChannelOptions::new("bb").show(true));
        ep.take();

        typed(&mut server, m, &ep, &[CMD_PREFIX, b'h']);
        assert_eq!(server.channel(a.id()).unwrap().attached(), None);
        assert_eq!(server.channel(b.id()).unwrap().attached(), None);

        typed(&mut server, m, &ep, &[CMD_PREFIX, b's']);
        assert_eq!(server.channel(a.id()).unwrap().attached(), Some(m));
        assert_eq!(server.channel(b.id()).unwrap().attached(), Some(m));
    }

    #[test]
    fn test_unbound_hotkey_injects_prefix_byte() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.connect(m, h.id());
        ep.take();

        server.input(m, &[CMD_PREFIX, b'7']);
        let mut buf = [0u8; 4];
        let (n, _) = server.channel_read(h.id(), &mut buf);
        assert_eq!(&buf[..n], &[CMD_PREFIX]);
    }

    #[test]
    fn test_edit_buffer_capacity() {
        let mut e = EditBuffer::default();
        for _ in 0..EDIT_CAPACITY {
            assert!(e.push(b'a'));
        }
        assert!(!e.push(b'b'));
        assert_eq!(e.len(), EDIT_CAPACITY);
    }

    #[test]
    fn test_edit_buffer_replace_range() {
        let mut e = EditBuffer::default();
        for &b in b"connect ap" {
            e.push(b);
        }
        assert!(e.replace_range(8, 10, b"app:1 "));
        assert_eq!(e.bytes(), b"connect app:1 ");
        assert!(!e.replace_range(0, 0, &[b'x'; EDIT_CAPACITY]));
    }

    #[test]
    fn test_edit_buffer_take_clears() {
        let mut e = EditBuffer::default();
        e.push(b'h');
        e.push(b'i');
        assert_eq!(e.take(), b"hi");
        assert!(e.is_empty());
    }
}
