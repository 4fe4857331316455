//! The console server: registry, multiplexers, and lifecycle protocol.
//!
//! One `ConsoleServer` owns every channel and every display multiplexer and
//! is driven synchronously from the host's event loop: producer writes,
//! operator input and collection sweeps all mutate state inside the calling
//! context, so no internal locking exists. Suspension happens only at the
//! transport boundary.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Notify;

use crate::channel::{Attributes, Channel, Color, ReadStatus};
use crate::config::Config;
use crate::console;
use crate::error::{Error, Result};
use crate::mux::{ChanKey, Mux, MuxId};
use crate::registry::{ChannelId, Registry};
use crate::transport::TransportEndpoint;

/// Registration parameters for one channel.
///
/// Unset fields fall back to the server's [`Config`] defaults.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub tag: String,
    pub color: Color,
    pub obuf_size: Option<usize>,
    pub ibuf_size: Option<usize>,
    pub key: Option<char>,
    pub show: Option<bool>,
    pub keep: Option<bool>,
}

impl ChannelOptions {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            color: Color::NONE,
            obuf_size: None,
            ibuf_size: None,
            key: None,
            show: None,
            keep: None,
        }
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn obuf_size(mut self, size: usize) -> Self {
        self.obuf_size = Some(size);
        self
    }

    pub fn ibuf_size(mut self, size: usize) -> Self {
        self.ibuf_size = Some(size);
        self
    }

    pub fn key(mut self, key: char) -> Self {
        self.key = Some(key);
        self
    }

    pub fn show(mut self, show: bool) -> Self {
        self.show = Some(show);
        self
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = Some(keep);
        self
    }
}

/// Producer-side handle returned by registration: the stable channel id plus
/// the wake object signalled when inbound data or a break marker is ready.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    notify: Arc<Notify>,
}

impl ChannelHandle {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Wake object; `notified().await` (or a blocking wrapper) parks the
    /// producer until [`Channel::trigger`] fires.
    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

/// Channel registry plus display multiplexers under one roof.
pub struct ConsoleServer {
    pub(crate) config: Config,
    pub(crate) registry: Registry,
    pub(crate) muxes: Vec<Mux>,
}

impl ConsoleServer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Registry::new(),
            muxes: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Add a display multiplexer named `name`.
    pub fn add_mux(&mut self, name: &str) -> MuxId {
        self.muxes.push(Mux::new(name, &self.config));
        MuxId(self.muxes.len() - 1)
    }

    pub fn mux(&self, m: MuxId) -> &Mux {
        &self.muxes[m.0]
    }

    pub fn mux_count(&self) -> usize {
        self.muxes.len()
    }

    /// Channels with this tag connect automatically on mux `m` at
    /// registration.
    pub fn add_auto_connect(&mut self, m: MuxId, tag: &str) {
        self.muxes[m.0].auto_connect.insert(tag.to_string());
    }

    /// Attach a display endpoint; draws the prompt on it unless a channel
    /// holds the exclusive connection.
    pub fn add_transport(&mut self, m: MuxId, ep: Box<dyn TransportEndpoint>) {
        self.muxes[m.0].add_endpoint(ep);
        if !self.muxes[m.0].is_connected() {
            let (mux, reg) = self.mux_reg(m);
            mux.prompt(reg);
        }
    }

    /// Move staged output onto the wire; transports call this after they have
    /// delivered input or when they are ready to transmit.
    pub fn flush_output(&mut self, m: MuxId) {
        self.muxes[m.0].flush();
    }

    pub(crate) fn mux_reg(&mut self, m: MuxId) -> (&mut Mux, &mut Registry) {
        (&mut self.muxes[m.0], &mut self.registry)
    }

    pub(crate) fn mux_print(&mut self, m: MuxId, text: &str) {
        let (mux, reg) = self.mux_reg(m);
        mux.print(reg, text);
    }

    pub(crate) fn mux_raw(&mut self, m: MuxId, bytes: &[u8]) {
        let (mux, reg) = self.mux_reg(m);
        mux.raw(reg, bytes);
    }

    /// Broadcast a system message to every multiplexer, redrawing prompts on
    /// the unconnected ones.
    pub fn sys_msg(&mut self, msg: &str) {
        for i in 0..self.muxes.len() {
            let m = MuxId(i);
            {
                let (mux, reg) = self.mux_reg(m);
                mux.print(reg, &format!("\n{msg}"));
                mux.flush();
            }
            if !self.muxes[i].is_connected() {
                let (mux, reg) = self.mux_reg(m);
                mux.prompt(reg);
            }
        }
    }

    /// Register a channel, applying configured defaults, enforcing tag
    /// disambiguation, and announcing duplicates (non-fatal).
    pub fn create_channel(&mut self, opts: ChannelOptions) -> ChannelHandle {
        let tag = if opts.tag.is_empty() { "<noname>".to_string() } else { opts.tag.clone() };

        if let Some(k) = opts.key {
            if self.registry.find_by_key(k).is_some() {
                warn!("multiple channels bound to key '{k}'");
                self.sys_msg(&format!("WARNING: multiple channels with key '{k}'\n"));
            }
        }
        if self.registry.find_by_tag(&tag).is_some() {
            warn!("multiple channels with tag '{tag}'");
            self.sys_msg(&format!("WARNING: multiple channels with tag '{tag}'\n"));
        }

        let mut chan = Channel::new(
            &tag,
            opts.color,
            opts.obuf_size.unwrap_or(self.config.default_obuf_size),
            opts.ibuf_size.unwrap_or(self.config.default_ibuf_size),
            opts.key,
        );
        chan.set_keep(opts.keep.unwrap_or(self.config.default_keep));
        let notify = chan.notify();
        let id = self.registry.insert(chan);

        let name = self
            .registry
            .get(id)
            .map(Channel::display_name)
            .unwrap_or_default();
        debug!("created channel {name}");
        self.sys_msg(&format!("Created channel: {name}\n"));

        if opts.show.unwrap_or(self.config.default_show_all) && !self.muxes.is_empty() {
            self.show(MuxId(0), id);
        }

        for i in 0..self.muxes.len() {
            if self.muxes[i].auto_connect.contains(&tag) {
                self.connect(MuxId(i), id);
                break;
            }
        }

        ChannelHandle { id, notify }
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.registry.get(id)
    }

    /// Lookup by `tag` or `tag:index`.
    pub fn find_channel(&self, name: &str) -> Option<ChannelId> {
        self.registry.find_by_name(name)
    }

    /// Producer write entry point (cooked path). Returns the accepted length;
    /// a channel id that is not (or no longer) registered is tolerated as a
    /// successful no-op so producers may race registration.
    pub fn channel_write(&mut self, id: ChannelId, data: &[u8]) -> usize {
        let Some(chan) = self.registry.get_mut(id) else {
            return data.len();
        };
        let appended = chan.cooked_append(data);
        let attached = chan.attached();
        let echo = chan.echo();

        if let Some(m) = attached {
            let mut fresh = Vec::with_capacity(appended);
            if let Some(chan) = self.registry.get(id) {
                chan.wbuf().copy_last(appended, &mut fresh);
            }
            let (mux, reg) = self.mux_reg(m);
            mux.write_from(reg, ChanKey::Chan(id), &fresh);
            if !echo {
                self.muxes[m.0].flush();
            }
        }
        data.len()
    }

    /// Producer read entry point; see [`Channel::read`] for the marker
    /// delivery contract.
    pub fn channel_read(&mut self, id: ChannelId, out: &mut [u8]) -> (usize, ReadStatus) {
        match self.registry.get_mut(id) {
            Some(c) => c.read(out),
            None => (0, ReadStatus::default()),
        }
    }

    pub fn channel_attrs(&self, id: ChannelId) -> Option<Attributes> {
        self.registry.get(id).map(|c| c.attrs())
    }

    pub fn set_channel_attrs(&mut self, id: ChannelId, attrs: Attributes) -> bool {
        match self.registry.get_mut(id) {
            Some(c) => {
                c.set_attrs(attrs);
                true
            }
            None => false,
        }
    }

    /// Run a command line as if typed at mux `m`'s prompt, returning the
    /// failure instead of printing it.
    pub fn execute_command(&mut self, m: MuxId, line: &str) -> Result<()> {
        console::try_execute(self, m, line.as_bytes()).map_err(Error::from)
    }

    /// Take the exclusive connection to `id` on mux `m`, replaying the last
    /// lines of its history for context.
    pub fn connect(&mut self, m: MuxId, id: ChannelId) {
        if self.registry.get(id).is_none() {
            return;
        }
        {
            let (mux, reg) = self.mux_reg(m);
            mux.dump(reg, id, Some(10), false);
        }
        self.muxes[m.0].last_output = Some(ChanKey::Chan(id));

        let prev = self.registry.get(id).and_then(Channel::attached);
        self.muxes[m.0].pre_connect = prev;
        if let Some(pm) = prev {
            self.disconnect(pm, id, false);
        }

        self.muxes[m.0].connected = ChanKey::Chan(id);
        if let Some(c) = self.registry.get_mut(id) {
            c.attach(Some(m));
        }
        debug!("mux {}: connected channel {:?}", self.muxes[m.0].name(), id);
    }

    /// Release the exclusive connection, restoring the channel's previous
    /// attachment. A no-op when `id` is not the connected channel of `m`.
    pub fn disconnect(&mut self, m: MuxId, id: ChannelId, show_prompt: bool) {
        if self.muxes[m.0].connected != ChanKey::Chan(id) {
            return;
        }
        self.muxes[m.0].connected = ChanKey::SelfChan;
        let prev = self.muxes[m.0].pre_connect.take();
        if let Some(c) = self.registry.get_mut(id) {
            c.attach(prev);
        }
        if show_prompt {
            let (mux, reg) = self.mux_reg(m);
            mux.prompt(reg);
        }
        debug!("mux {}: disconnected channel {:?}", self.muxes[m.0].name(), id);
    }

    /// Attach `id`'s output to mux `m` without taking exclusivity.
    pub fn show(&mut self, m: MuxId, id: ChannelId) {
        let Some(cur) = self.registry.get(id).map(Channel::attached) else {
            return;
        };
        if cur == Some(m) {
            return;
        }
        if let Some(other) = cur {
            self.disconnect(other, id, false);
        }
        if let Some(c) = self.registry.get_mut(id) {
            c.attach(Some(m));
        }
    }

    /// Detach `id` from whichever multiplexer displays it.
    pub fn hide(&mut self, id: ChannelId) {
        let Some(Some(cur)) = self.registry.get(id).map(Channel::attached) else {
            return;
        };
        self.disconnect(cur, id, false);
        if let Some(c) = self.registry.get_mut(id) {
            c.attach(None);
        }
    }

    pub(crate) fn cat(&mut self, m: MuxId, id: ChannelId) {
        let (mux, reg) = self.mux_reg(m);
        mux.dump(reg, id, None, true);
    }

    pub(crate) fn tail(&mut self, m: MuxId, id: ChannelId, numlines: usize) {
        let (mux, reg) = self.mux_reg(m);
        mux.dump(reg, id, Some(numlines), true);
    }

    /// Mark a channel's producer as gone. Returns whether immediate deletion
    /// is permitted (false while the channel is pinned).
    pub fn mark_gone(&mut self, id: ChannelId) -> bool {
        match self.registry.get_mut(id) {
            Some(c) => c.mark_gone(),
            None => true,
        }
    }

    /// Collection sweep: every channel whose producer `is_alive` denies is
    /// marked dead and, unless pinned, destroyed. Returns how many channels
    /// were destroyed.
    pub fn sweep<F>(&mut self, mut is_alive: F) -> usize
    where
        F: FnMut(ChannelId, &Channel) -> bool,
    {
        let mut removed = 0;
        for id in self.registry.ids() {
            let deletable = match self.registry.get_mut(id) {
                Some(c) => {
                    if is_alive(id, c) {
                        continue;
                    }
                    c.mark_gone()
                }
                None => continue,
            };
            if deletable {
                self.destroy_channel(id);
                removed += 1;
            }
        }
        removed
    }

    /// Destroy a channel now, detaching it from every multiplexer first so no
    /// routing state dangles.
    pub fn destroy_channel(&mut self, id: ChannelId) {
        for i in 0..self.muxes.len() {
            if self.muxes[i].connected == ChanKey::Chan(id) {
                self.disconnect(MuxId(i), id, true);
            }
            if self.muxes[i].last_output == Some(ChanKey::Chan(id)) {
                self.muxes[i].last_output = None;
            }
        }
        if let Some(c) = self.registry.remove(id) {
            debug!("destroyed channel {}", c.display_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryEndpoint;

    fn fixture() -> (ConsoleServer, MuxId, MemoryEndpoint) {
        let mut server = ConsoleServer::new(Config::default());
        let m = server.add_mux("cons");
        let ep = MemoryEndpoint::new();
        server.add_transport(m, Box::new(ep.clone()));
        ep.take();
        (server, m, ep)
    }

    #[test]
    fn test_connect_is_exclusive_across_muxes() {
        let (mut server, m0, _ep) = fixture();
        let m1 = server.add_mux("aux");
        let h = server.create_channel(ChannelOptions::new("app"));

        server.connect(m0, h.id());
        assert_eq!(server.channel(h.id()).unwrap().attached(), Some(m0));
        assert_eq!(server.mux(m0).connected_channel(), Some(h.id()));
        assert_eq!(server.mux(m1).connected_channel(), None);

        // a second mux taking the connection steals it
        server.connect(m1, h.id());
        assert_eq!(server.channel(h.id()).unwrap().attached(), Some(m1));
        assert_eq!(server.mux(m1).connected_channel(), Some(h.id()));
        assert_eq!(server.mux(m0).connected_channel(), None);
    }

    #[test]
    fn test_disconnect_restores_previous_attachment() {
        let (mut server, m, _ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.show(m, h.id());
        server.connect(m, h.id());
        server.disconnect(m, h.id(), false);
        // the channel returns to plain shown state on the same mux
        assert_eq!(server.channel(h.id()).unwrap().attached(), Some(m));
        assert!(!server.mux(m).is_connected());
    }

    #[test]
    fn test_connect_replays_recent_history() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.channel_write(h.id(), b"old line\n");
        ep.take();

        server.connect(m, h.id());
        server.flush_output(m);
        let out = String::from_utf8_lossy(&ep.take()).into_owned();
        assert!(out.contains("old line"), "got {out:?}");
    }

    #[test]
    fn test_channel_write_routes_to_attached_mux() {
        let (mut server, m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app").show(true));
        ep.take();

        server.channel_write(h.id(), b"hello\n");
        server.flush_output(m);
        let out = String::from_utf8_lossy(&ep.take()).into_owned();
        assert!(out.contains("app     | hello"), "got {out:?}");
    }

    #[test]
    fn test_hidden_channel_produces_no_output() {
        let (mut server, _m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        ep.take();
        server.channel_write(h.id(), b"quiet\n");
        assert!(!String::from_utf8_lossy(&ep.take()).contains("quiet"));
    }

    #[test]
    fn test_write_without_echo_flushes_eagerly() {
        let (mut server, _m, ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app").show(true));
        let mut attrs = server.channel_attrs(h.id()).unwrap();
        attrs.local = crate::channel::LocalFlags::empty();
        server.set_channel_attrs(h.id(), attrs);
        ep.take();

        // no explicit flush: the canonical-mode write path flushes itself
        server.channel_write(h.id(), b"imm");
        let out = String::from_utf8_lossy(&ep.take()).into_owned();
        assert!(out.contains("imm"), "got {out:?}");
    }

    #[test]
    fn test_stale_channel_write_is_a_noop() {
        let (mut server, _m, _ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.destroy_channel(h.id());
        assert_eq!(server.channel_write(h.id(), b"late"), 4);
        assert_eq!(server.channel_read(h.id(), &mut [0; 8]), (0, ReadStatus::default()));
    }

    #[test]
    fn test_default_show_all_attaches_new_channels() {
        let mut config = Config::default();
        config.default_show_all = true;
        let mut server = ConsoleServer::new(config);
        let m = server.add_mux("cons");
        let h = server.create_channel(ChannelOptions::new("app"));
        assert_eq!(server.channel(h.id()).unwrap().attached(), Some(m));
    }

    #[test]
    fn test_auto_connect_on_registration() {
        let (mut server, m, _ep) = fixture();
        server.add_auto_connect(m, "boot");
        let h = server.create_channel(ChannelOptions::new("boot"));
        assert_eq!(server.mux(m).connected_channel(), Some(h.id()));
    }

    #[test]
    fn test_sweep_destroys_unpinned_dead_channels() {
        let (mut server, _m, _ep) = fixture();
        let a = server.create_channel(ChannelOptions::new("a"));
        let b = server.create_channel(ChannelOptions::new("b").keep(true));
        let dead = [a.id(), b.id()];

        let removed = server.sweep(|id, _| !dead.contains(&id));
        assert_eq!(removed, 1);
        assert!(server.channel(a.id()).is_none());
        // pinned channel survives as dead until dropped
        let surviving = server.channel(b.id()).unwrap();
        assert!(surviving.dead());

        // releasing the pin makes a later sweep reap it
        server.registry.get_mut(b.id()).unwrap().set_keep(false);
        let removed = server.sweep(|id, _| !dead.contains(&id));
        assert_eq!(removed, 1);
        assert!(server.channel(b.id()).is_none());
    }

    #[test]
    fn test_destroying_connected_channel_detaches_cleanly() {
        let (mut server, m, _ep) = fixture();
        let h = server.create_channel(ChannelOptions::new("app"));
        server.connect(m, h.id());
        server.destroy_channel(h.id());
        assert!(!server.mux(m).is_connected());
        assert!(server.channel(h.id()).is_none());
    }

    #[test]
    fn test_duplicate_tag_announced_but_registered() {
        let (mut server, _m, ep) = fixture();
        server.create_channel(ChannelOptions::new("app"));
        ep.take();
        let h = server.create_channel(ChannelOptions::new("app"));
        let out = String::from_utf8_lossy(&ep.take()).into_owned();
        assert!(out.contains("WARNING: multiple channels with tag 'app'"), "got {out:?}");
        assert_eq!(server.channel(h.id()).unwrap().idx(), 1);
    }

    #[test]
    fn test_execute_command_returns_error() {
        let (mut server, m, _ep) = fixture();
        let err = server.execute_command(m, "cat ghost").unwrap_err();
        assert!(err.to_string().contains("console 'ghost' not found"));
        assert!(server.execute_command(m, "list").is_ok());
    }
}
