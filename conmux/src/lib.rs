//! # conmux
//!
//! Multi-channel console multiplexer core.
//!
//! Many independent producers push byte streams into named **channels**; each
//! channel retains a bounded history in a circular buffer. One or more
//! display **multiplexers** fan the channel output to attached transports,
//! prefixing it with colored tags, while an operator either attaches
//! exclusively to one channel's raw stream or drives a command console over
//! the whole channel set: list, dump, tail, search, connect, hide, pin.
//!
//! ## Features
//!
//! - Overwrite-on-full ring buffers with cumulative statistics and in-band
//!   break markers
//! - Tagged, colored, interleaving-aware output routing with operator
//!   interruption of large floods
//! - Prompt-mode line editor with tab completion and a connected-mode hotkey
//!   table (disconnect, inject control bytes, switch channels)
//! - grep over circular buffer space with context, word, case, invert and
//!   count modes
//! - Mark-then-sweep channel collection that never invalidates routing state
//!   mid-callback
//!
//! ## Quick start
//!
//! ```rust
//! use conmux::{ChannelOptions, Config, ConsoleServer, MemoryEndpoint};
//!
//! let mut server = ConsoleServer::new(Config::default());
//! let mux = server.add_mux("cons");
//!
//! let display = MemoryEndpoint::new();
//! server.add_transport(mux, Box::new(display.clone()));
//!
//! let app = server.create_channel(ChannelOptions::new("app").show(true));
//! server.channel_write(app.id(), b"booting\n");
//! server.flush_output(mux);
//!
//! let seen = display.take();
//! assert!(String::from_utf8_lossy(&seen).contains("app     | booting"));
//! ```
//!
//! The core is synchronous and single-threaded per server; hosts own the
//! event loop and the concrete transports. Producers running elsewhere park
//! on a channel's wake handle ([`ChannelHandle::notify`]) until the operator
//! sends input or a break.

pub mod channel;
pub mod config;
mod console;
pub mod error;
pub mod mux;
pub mod registry;
pub mod server;
pub mod transport;

pub use channel::{
    Attributes, Channel, Color, InputFlags, LocalFlags, OutputFlags, ReadStatus,
};
pub use channel::ring::{RingBuffer, RingIndex};
pub use config::Config;
pub use error::{CommandError, Error, Result, TransportError};
pub use mux::{Mux, MuxId};
pub use registry::{ChannelId, Registry};
pub use server::{ChannelHandle, ChannelOptions, ConsoleServer};
pub use transport::{InputSource, MemoryEndpoint, OutputSink, TransportEndpoint};
