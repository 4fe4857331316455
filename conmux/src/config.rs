//! Server configuration.
//!
//! Registration-time defaults live in an explicit [`Config`] value threaded
//! through [`ConsoleServer`](crate::ConsoleServer) rather than in process-wide
//! state, so several servers with different policies can coexist.

use serde::{Deserialize, Serialize};

/// Tunable defaults for channel registration and display formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Outbound (producer → display) buffer capacity for channels that do not
    /// request an explicit size.
    pub default_obuf_size: usize,

    /// Inbound (operator → producer) buffer capacity for channels that do not
    /// request an explicit size.
    pub default_ibuf_size: usize,

    /// Attach newly registered channels to the first multiplexer.
    pub default_show_all: bool,

    /// Pin newly registered channels against garbage collection.
    pub default_keep: bool,

    /// Width of the tag column prefixed to shared display output.
    pub tag_width: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_obuf_size: 8192,
            default_ibuf_size: 512,
            default_show_all: false,
            default_keep: false,
            tag_width: 8,
        }
    }
}
