//! Transport endpoint boundary.
//!
//! A [`TransportEndpoint`] is one display consumer attached to a multiplexer:
//! a serial line, a network connection, a pty, anything that can accept bytes
//! and report whether operator input is waiting. The core never blocks on an
//! endpoint; a short write simply ends that delivery attempt.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::warn;

use crate::error::TransportError;

/// Write half of a display consumer.
pub trait OutputSink {
    /// Push bytes toward the display. Returns the number of bytes accepted,
    /// which may be less than `bytes.len()`.
    fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;
}

/// Read-readiness half of a display consumer.
pub trait InputSource {
    /// True when the endpoint has operator input ready for delivery. Polled
    /// during large output floods so the operator can interrupt them.
    fn poll_input(&mut self) -> bool;
}

/// One display consumer attached to a multiplexer: anything implementing both
/// halves.
pub trait TransportEndpoint: OutputSink + InputSource {}

impl<T: OutputSink + InputSource> TransportEndpoint for T {}

/// Deliver `bytes` to every endpoint, looping per endpoint while bytes keep
/// being accepted. A zero-length acceptance or an error stops delivery to that
/// endpoint for this call only.
pub(crate) fn broadcast(endpoints: &mut [Box<dyn TransportEndpoint>], bytes: &[u8]) {
    for ep in endpoints.iter_mut() {
        let mut rest = bytes;
        while !rest.is_empty() {
            match ep.send(rest) {
                Ok(0) => break,
                Ok(n) => rest = &rest[n.min(rest.len())..],
                Err(e) => {
                    warn!("endpoint write failed: {e}");
                    break;
                }
            }
        }
    }
}

/// In-memory endpoint recording everything sent to it.
///
/// Clones share the same storage, so a host (or test) can keep one clone and
/// hand the other to [`ConsoleServer::add_transport`](crate::ConsoleServer::add_transport).
#[derive(Debug, Clone, Default)]
pub struct MemoryEndpoint {
    written: Rc<RefCell<Vec<u8>>>,
    input_ready: Rc<Cell<bool>>,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub fn contents(&self) -> Vec<u8> {
        self.written.borrow().clone()
    }

    /// Drain and return everything sent so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.written.borrow_mut())
    }

    /// Make `poll_input` report pending operator input.
    pub fn set_input_ready(&self, ready: bool) {
        self.input_ready.set(ready);
    }
}

impl OutputSink for MemoryEndpoint {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.written.borrow_mut().extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

impl InputSource for MemoryEndpoint {
    fn poll_input(&mut self) -> bool {
        self.input_ready.get()
    }
}
