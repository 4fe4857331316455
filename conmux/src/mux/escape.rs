//! VT100 escape-sequence recognition for the prompt editor.
//!
//! Riding on `vte`'s state machine: after a literal ESC arrives in prompt
//! mode, subsequent bytes are fed to the parser until it dispatches (or a
//! control byte aborts the sequence). Recognized keys are currently accepted
//! and discarded; they are reserved for history and scrollback navigation.

use vte::{Params, Parser, Perform};

/// Key decoded from a completed CSI sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscKey {
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
}

#[derive(Default)]
struct EscCapture {
    done: bool,
    key: Option<EscKey>,
}

impl Perform for EscCapture {
    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        self.done = true;
        self.key = match action {
            'A' => Some(EscKey::Up),
            'B' => Some(EscKey::Down),
            'C' => Some(EscKey::Right),
            'D' => Some(EscKey::Left),
            // ESC [ 5 ~ / ESC [ 6 ~ with any modifier terminator
            '~' | '@' | '^' | '$' => match params.iter().next().and_then(|p| p.first().copied()) {
                Some(5) => Some(EscKey::PageUp),
                Some(6) => Some(EscKey::PageDown),
                _ => None,
            },
            _ => None,
        };
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {
        self.done = true;
    }

    fn execute(&mut self, _byte: u8) {
        // a C0 control mid-sequence abandons it
        self.done = true;
    }
}

/// Incremental recognizer for one escape sequence at a time.
pub(crate) struct EscDetector {
    parser: Parser,
    active: bool,
}

impl EscDetector {
    pub(crate) fn new() -> Self {
        Self { parser: Parser::new(), active: false }
    }

    pub(crate) fn active(&self) -> bool {
        self.active
    }

    /// Start a sequence; the leading ESC byte has just been consumed.
    pub(crate) fn begin(&mut self) {
        self.parser = Parser::new();
        let mut sink = EscCapture::default();
        self.parser.advance(&mut sink, &[0x1b]);
        self.active = true;
    }

    /// Feed the next byte. `Some(key)` when the sequence completed (with
    /// `None` inside for an unrecognized or aborted sequence); `None` while
    /// still mid-sequence.
    pub(crate) fn feed(&mut self, byte: u8) -> Option<Option<EscKey>> {
        let mut sink = EscCapture::default();
        self.parser.advance(&mut sink, &[byte]);
        if sink.done {
            self.active = false;
            Some(sink.key)
        } else {
            None
        }
    }
}
