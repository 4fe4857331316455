//! Termios-like channel attributes.
//!
//! Producers own these and adjust them over the registration surface; the
//! cooked write path and the operator input path consult them on every byte.

use bitflags::bitflags;

bitflags! {
    /// Output translation flags, applied producer → display.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OutputFlags: u32 {
        /// Insert a carriage return before every newline.
        const ONLCR = 0o1;
        /// Translate carriage returns to newlines.
        const OCRNL = 0o2;
        /// Drop carriage returns entirely.
        const ONLRET = 0o4;
    }
}

bitflags! {
    /// Input translation flags, applied operator → producer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputFlags: u32 {
        /// Translate newlines to carriage returns.
        const INLCR = 0o1;
        /// Drop carriage returns entirely.
        const IGNCR = 0o2;
        /// Translate carriage returns to newlines.
        const ICRNL = 0o4;
    }
}

bitflags! {
    /// Local mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LocalFlags: u32 {
        /// Echo operator input back to the display. When clear, the producer
        /// runs its own echo discipline and cooked output is flushed eagerly.
        const ECHO = 0o1;
    }
}

/// The full attribute word set of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub output: OutputFlags,
    pub input: InputFlags,
    pub local: LocalFlags,
}

impl Default for Attributes {
    /// Sane cooked-terminal defaults: LF becomes CRLF on the way out, CR
    /// becomes LF on the way in, echo on.
    fn default() -> Self {
        Self {
            output: OutputFlags::ONLCR,
            input: InputFlags::ICRNL,
            local: LocalFlags::ECHO,
        }
    }
}

impl Attributes {
    /// Attribute set that passes every byte through untouched.
    pub fn raw() -> Self {
        Self {
            output: OutputFlags::empty(),
            input: InputFlags::empty(),
            local: LocalFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_cooked() {
        let a = Attributes::default();
        assert!(a.output.contains(OutputFlags::ONLCR));
        assert!(a.input.contains(InputFlags::ICRNL));
        assert!(a.local.contains(LocalFlags::ECHO));
    }

    #[test]
    fn test_raw_is_empty() {
        let a = Attributes::raw();
        assert_eq!(a.output.bits(), 0);
        assert_eq!(a.input.bits(), 0);
        assert_eq!(a.local.bits(), 0);
    }
}
