//! Error types for conmux.

use std::io;
use thiserror::Error;

/// Main error type for conmux operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport endpoint errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operator command errors
    #[error("{0}")]
    Command(#[from] CommandError),
}

/// Transport layer errors (display endpoints).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint refused further bytes and will not recover
    #[error("Endpoint closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Command console errors.
///
/// The `Display` rendering of each variant is exactly the message shown to the
/// operator. Commands that fail leave all channel and multiplexer state
/// unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Command name did not match any dispatch-table entry
    #[error("Unknown command '{name}'. Use 'help'.")]
    UnknownCommand { name: String },

    /// Channel lookup by `tag` or `tag:index` failed
    #[error("{cmd}: console '{name}' not found")]
    ConsoleNotFound { cmd: String, name: String },

    /// Too few arguments for the command
    #[error("{cmd}: invalid number of arguments (need {need}, got {got})")]
    ArgCount { cmd: String, need: usize, got: usize },

    /// An argument failed to parse
    #[error("Invalid argument '{0}'")]
    InvalidArgument(String),

    /// Usage hint for a malformed invocation
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// `-A`/`-B`/`-C` without a following count
    #[error("grep: Missing parameter for option '{0}'")]
    GrepMissingParam(char),

    /// Unrecognized grep option letter
    #[error("grep: Unknown option '{0}'")]
    GrepUnknownOption(char),
}

/// Result type alias using conmux's Error.
pub type Result<T> = std::result::Result<T, Error>;
