//! Operator command console.
//!
//! A fixed dispatch table maps command names to tagged actions and optional
//! completion behavior; the tokenizer and completion algorithm live in their
//! own modules, the search engine in [`grep`]. Failed commands print a
//! message and leave every channel and multiplexer untouched.

pub(crate) mod complete;
pub(crate) mod grep;
pub(crate) mod tokenize;

use log::debug;

use crate::error::CommandError;
use crate::mux::MuxId;
use crate::registry::ChannelId;
use crate::server::ConsoleServer;
use tokenize::{MAX_ARGS, Token, tokenize};

/// Action selector for one dispatch-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmdKind {
    Cat,
    Clear,
    Connect,
    Drop,
    Grep,
    Help,
    Hide,
    HideAll,
    Info,
    Keep,
    Key,
    Kick,
    List,
    Show,
    ShowAll,
    Tail,
    Timestamp,
}

/// Completion behavior for one dispatch-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completer {
    /// Complete a channel name in argument position 1.
    ConsoleArg1,
    /// Complete the channel argument of `grep` (second non-option token).
    GrepConsole,
}

/// One dispatch-table entry. Entries without help text are aliases and are
/// omitted from the help screen.
pub(crate) struct CmdEntry {
    pub(crate) name: &'static str,
    pub(crate) help: Option<&'static str>,
    pub(crate) kind: CmdKind,
    pub(crate) completer: Option<Completer>,
}

pub(crate) const COMMANDS: &[CmdEntry] = &[
    CmdEntry { name: "c", help: None, kind: CmdKind::Connect, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "cat", help: Some("Dump buffer of channel"), kind: CmdKind::Cat, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "clear", help: Some("Clear screen"), kind: CmdKind::Clear, completer: None },
    CmdEntry { name: "connect", help: Some("Connect to channel"), kind: CmdKind::Connect, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "drop", help: Some("Drop kept channel"), kind: CmdKind::Drop, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "grep", help: Some("Search for text"), kind: CmdKind::Grep, completer: Some(Completer::GrepConsole) },
    CmdEntry { name: "help", help: Some("Help screen"), kind: CmdKind::Help, completer: None },
    CmdEntry { name: "hide", help: Some("Hide channel output"), kind: CmdKind::Hide, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "hideall", help: Some("Hide all channels output"), kind: CmdKind::HideAll, completer: None },
    CmdEntry { name: "info", help: Some("Info screen"), kind: CmdKind::Info, completer: None },
    CmdEntry { name: "keep", help: Some("Keep channel from garbage collection"), kind: CmdKind::Keep, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "key", help: Some("Set key shortcut for channel"), kind: CmdKind::Key, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "kick", help: None, kind: CmdKind::Kick, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "list", help: Some("List channels"), kind: CmdKind::List, completer: None },
    CmdEntry { name: "ls", help: None, kind: CmdKind::List, completer: None },
    CmdEntry { name: "show", help: Some("Show channel output"), kind: CmdKind::Show, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "showall", help: Some("Show all channels output"), kind: CmdKind::ShowAll, completer: None },
    CmdEntry { name: "tail", help: Some("Show last lines of output"), kind: CmdKind::Tail, completer: Some(Completer::ConsoleArg1) },
    CmdEntry { name: "timestamp", help: Some("Prefix log with timestamp"), kind: CmdKind::Timestamp, completer: Some(Completer::ConsoleArg1) },
];

/// Execute one command line on mux `m`, printing any failure message.
pub(crate) fn execute(server: &mut ConsoleServer, m: MuxId, line: &[u8]) {
    if let Err(e) = try_execute(server, m, line) {
        server.mux_print(m, &format!("{e}\n"));
    }
}

/// Execute one command line, returning the failure instead of printing it.
pub(crate) fn try_execute(
    server: &mut ConsoleServer,
    m: MuxId,
    line: &[u8],
) -> Result<(), CommandError> {
    let args = tokenize(line, MAX_ARGS, false);
    let Some(first) = args.first() else { return Ok(()) };
    let name = first.text(line);

    let Some(entry) = COMMANDS.iter().find(|c| c.name.as_bytes() == name) else {
        return Err(CommandError::UnknownCommand {
            name: String::from_utf8_lossy(name).into_owned(),
        });
    };

    debug!("mux {}: command {}", server.muxes[m.0].name(), entry.name);
    run(server, m, entry.kind, line, &args)
}

fn run(
    server: &mut ConsoleServer,
    m: MuxId,
    kind: CmdKind,
    line: &[u8],
    args: &[Token],
) -> Result<(), CommandError> {
    match kind {
        CmdKind::Cat => {
            let id = lookup_channel(server, line, args, 1)?;
            server.cat(m, id);
        }
        CmdKind::Tail => {
            let id = lookup_channel(server, line, args, 1)?;
            let numlines = match args.get(2) {
                Some(t) => parse_number(t.text(line))?,
                None => 20,
            };
            server.tail(m, id, numlines);
        }
        CmdKind::Clear => server.mux_print(m, "\x1b[H\x1b[2J"),
        CmdKind::Connect => {
            let id = lookup_channel(server, line, args, 1)?;
            server.connect(m, id);
        }
        CmdKind::Show => {
            let id = lookup_channel(server, line, args, 1)?;
            server.show(m, id);
        }
        CmdKind::Hide => {
            let id = lookup_channel(server, line, args, 1)?;
            server.hide(id);
        }
        CmdKind::ShowAll => {
            for id in server.registry.ids() {
                if server.registry.get(id).is_some_and(|c| c.attached().is_none()) {
                    server.show(m, id);
                }
            }
        }
        CmdKind::HideAll => {
            for id in server.registry.ids() {
                if server.registry.get(id).is_some_and(|c| c.attached() == Some(m)) {
                    server.hide(id);
                }
            }
        }
        CmdKind::Keep => {
            let id = lookup_channel(server, line, args, 1)?;
            if let Some(c) = server.registry.get_mut(id) {
                c.set_keep(true);
            }
        }
        CmdKind::Drop => {
            let id = lookup_channel(server, line, args, 1)?;
            let dead = {
                let Some(c) = server.registry.get_mut(id) else { return Ok(()) };
                c.set_keep(false);
                c.dead()
            };
            if dead {
                server.destroy_channel(id);
            }
        }
        CmdKind::Key => {
            if args.len() < 3 {
                return Err(CommandError::Usage("key channel character"));
            }
            let id = lookup_channel(server, line, args, 1)?;
            let key = args[2].text(line)[0] as char;
            if let Some(c) = server.registry.get_mut(id) {
                c.set_key(Some(key));
            }
        }
        CmdKind::Kick => {
            let id = lookup_channel(server, line, args, 1)?;
            if let Some(c) = server.registry.get(id) {
                c.trigger();
            }
        }
        CmdKind::Timestamp => {
            let id = lookup_channel(server, line, args, 1)?;
            let on = args.get(2).map(|t| t.text(line)) != Some(b"off".as_slice());
            if let Some(c) = server.registry.get_mut(id) {
                c.set_timestamp(on);
            }
        }
        CmdKind::List => {
            let verbose = args
                .get(1)
                .is_some_and(|t| t.text(line).starts_with(b"-l"));
            cmd_list(server, m, verbose);
        }
        CmdKind::Info => {
            server.mux_print(m, &format!("conmux {} -- console multiplexer\n", env!("CARGO_PKG_VERSION")));
        }
        CmdKind::Help => cmd_help(server, m),
        CmdKind::Grep => grep::run(server, m, line, args)?,
    }
    Ok(())
}

/// Resolve the channel argument at `idx`, with the standard error messages.
fn lookup_channel(
    server: &ConsoleServer,
    line: &[u8],
    args: &[Token],
    idx: usize,
) -> Result<ChannelId, CommandError> {
    let cmd = String::from_utf8_lossy(args[0].text(line)).into_owned();
    if args.len() <= idx {
        return Err(CommandError::ArgCount { cmd, need: idx + 1, got: args.len() });
    }
    let name = String::from_utf8_lossy(args[idx].text(line)).into_owned();
    server
        .registry
        .find_by_name(&name)
        .ok_or(CommandError::ConsoleNotFound { cmd, name })
}

fn parse_number(text: &[u8]) -> Result<usize, CommandError> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CommandError::InvalidArgument(String::from_utf8_lossy(text).into_owned()))
}

fn cmd_list(server: &mut ConsoleServer, m: MuxId, verbose: bool) {
    let mut rows = Vec::new();
    for (_, c) in server.registry.iter() {
        let idxpart = if c.idx() > 0 { format!(":{}", c.idx()) } else { String::new() };
        let keypart = match c.key() {
            Some(k) => format!("({k})"),
            None => "   ".to_string(),
        };
        let muxname = c
            .attached()
            .map(|mid| server.muxes[mid.0].name().to_string())
            .unwrap_or_default();

        let mut row = format!(
            "{:>14}{} {} [{:>8}] out:{:>5}/{:>6} in:{:>5}/{:>5}{}",
            c.tag(),
            idxpart,
            keypart,
            muxname,
            c.wbuf().stat_lines(),
            c.wbuf().stat_bytes(),
            c.rbuf().stat_lines(),
            c.rbuf().stat_bytes(),
            if c.dead() { " [X]" } else { "" },
        );
        if verbose {
            row.push_str(&format!(
                " pend={} attr:o={:o},i={:o},l={:o}",
                c.rbuf().distance(),
                c.attrs().output.bits(),
                c.attrs().input.bits(),
                c.attrs().local.bits(),
            ));
        }
        row.push('\n');
        rows.push(row);
    }

    for row in rows {
        server.mux_print(m, &row);
    }
}

fn cmd_help(server: &mut ConsoleServer, m: MuxId) {
    let mut text = String::new();
    for entry in COMMANDS {
        if let Some(help) = entry.help {
            text.push_str(&format!("{:>15} - {}\n", entry.name, help));
        }
    }
    text.push_str("\nKey shortcuts when connected:\n");
    text.push_str("   Ctrl-E .     - Disconnect\n");
    text.push_str("   Ctrl-E e     - Inject Ctrl-E\n");
    text.push_str("   Ctrl-E c     - Inject Ctrl-C\n");
    text.push_str("   Ctrl-E z     - Inject Ctrl-Z\n");
    text.push_str("   Ctrl-E q     - Inject ESC\n");
    text.push_str("   Ctrl-E l     - Inject Break sequence\n");
    text.push_str("\nGlobal key shortcuts:\n");
    text.push_str("   Ctrl-E h     - Hide all output (except current)\n");
    text.push_str("   Ctrl-E s     - Show all output\n");

    let mut first = true;
    for (_, c) in server.registry.iter() {
        if let Some(k) = c.key() {
            if first {
                text.push_str("\nUser defined key shortcuts:\n");
                first = false;
            }
            text.push_str(&format!("   Ctrl-E {k}     - Connect to console '{}'\n", c.tag()));
        }
    }

    server.mux_print(m, &text);
}
