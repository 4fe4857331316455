//! Tab completion.
//!
//! The core algorithm runs over any candidate sequence: track the longest
//! common prefix of every candidate matching the partial argument, print the
//! alternatives once more than one matches, and splice the common prefix back
//! into the edit buffer, with a trailing space when the match is unique.

use crate::console::tokenize::{MAX_ARGS, tokenize};
use crate::console::{COMMANDS, Completer};
use crate::mux::{Mux, MuxId};
use crate::registry::Registry;
use crate::server::ConsoleServer;

/// Column budget for the printed candidate list.
const WRAP_COLUMN: usize = 68;

/// Scan `candidates` against `partial`. Returns the match count and the
/// longest common prefix of all matches; candidates beyond the first are
/// printed, wrapped at the column budget.
pub(crate) fn complete<I>(
    mux: &mut Mux,
    reg: &mut Registry,
    partial: &[u8],
    candidates: I,
) -> (usize, Option<Vec<u8>>)
where
    I: IntoIterator<Item = String>,
{
    let mut count = 0usize;
    let mut prefix: Option<Vec<u8>> = None;
    let mut first: Option<String> = None;
    let mut line_len = 0usize;

    for cand in candidates {
        let cb = cand.as_bytes();
        if !partial.is_empty() && !cb.starts_with(partial) {
            continue;
        }
        count += 1;

        match &mut prefix {
            None => {
                prefix = Some(cb.to_vec());
                first = Some(cand);
            }
            Some(p) => {
                if count == 2 {
                    if let Some(f) = first.take() {
                        mux.print(reg, &format!("\n{f} "));
                        line_len += f.len() + 2;
                    }
                }
                mux.print(reg, &format!("{cand} "));
                line_len += cand.len() + 1;
                if line_len > WRAP_COLUMN {
                    mux.print(reg, "\n");
                    line_len = 0;
                }

                let common = p.iter().zip(cb).take_while(|(a, b)| a == b).count();
                p.truncate(common);
            }
        }
    }

    if count > 1 {
        mux.print(reg, "\n");
    }
    (count, prefix)
}

/// Complete the current edit buffer of mux `m`: the command name while the
/// line has fewer than two tokens, otherwise per the matched command's
/// completer. Returns the number of matching candidates.
pub(crate) fn complete_line(server: &mut ConsoleServer, m: MuxId) -> usize {
    let line = server.muxes[m.0].edit.bytes().to_vec();
    let args = tokenize(&line, MAX_ARGS, true);

    let (count, prefix, range) = if args.len() < 2 {
        let (partial, range) = match args.first() {
            Some(t) => (t.text(&line), (t.start, t.start + t.len)),
            None => (&b""[..], (line.len(), line.len())),
        };
        let names: Vec<String> = COMMANDS.iter().map(|c| c.name.to_string()).collect();
        let (mux, reg) = server.mux_reg(m);
        let (count, prefix) = complete(mux, reg, partial, names);
        (count, prefix, range)
    } else {
        let Some(entry) = COMMANDS
            .iter()
            .find(|c| c.name.as_bytes() == args[0].text(&line))
        else {
            return 0;
        };
        let Some(completer) = &entry.completer else {
            return 0;
        };

        let argnr = args.len() - 1;
        let tok = match completer {
            Completer::ConsoleArg1 => {
                if argnr != 1 {
                    return 0;
                }
                args[1]
            }
            Completer::GrepConsole => {
                // the channel is the second non-option argument; complete it
                // only when it is the argument being typed
                let mut nth = 0;
                let mut found = None;
                for arg in args.iter().take(argnr + 1).skip(1) {
                    if arg.text(&line).first() == Some(&b'-') {
                        continue;
                    }
                    nth += 1;
                    if nth == 2 {
                        found = Some(*arg);
                        break;
                    }
                }
                match found {
                    Some(t) if t.start == args[argnr].start => t,
                    _ => return 0,
                }
            }
        };

        let names: Vec<String> = server.registry.names().collect();
        let (mux, reg) = server.mux_reg(m);
        let (count, prefix) = complete(mux, reg, tok.text(&line), names);
        (count, prefix, (tok.start, tok.start + tok.len))
    };

    if count > 0 {
        if let Some(mut repl) = prefix {
            if count == 1 {
                repl.push(b' ');
            }
            server.muxes[m.0].edit.replace_range(range.0, range.1, &repl);
        }
    }
    count
}
