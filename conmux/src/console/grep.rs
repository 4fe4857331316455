//! Context-aware search over circular buffer space.
//!
//! A single pass walks a channel's live outbound buffer from tail to head
//! with wrapping indices, closing line records at newline boundaries and
//! attempting a literal pattern match at every position. A second pass prints
//! the flagged records with grep's familiar decorations: `tag:`/`tag-`
//! prefixes, line numbers, `--` separators between context blocks, or a bare
//! per-channel count.

use crate::channel::ring::RingBuffer;
use crate::error::CommandError;
use crate::mux::MuxId;
use crate::registry::ChannelId;
use crate::server::ConsoleServer;

use super::tokenize::Token;

#[derive(Debug, Clone, Copy, Default)]
struct GrepOptions {
    line_numbers: bool,
    word: bool,
    ignore_case: bool,
    count: bool,
    invert: bool,
    before: usize,
    after: usize,
}

/// One closed line: its offset from the buffer tail and print flags.
#[derive(Debug, Clone, Copy)]
struct LineRecord {
    start: usize,
    matched: bool,
    print: bool,
}

pub(crate) fn run(
    server: &mut ConsoleServer,
    m: MuxId,
    line: &[u8],
    args: &[Token],
) -> Result<(), CommandError> {
    let mut opt = GrepOptions::default();
    let mut pattern: Vec<u8> = Vec::new();
    let mut target: Option<ChannelId> = None;

    let mut i = 1;
    while i < args.len() {
        let t = args[i].text(line);
        if t.first() == Some(&b'-') && t.len() > 1 {
            let mut j = 1;
            while j < t.len() {
                match t[j] {
                    b'n' => opt.line_numbers = true,
                    b'w' => opt.word = true,
                    b'i' => opt.ignore_case = true,
                    b'c' => opt.count = true,
                    b'v' => opt.invert = true,
                    c @ (b'A' | b'B' | b'C') => {
                        if i + 1 == args.len() || j + 1 < t.len() {
                            return Err(CommandError::GrepMissingParam(c as char));
                        }
                        let v: usize = std::str::from_utf8(args[i + 1].text(line))
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                        match c {
                            b'A' => opt.after = v,
                            b'B' => opt.before = v,
                            _ => {
                                opt.after = v;
                                opt.before = v;
                            }
                        }
                        i += 1;
                    }
                    other => return Err(CommandError::GrepUnknownOption(other as char)),
                }
                j += 1;
            }
        } else if pattern.is_empty() {
            pattern = t.to_vec();
        } else {
            let chan_name = String::from_utf8_lossy(t).into_owned();
            target = Some(server.registry.find_by_name(&chan_name).ok_or_else(|| {
                CommandError::ConsoleNotFound { cmd: "grep".into(), name: chan_name.clone() }
            })?);
        }
        i += 1;
    }

    if opt.ignore_case {
        pattern.make_ascii_lowercase();
    }

    for id in server.registry.ids() {
        if target.is_some_and(|t| t != id) {
            continue;
        }

        let mut rows: Vec<Vec<u8>> = Vec::new();
        {
            let Some(chan) = server.registry.get(id) else { continue };
            let tag = chan.tag().to_string();
            let b = chan.wbuf();
            let (lines, count) = scan(b, &pattern, &opt);

            if opt.count {
                let mut row = Vec::new();
                if target.is_none() {
                    row.extend_from_slice(tag.as_bytes());
                    row.push(b':');
                }
                row.extend_from_slice(count.to_string().as_bytes());
                row.push(b'\n');
                rows.push(row);
            } else {
                let mut last_printed: Option<usize> = None;
                for (nr, rec) in lines.iter().enumerate() {
                    if !rec.print {
                        continue;
                    }
                    if let Some(lp) = last_printed {
                        if lp != nr - 1 && (opt.after > 0 || opt.before > 0) {
                            rows.push(b"--\n".to_vec());
                        }
                    }

                    let mut row = Vec::new();
                    let sep = if rec.matched { b':' } else { b'-' };
                    if target.is_none() {
                        row.extend_from_slice(tag.as_bytes());
                        row.push(sep);
                    }
                    if opt.line_numbers {
                        row.extend_from_slice((nr + 1).to_string().as_bytes());
                        row.push(sep);
                    }

                    let len = b.distance();
                    let tail = b.tail();
                    for off in rec.start..len {
                        let c = b[tail + off];
                        if c == b'\n' {
                            row.push(b'\n');
                            break;
                        }
                        row.push(c);
                    }
                    if row.last() != Some(&b'\n') {
                        row.push(b'\n');
                    }
                    rows.push(row);
                    last_printed = Some(nr);
                }
            }
        }

        let (mux, reg) = server.mux_reg(m);
        for row in rows {
            mux.print_bytes(reg, &row);
        }
    }

    Ok(())
}

/// Single pass over the live buffer: close line records, attempt the match at
/// every position, and arm backward/forward context flags on each hit.
fn scan(b: &RingBuffer, pattern: &[u8], opt: &GrepOptions) -> (Vec<LineRecord>, usize) {
    let len = b.distance();
    let tail = b.tail();
    let mut lines = Vec::new();
    let mut count = 0usize;

    if len == 0 {
        return (lines, 0);
    }

    let mut print_next = 0usize;
    let mut cur_start = 0usize;
    let mut is_match = false;

    for off in 0..=len {
        let at_end = off == len;
        let close = at_end || (b[tail + off] == b'\n' && off + 1 != len);

        if close {
            let mut rec = LineRecord { start: cur_start, matched: false, print: false };
            if print_next > 0 {
                rec.print = true;
                print_next -= 1;
            }
            if opt.invert ^ is_match {
                count += 1;
                rec.matched = true;
                rec.print = true;
                let back = lines.len().min(opt.before);
                let total = lines.len();
                for prior in &mut lines[total - back..] {
                    prior.print = true;
                }
                if opt.after > print_next {
                    print_next = opt.after;
                }
            }
            lines.push(rec);
            cur_start = off + 1;
            is_match = false;
        }

        if at_end {
            break;
        }

        // literal match attempt at this position; it may not cross the head
        if off + pattern.len() <= len {
            let i = tail + off;
            let mut k = 0;
            while k < pattern.len() {
                let mut c = b[i + k];
                if opt.ignore_case {
                    c = c.to_ascii_lowercase();
                }
                if c != pattern[k] {
                    break;
                }
                k += 1;
            }
            if k == pattern.len() && b[i] != b'\n' {
                let word_ok = !opt.word || {
                    let before = b[i - 1];
                    let after = b[i + k];
                    !before.is_ascii_alphanumeric() && !after.is_ascii_alphanumeric()
                };
                if word_ok {
                    is_match = true;
                }
            }
        }
    }

    (lines, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Attributes;
    use crate::config::Config;
    use crate::server::{ChannelOptions, ConsoleServer};
    use crate::transport::MemoryEndpoint;

    fn fixture(content: &[u8]) -> (ConsoleServer, MuxId, MemoryEndpoint, ChannelId) {
        let mut server = ConsoleServer::new(Config::default());
        let m = server.add_mux("cons");
        let ep = MemoryEndpoint::new();
        server.add_transport(m, Box::new(ep.clone()));

        let handle = server.create_channel(ChannelOptions::new("app"));
        let id = handle.id();
        // store the search corpus verbatim
        server.set_channel_attrs(id, Attributes::raw());
        server.channel_write(id, content);
        ep.take();
        (server, m, ep, id)
    }

    fn grep(server: &mut ConsoleServer, m: MuxId, ep: &MemoryEndpoint, cmdline: &[u8]) -> String {
        let args = crate::console::tokenize::tokenize(cmdline, 16, false);
        run(server, m, cmdline, &args).unwrap();
        server.flush_output(m);
        String::from_utf8_lossy(&ep.take()).into_owned()
    }

    #[test]
    fn test_basic_match_prints_only_matching_line() {
        let (mut server, m, ep, _) = fixture(b"aaa\nbbb\nccc\nddd\n");
        let out = grep(&mut server, m, &ep, b"grep bbb app");
        assert!(out.contains("bbb"));
        assert!(!out.contains("aaa"));
        assert!(!out.contains("ccc"));
    }

    #[test]
    fn test_context_lines_print_contiguously() {
        let (mut server, m, ep, _) = fixture(b"aaa\nbbb\nccc\nddd\n");
        let out = grep(&mut server, m, &ep, b"grep -C 1 bbb app");
        assert!(out.contains("aaa"));
        assert!(out.contains("bbb"));
        assert!(out.contains("ccc"));
        assert!(!out.contains("ddd"));
        assert!(!out.contains("--"), "adjacent context must not be separated: {out:?}");
    }

    #[test]
    fn test_count_mode_prints_single_count() {
        let (mut server, m, ep, _) = fixture(b"aaa\nbbb\nccc\nddd\n");
        let out = grep(&mut server, m, &ep, b"grep -c bbb app");
        assert!(out.contains("1\r\n"), "got {out:?}");
        assert!(!out.contains("bbb"));
    }

    #[test]
    fn test_tag_prefix_when_no_channel_given() {
        let (mut server, m, ep, _) = fixture(b"xyz needle xyz\n");
        let out = grep(&mut server, m, &ep, b"grep needle");
        assert!(out.contains("app:"), "got {out:?}");
    }

    #[test]
    fn test_line_numbers_and_context_markers() {
        let (mut server, m, ep, _) = fixture(b"one\ntwo\nthree\n");
        let out = grep(&mut server, m, &ep, b"grep -n -B 1 two app");
        // context line gets '-', match line gets ':'
        assert!(out.contains("1-one"), "got {out:?}");
        assert!(out.contains("2:two"), "got {out:?}");
    }

    #[test]
    fn test_separator_between_distant_context_blocks() {
        let (mut server, m, ep, _) = fixture(b"hit\na\nb\nc\nd\nhit\n");
        let out = grep(&mut server, m, &ep, b"grep -A 1 hit app");
        assert!(out.contains("--"), "got {out:?}");
    }

    #[test]
    fn test_whole_word_requires_boundaries() {
        let (mut server, m, ep, _) = fixture(b"foo bar\nfoobar\n");
        let out = grep(&mut server, m, &ep, b"grep -w foo app");
        assert!(out.contains("foo bar"));
        assert!(!out.contains("foobar"));
    }

    #[test]
    fn test_ignore_case_folds_both_sides() {
        let (mut server, m, ep, _) = fixture(b"Hello World\n");
        let out = grep(&mut server, m, &ep, b"grep -i hello app");
        assert!(out.contains("Hello World"));
    }

    #[test]
    fn test_invert_selects_non_matching_lines() {
        let (mut server, m, ep, _) = fixture(b"keep\ndrop\nkeep2\n");
        let out = grep(&mut server, m, &ep, b"grep -v keep app");
        assert!(out.contains("drop"));
        assert!(!out.contains("keep2"));
    }

    #[test]
    fn test_missing_context_parameter_is_an_error() {
        let (mut server, m, _ep, _) = fixture(b"x\n");
        let line = b"grep -A".as_slice();
        let args = crate::console::tokenize::tokenize(line, 16, false);
        let err = run(&mut server, m, line, &args).unwrap_err();
        assert_eq!(err, CommandError::GrepMissingParam('A'));
    }

    #[test]
    fn test_unknown_option_is_an_error() {
        let (mut server, m, _ep, _) = fixture(b"x\n");
        let line = b"grep -q foo".as_slice();
        let args = crate::console::tokenize::tokenize(line, 16, false);
        let err = run(&mut server, m, line, &args).unwrap_err();
        assert_eq!(err, CommandError::GrepUnknownOption('q'));
    }

    #[test]
    fn test_unknown_channel_aborts() {
        let (mut server, m, _ep, _) = fixture(b"x\n");
        let line = b"grep foo nochan".as_slice();
        let args = crate::console::tokenize::tokenize(line, 16, false);
        let err = run(&mut server, m, line, &args).unwrap_err();
        assert_eq!(
            err,
            CommandError::ConsoleNotFound { cmd: "grep".into(), name: "nochan".into() }
        );
    }

    #[test]
    fn test_search_spans_wrapped_history() {
        let mut server = ConsoleServer::new(Config::default());
        let m = server.add_mux("cons");
        let ep = MemoryEndpoint::new();
        server.add_transport(m, Box::new(ep.clone()));
        let handle = server.create_channel(ChannelOptions::new("app").obuf_size(32));
        server.set_channel_attrs(handle.id(), Attributes::raw());
        // overflow the 32-byte ring so the oldest bytes fall off and the
        // live window wraps
        server.channel_write(handle.id(), b"XXXXXXXX0123456789\n0123456789\nneedle\nzz\n");
        ep.take();
        let out = grep(&mut server, m, &ep, b"grep needle app");
        assert!(out.contains("needle"), "got {out:?}");
    }
}
