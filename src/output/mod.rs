//! Output formatter and context tracker.
//!
//! All printing for one match region happens under the session's output
//! lock, so regions from different workers never interleave. Line heads
//! carry the optional filename, line number and byte offset; middles wrap
//! matches in SGR when color is active; tails finish the line, aware of a
//! `\r\n` terminator.

use std::io::Write;

use memchr::memchr;

use crate::colors::Colors;
use crate::options::BinaryFiles;
use crate::scan::{add_count, nlscan, ScanContext, ScanError};
use crate::session::Session;

/// Separator after line heads of selected lines.
pub const SEP_CHAR_SELECTED: u8 = b':';
/// Separator after line heads of context lines.
pub const SEP_CHAR_REJECTED: u8 = b'-';

/// The shared writer and the little bit of state that must survive across
/// files: whether anything was printed yet (suppresses the very first group
/// separator).
pub struct OutputState {
    pub writer: Box<dyn Write + Send>,
    pub used: bool,
}

impl OutputState {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer,
            used: false,
        }
    }
}

fn print_filename(
    st: &mut OutputState,
    colors: &Colors,
    name: &str,
) -> Result<(), ScanError> {
    colors.start_if(&mut st.writer, &colors.filename)?;
    st.writer.write_all(name.as_bytes())?;
    colors.end_if(&mut st.writer, &colors.filename)?;
    Ok(())
}

fn print_sep(st: &mut OutputState, colors: &Colors, sep: u8) -> Result<(), ScanError> {
    colors.start_if(&mut st.writer, &colors.separator)?;
    st.writer.write_all(&[sep])?;
    colors.end_if(&mut st.writer, &colors.separator)?;
    Ok(())
}

/// Base-10 encode `pos` by hand and pad to `min_width` under `-T`, so
/// columns have a chance of lining up.
fn print_offset(
    st: &mut OutputState,
    colors: &Colors,
    pos: u64,
    min_width: usize,
    color: &str,
    align_tabs: bool,
) -> Result<(), ScanError> {
    let mut digits = [0u8; 24];
    let mut p = digits.len();
    let mut v = pos;
    let mut width = min_width as isize;
    loop {
        p -= 1;
        digits[p] = b'0' + (v % 10) as u8;
        width -= 1;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if align_tabs {
        while width > 0 {
            p -= 1;
            digits[p] = b' ';
            width -= 1;
        }
    }
    colors.start_if(&mut st.writer, color)?;
    st.writer.write_all(&digits[p..])?;
    colors.end_if(&mut st.writer, color)?;
    Ok(())
}

/// Print a line head for the `len` bytes at `beg` (part of a line ending at
/// `lim`). Returns false when the data contains encoding errors, in which
/// case the line is suppressed and the file downgrades to binary-summary
/// mode.
fn print_line_head(
    ctx: &mut ScanContext,
    sess: &Session,
    st: &mut OutputState,
    beg: usize,
    len: usize,
    lim: usize,
    sep: u8,
) -> Result<bool, ScanError> {
    let opts = &sess.opts;
    let colors = &sess.colors;

    if opts.binary_files != BinaryFiles::Text
        && sess.probe.has_encoding_errors(&ctx.bytes()[beg..beg + len])
    {
        ctx.encoding_error_output = true;
        ctx.done_on_match = true;
        ctx.out_quiet = true;
        return Ok(false);
    }

    let mut pending_sep = false;

    if opts.out_file {
        print_filename(st, colors, &ctx.filename)?;
        if opts.filename_nul {
            st.writer.write_all(&[0])?;
        } else {
            pending_sep = true;
        }
    }

    if opts.out_line {
        if ctx.lastnl < lim {
            nlscan(ctx, opts.eol, beg)?;
            ctx.totalnl = add_count(ctx.totalnl, 1)?;
            ctx.lastnl = lim;
        }
        if pending_sep {
            print_sep(st, colors, sep)?;
        }
        print_offset(st, colors, ctx.totalnl, 4, &colors.line_num, opts.align_tabs)?;
        pending_sep = true;
    }

    if opts.out_byte {
        let pos = add_count(ctx.totalcc, (beg - ctx.buf.beg()) as u64)?;
        if pending_sep {
            print_sep(st, colors, sep)?;
        }
        print_offset(st, colors, pos, 6, &colors.byte_num, opts.align_tabs)?;
        pending_sep = true;
    }

    if pending_sep {
        if opts.align_tabs {
            st.writer.write_all(b"\t\x08")?;
        }
        print_sep(st, colors, sep)?;
    }

    Ok(true)
}

/// Walk the line emitting each match (with its color, or on its own line
/// under `--only-matching`). Returns the resume position for the caller, or
/// `None` when an `-o` head was suppressed for encoding errors.
///
/// A zero-length match highlights nothing: its position is remembered so
/// the rest of the line is still printed, and the search resumes one byte
/// further.
fn print_line_middle(
    ctx: &mut ScanContext,
    sess: &Session,
    st: &mut OutputState,
    beg: usize,
    lim: usize,
    line_color: &str,
    match_color: &str,
) -> Result<Option<usize>, ScanError> {
    let opts = &sess.opts;
    let colors = &sess.colors;
    let mut cur = beg;
    let mut mid: Option<usize> = None;

    while cur < lim {
        let found = sess
            .matcher
            .execute(&ctx.bytes()[beg..lim], Some(cur - beg));
        let Some(span) = found else { break };
        let b = beg + span.start;
        let mut match_len = span.len;

        // Never match the empty line at the end of the buffer.
        if b == lim {
            break;
        }

        if match_len == 0 {
            // Minimal progress; a non-empty match may still follow.
            match_len = 1;
            if mid.is_none() {
                mid = Some(cur);
            }
        } else {
            if opts.only_matching {
                let sep = if opts.invert {
                    SEP_CHAR_REJECTED
                } else {
                    SEP_CHAR_SELECTED
                };
                if !print_line_head(ctx, sess, st, b, match_len, lim, sep)? {
                    return Ok(None);
                }
            } else {
                colors.start(&mut st.writer, line_color)?;
                if let Some(m) = mid.take() {
                    cur = m;
                }
                st.writer.write_all(&ctx.bytes()[cur..b])?;
            }

            colors.start_if(&mut st.writer, match_color)?;
            st.writer.write_all(&ctx.bytes()[b..b + match_len])?;
            colors.end_if(&mut st.writer, match_color)?;
            if opts.only_matching {
                st.writer.write_all(&[opts.eol])?;
            }
        }
        cur = b + match_len;
    }

    Ok(Some(if opts.only_matching {
        lim
    } else {
        mid.unwrap_or(cur)
    }))
}

/// Emit the unmatched trailing part of the line in the line color, leaving
/// the terminator (and a preceding `\r`, if any) for the plain write.
fn print_line_tail(
    ctx: &ScanContext,
    sess: &Session,
    st: &mut OutputState,
    beg: usize,
    lim: usize,
    line_color: &str,
) -> Result<usize, ScanError> {
    let bytes = ctx.bytes();
    let eol = sess.opts.eol;
    let mut eol_size = usize::from(lim > beg && bytes[lim - 1] == eol);
    eol_size += usize::from(lim - eol_size > beg && bytes[lim - eol_size - 1] == b'\r');
    let tail_size = lim - eol_size - beg;
    if tail_size > 0 {
        sess.colors.start(&mut st.writer, line_color)?;
        st.writer.write_all(&bytes[beg..beg + tail_size])?;
        sess.colors.end(&mut st.writer, line_color)?;
    }
    Ok(beg + tail_size)
}

/// Emit one whole line `[beg, lim)` with head, middle and tail.
fn print_line(
    ctx: &mut ScanContext,
    sess: &Session,
    st: &mut OutputState,
    beg: usize,
    lim: usize,
    sep: u8,
) -> Result<(), ScanError> {
    let opts = &sess.opts;
    let colors = &sess.colors;

    if !opts.only_matching && !print_line_head(ctx, sess, st, beg, lim - beg - 1, lim, sep)? {
        return Ok(());
    }

    let matching = (sep == SEP_CHAR_SELECTED) != opts.invert;
    let (line_color, match_color) = if colors.enabled {
        let selected_for_color = (sep == SEP_CHAR_SELECTED) != (opts.invert && colors.rv);
        (
            if selected_for_color {
                colors.selected_line.as_str()
            } else {
                colors.context_line.as_str()
            },
            if sep == SEP_CHAR_SELECTED {
                colors.selected_match.as_str()
            } else {
                colors.context_match.as_str()
            },
        )
    } else {
        ("", "")
    };

    let mut start = beg;
    if (opts.only_matching && matching)
        || (colors.enabled && (!line_color.is_empty() || !match_color.is_empty()))
    {
        // Non-matching lines have nothing to highlight.
        if matching && (opts.only_matching || !match_color.is_empty()) {
            match print_line_middle(ctx, sess, st, beg, lim, line_color, match_color)? {
                Some(resume) => start = resume,
                None => return Ok(()),
            }
        }
        if !opts.only_matching && !line_color.is_empty() {
            start = print_line_tail(ctx, sess, st, start, lim, line_color)?;
        }
    }

    if !opts.only_matching && lim > start {
        st.writer.write_all(&ctx.bytes()[start..lim])?;
    }
    if opts.line_buffered {
        st.writer.flush()?;
    }
    ctx.lastout = Some(lim);
    Ok(())
}

/// Print owed trailing-context lines up to `lim`. Once the output budget is
/// spent, the first line that would itself be selected ends the trailing
/// context instead of being printed.
pub fn print_pending(ctx: &mut ScanContext, sess: &Session, lim: usize) -> Result<(), ScanError> {
    if ctx.lastout.is_none() {
        ctx.lastout = Some(ctx.buf.beg());
    }
    let eol = sess.opts.eol;
    let mut guard = sess.lock_output();
    let st = &mut *guard;
    while ctx.pending > 0 {
        let lo = match ctx.lastout {
            Some(lo) if lo < lim => lo,
            _ => break,
        };
        let Some(off) = memchr(eol, &ctx.bytes()[lo..lim]) else {
            break;
        };
        let nl = lo + off + 1;
        ctx.pending -= 1;
        let print = if ctx.outleft > 0 {
            true
        } else {
            let matched = sess.matcher.execute(&ctx.bytes()[lo..nl], None).is_some();
            matched == sess.opts.invert
        };
        if print {
            print_line(ctx, sess, st, lo, nl, SEP_CHAR_REJECTED)?;
        } else {
            ctx.pending = 0;
        }
    }
    Ok(())
}

/// Emit the region `[beg, lim)` — a selected line, or the whole gap between
/// matches under inversion — together with its leading context and, when
/// needed, the group separator. The entire region goes out under one hold
/// of the output lock.
pub fn print_text(
    ctx: &mut ScanContext,
    sess: &Session,
    beg: usize,
    lim: usize,
) -> Result<(), ScanError> {
    let opts = &sess.opts;
    let eol = opts.eol;

    if !ctx.out_quiet && ctx.pending > 0 {
        print_pending(ctx, sess, beg)?;
    }

    let mut p = beg;
    let mut guard = sess.lock_output();
    let st = &mut *guard;

    if !ctx.out_quiet {
        // Walk back over the leading context, bounded by what was already
        // printed (or the start of the buffer).
        let bp = ctx.lastout.unwrap_or_else(|| ctx.buf.beg());
        for _ in 0..opts.before {
            if p > bp {
                p -= 1;
                while ctx.bytes()[p - 1] != eol {
                    p -= 1;
                }
            }
        }

        // Group separator, unless this output is adjacent to the previous
        // output in the file.
        if opts.context_configured && st.used && Some(p) != ctx.lastout {
            if let Some(sep) = &opts.group_separator {
                sess.colors.start_if(&mut st.writer, &sess.colors.separator)?;
                st.writer.write_all(sep.as_bytes())?;
                sess.colors.end_if(&mut st.writer, &sess.colors.separator)?;
                st.writer.write_all(b"\n")?;
            }
        }

        while p < beg {
            let off = memchr(eol, &ctx.bytes()[p..beg]).expect("context lines end in eol");
            let nl = p + off + 1;
            print_line(ctx, sess, st, p, nl, SEP_CHAR_REJECTED)?;
            p = nl;
        }
    }

    let n;
    if opts.invert {
        // One line per iteration, each charged against the budget.
        let mut printed = 0;
        while p < lim && printed < ctx.outleft {
            let off = memchr(eol, &ctx.bytes()[p..lim]).expect("lines end in eol");
            let nl = p + off + 1;
            if !ctx.out_quiet {
                print_line(ctx, sess, st, p, nl, SEP_CHAR_SELECTED)?;
            }
            p = nl;
            printed += 1;
        }
        n = printed;
    } else {
        if !ctx.out_quiet {
            print_line(ctx, sess, st, beg, lim, SEP_CHAR_SELECTED)?;
        }
        n = 1;
        p = lim;
    }

    ctx.after_last_match = ctx.buf.offset() - (ctx.buf.lim() - p) as u64;
    ctx.pending = if ctx.out_quiet { 0 } else { opts.after as u64 };
    st.used = true;
    ctx.outleft = ctx.outleft.saturating_sub(n);
    Ok(())
}

/// `-c`: per-file count line.
pub fn print_count_summary(sess: &Session, filename: &str, count: u64) -> Result<(), ScanError> {
    let mut guard = sess.lock_output();
    let st = &mut *guard;
    if sess.opts.out_file {
        print_filename(st, &sess.colors, filename)?;
        if sess.opts.filename_nul {
            st.writer.write_all(&[0])?;
        } else {
            print_sep(st, &sess.colors, SEP_CHAR_SELECTED)?;
        }
    }
    writeln!(st.writer, "{count}")?;
    if sess.opts.line_buffered {
        st.writer.flush()?;
    }
    Ok(())
}

/// `-l` / `-L`: file name alone.
pub fn print_file_listing(sess: &Session, filename: &str) -> Result<(), ScanError> {
    let mut guard = sess.lock_output();
    let st = &mut *guard;
    print_filename(st, &sess.colors, filename)?;
    let terminator: &[u8] = if sess.opts.filename_nul { b"\0" } else { b"\n" };
    st.writer.write_all(terminator)?;
    if sess.opts.line_buffered {
        st.writer.flush()?;
    }
    Ok(())
}

/// Summary line for a binary file that matched.
pub fn print_binary_summary(sess: &Session, filename: &str) -> Result<(), ScanError> {
    let mut guard = sess.lock_output();
    let st = &mut *guard;
    writeln!(st.writer, "Binary file {filename} matches")?;
    if sess.opts.line_buffered {
        st.writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SharedSink;

    fn sink() -> (SharedSink, OutputState) {
        let sink = SharedSink::new();
        let st = OutputState::new(Box::new(sink.clone()));
        (sink, st)
    }

    // The full formatter is exercised end-to-end in the session tests; the
    // offset encoder has enough edge cases to earn its own coverage.
    #[test]
    fn test_print_offset_plain() {
        let (out, mut st) = sink();
        let colors = Colors::default();
        print_offset(&mut st, &colors, 0, 4, "32", false).unwrap();
        print_offset(&mut st, &colors, 12345, 4, "32", false).unwrap();
        assert_eq!(out.contents(), b"012345");
    }

    #[test]
    fn test_print_offset_align_tabs_pads() {
        let (out, mut st) = sink();
        let colors = Colors::default();
        print_offset(&mut st, &colors, 7, 4, "32", true).unwrap();
        assert_eq!(out.contents(), b"   7");
    }

    #[test]
    fn test_print_offset_wide_value_ignores_min_width() {
        let (out, mut st) = sink();
        let colors = Colors::default();
        print_offset(&mut st, &colors, 123456, 4, "32", true).unwrap();
        assert_eq!(out.contents(), b"123456");
    }

    #[test]
    fn test_print_sep_uncolored() {
        let (out, mut st) = sink();
        print_sep(&mut st, &Colors::default(), SEP_CHAR_SELECTED).unwrap();
        print_sep(&mut st, &Colors::default(), SEP_CHAR_REJECTED).unwrap();
        assert_eq!(out.contents(), b":-");
    }

    #[test]
    fn test_print_filename_colored() {
        let (out, mut st) = sink();
        let colors = Colors {
            enabled: true,
            ..Colors::default()
        };
        print_filename(&mut st, &colors, "some/file").unwrap();
        assert_eq!(
            out.contents_string(),
            "\x1b[35m\x1b[Ksome/file\x1b[m\x1b[K"
        );
    }
}
