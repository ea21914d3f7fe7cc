//! Per-file scan driver.
//!
//! A worker owns one [`ScanContext`] for its lifetime and runs
//! [`grep_file`] once per dequeued file: refill the buffer up to the last
//! complete line, probe the first chunk for binary content, hand the line
//! range to the matcher, and carry the incomplete trailing line plus any
//! leading-context lines over to the next refill.

pub mod buffer;
pub mod probe;

use std::fmt;
use std::io;

use memchr::{memchr, memchr_iter, memrchr};

use crate::input::WorkFile;
use crate::options::BinaryFiles;
use crate::output;
use crate::session::Session;
use self::buffer::ScanBuffer;

/// Errors that abort a scan instead of downgrading to a per-file
/// diagnostic: output failures and counter overflow.
#[derive(Debug)]
pub enum ScanError {
    Write(io::Error),
    TooLarge,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Write(e) => write!(f, "write error: {e}"),
            ScanError::TooLarge => write!(f, "input is too large to count"),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<io::Error> for ScanError {
    fn from(e: io::Error) -> Self {
        ScanError::Write(e)
    }
}

/// Add byte or line counts, refusing to wrap around.
pub fn add_count(a: u64, b: u64) -> Result<u64, ScanError> {
    a.checked_add(b).ok_or(ScanError::TooLarge)
}

/// Mutable per-worker scan state. Buffer positions (`lastnl`, `lastout`)
/// are indices into the scan buffer and are rebased after every refill.
pub struct ScanContext {
    pub buf: ScanBuffer,
    /// Display name of the file being scanned.
    pub filename: String,
    /// Bytes of the input that lie before the current buffer contents
    /// (maintained only when byte offsets are printed).
    pub totalcc: u64,
    /// Line terminators counted before `lastnl`.
    pub totalnl: u64,
    /// Frontier up to which `totalnl` is accurate.
    pub lastnl: usize,
    /// One past the last byte emitted, if any output happened for this
    /// buffer.
    pub lastout: Option<usize>,
    /// Remaining output-line budget (`--max-count`).
    pub outleft: u64,
    /// Trailing-context lines still owed.
    pub pending: u64,
    /// Input offset one past the last emitted line, for the stdin
    /// seek-restore.
    pub after_last_match: u64,
    /// Dynamic flags; start from the run-wide values and flip when binary
    /// content or encoding errors downgrade the file to summary-only mode.
    pub out_quiet: bool,
    pub done_on_match: bool,
    /// Set when a line was suppressed because it contained encoding errors.
    pub encoding_error_output: bool,
}

impl ScanContext {
    pub fn new(eol: u8) -> Self {
        Self {
            buf: ScanBuffer::new(eol),
            filename: String::new(),
            totalcc: 0,
            totalnl: 0,
            lastnl: 0,
            lastout: None,
            outleft: 0,
            pending: 0,
            after_last_match: 0,
            out_quiet: false,
            done_on_match: false,
            encoding_error_output: false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.buf.bytes()
    }
}

/// Count line terminators between `lastnl` and `lim`, then advance the
/// frontier.
pub fn nlscan(ctx: &mut ScanContext, eol: u8, lim: usize) -> Result<(), ScanError> {
    let newlines = memchr_iter(eol, &ctx.buf.bytes()[ctx.lastnl..lim]).count() as u64;
    ctx.totalnl = add_count(ctx.totalnl, newlines)?;
    ctx.lastnl = lim;
    Ok(())
}

/// Replace NUL bytes in `buf` with `zapper` (no-op while `zapper` is 0,
/// i.e. before binary content has been detected). Keeps runs of zeros from
/// forming one enormous line.
fn zap_nuls(buf: &mut [u8], zapper: u8) {
    if zapper == 0 {
        return;
    }
    let mut i = 0;
    while let Some(j) = memchr(0, &buf[i..]) {
        buf[i + j] = zapper;
        i += j + 1;
    }
}

/// True if the file is known to contain NULs beyond what has been read:
/// its size says there is more, and a hole starts before the end.
fn file_must_have_nulls(wf: &WorkFile, bytes_read: u64) -> bool {
    let Some(size) = wf.known_size() else {
        return false;
    };
    if size <= bytes_read {
        return false;
    }
    match wf.input.seek_hole(bytes_read) {
        Some(hole_start) => hole_start < size,
        None => false,
    }
}

/// Scan the line range `[beg, lim)`, emitting matching lines (or the gaps
/// between matches under inversion). Returns the number of output lines.
fn grep_buf(
    ctx: &mut ScanContext,
    sess: &Session,
    beg: usize,
    lim: usize,
) -> Result<u64, ScanError> {
    let invert = sess.opts.invert;
    let outleft0 = ctx.outleft;
    let mut p = beg;
    while p < lim {
        let found = sess.matcher.execute(&ctx.bytes()[p..lim], None);
        let (b, mut endp) = match found {
            Some(span) => (p + span.start, p + span.end()),
            None => {
                if !invert {
                    break;
                }
                (lim, lim)
            }
        };
        // The empty virtual line at the end of the buffer never matches.
        if !invert && b == lim {
            break;
        }
        if !invert || p < b {
            let (prbeg, prend) = if invert { (p, b) } else { (b, endp) };
            output::print_text(ctx, sess, prbeg, prend)?;
            if ctx.outleft == 0 || ctx.done_on_match {
                if sess.opts.exit_on_match {
                    sess.request_halt();
                }
                break;
            }
        }
        if endp == p {
            endp = p + 1;
        }
        p = endp;
    }
    Ok(outleft0 - ctx.outleft)
}

/// Scan one opened file. Returns the number of output lines; per-file read
/// errors are reported through the session and yield zero.
pub fn grep_file(
    ctx: &mut ScanContext,
    sess: &Session,
    wf: &mut WorkFile,
) -> Result<u64, ScanError> {
    let opts = &sess.opts;
    let eol = opts.eol;
    let out_quiet0 = ctx.out_quiet;
    let done_on_match0 = ctx.done_on_match;

    // Output-line count at the point NULs were first deduced; None while the
    // input still looks like text.
    let mut nlines_first_null: Option<u64> = None;
    let mut nlines: u64 = 0;
    let mut residue: usize = 0;
    let mut save: usize = 0;
    let mut nul_zapper: u8 = 0;

    let start_offset = if wf.is_regular && wf.input.is_stdin() {
        match wf.input.current_offset() {
            Some(o) => o,
            None => {
                sess.suppressible_error(&ctx.filename, "lseek failed");
                return Ok(0);
            }
        }
    } else {
        0
    };
    ctx.buf.reset(eol, start_offset);
    ctx.totalcc = 0;
    ctx.totalnl = 0;
    ctx.lastnl = ctx.buf.beg();
    ctx.lastout = None;
    ctx.outleft = opts.max_count;
    ctx.pending = 0;
    ctx.after_last_match = 0;
    ctx.encoding_error_output = false;
    ctx.buf.skip_nuls = opts.skip_empty_lines && eol == 0;

    let known_size = wf.known_size();
    match ctx.buf.fill(&mut wf.input, 0, known_size) {
        Ok(skipped) => ctx.totalnl = add_count(ctx.totalnl, skipped)?,
        Err(e) => {
            sess.suppressible_io_error(&ctx.filename, &e);
            return Ok(0);
        }
    }

    let mut firsttime = true;
    let mut finished_early = false;
    loop {
        if nlines_first_null.is_none()
            && eol != 0
            && opts.binary_files != BinaryFiles::Text
            && (probe::has_nulls(&ctx.bytes()[ctx.buf.beg()..ctx.buf.lim()])
                || (firsttime
                    && file_must_have_nulls(wf, (ctx.buf.lim() - ctx.buf.beg()) as u64)))
        {
            if opts.binary_files == BinaryFiles::WithoutMatch {
                return Ok(0);
            }
            if !opts.count_matches {
                ctx.done_on_match = true;
                ctx.out_quiet = true;
            }
            nlines_first_null = Some(nlines);
            nul_zapper = eol;
            ctx.buf.skip_nuls = opts.skip_empty_lines;
        }
        firsttime = false;

        ctx.lastnl = ctx.buf.beg();
        if ctx.lastout.is_some() {
            ctx.lastout = Some(ctx.buf.beg());
        }

        let mut beg = ctx.buf.beg() + save;
        // No more data to scan (except for maybe a residue).
        if beg == ctx.buf.lim() {
            break;
        }

        {
            let lim = ctx.buf.lim();
            zap_nuls(&mut ctx.buf.bytes_mut()[beg..lim], nul_zapper);
        }

        // Rightmost complete line boundary: search [beg-1, lim) with the
        // slot before beg temporarily holding an eol sentinel so the scan
        // always hits.
        let mut lim = {
            let buflim = ctx.buf.lim();
            let bytes = ctx.buf.bytes_mut();
            let oldc = bytes[beg - 1];
            bytes[beg - 1] = eol;
            let hit = memrchr(eol, &bytes[beg - 1..buflim]).expect("sentinel guarantees a hit");
            bytes[beg - 1] = oldc;
            beg + hit
        };

        if lim == beg {
            lim = beg - residue;
        }
        beg -= residue;
        residue = ctx.buf.lim() - lim;

        if beg < lim {
            if ctx.outleft > 0 {
                nlines = add_count(nlines, grep_buf(ctx, sess, beg, lim)?)?;
            }
            if ctx.pending > 0 {
                output::print_pending(ctx, sess, lim)?;
            }
            if (ctx.outleft == 0 && ctx.pending == 0)
                || (ctx.done_on_match && nlines_first_null.unwrap_or(0) < nlines)
            {
                finished_early = true;
                break;
            }
        }

        // The last `before` complete lines ahead of the boundary become
        // leading context for the next refill.
        let mut context_beg = lim;
        let mut kept = 0;
        while kept < opts.before && context_beg > ctx.buf.beg() && Some(context_beg) != ctx.lastout
        {
            kept += 1;
            context_beg -= 1;
            while ctx.bytes()[context_beg - 1] != eol {
                context_beg -= 1;
            }
        }
        // Leading context no longer adjacent to what was printed.
        if Some(context_beg) != ctx.lastout {
            ctx.lastout = None;
        }

        save = residue + (lim - context_beg);
        if opts.out_byte {
            let consumed = (ctx.buf.lim() - ctx.buf.beg() - save) as u64;
            ctx.totalcc = add_count(ctx.totalcc, consumed)?;
        }
        if opts.out_line {
            nlscan(ctx, eol, context_beg)?;
        }
        match ctx.buf.fill(&mut wf.input, save, known_size) {
            Ok(skipped) => ctx.totalnl = add_count(ctx.totalnl, skipped)?,
            Err(e) => {
                sess.suppressible_io_error(&ctx.filename, &e);
                finished_early = true;
                break;
            }
        }
    }

    // A final line with no terminator still gets scanned, with one
    // injected.
    if !finished_early && residue > 0 {
        ctx.buf.push_eol();
        let beg = ctx.buf.beg() + save - residue;
        if ctx.outleft > 0 {
            nlines = add_count(nlines, grep_buf(ctx, sess, beg, ctx.buf.lim())?)?;
        }
        if ctx.pending > 0 {
            output::print_pending(ctx, sess, ctx.buf.lim())?;
        }
    }

    ctx.done_on_match = done_on_match0;
    ctx.out_quiet = out_quiet0;
    if !ctx.out_quiet
        && (ctx.encoding_error_output || nlines_first_null.is_some_and(|n| n < nlines))
    {
        output::print_binary_summary(sess, &ctx.filename)?;
    }
    Ok(nlines)
}
