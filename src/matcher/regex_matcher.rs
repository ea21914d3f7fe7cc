//! Regex back-end for the basic, extended, fixed-fallback and perl families.
//!
//! Matching runs over raw bytes (`regex::bytes`) so binary data and broken
//! encodings never abort a scan. Whole-line search finds a match anywhere in
//! the buffer and widens it to the containing line, re-checking the single
//! line when a match straddles a terminator.

use anyhow::{Context, Result};
use memchr::{memchr, memrchr};
use regex::bytes::{Regex, RegexBuilder};

use super::{Matcher, PatternOptions, Span};

pub struct RegexMatcher {
    re: Regex,
    eol: u8,
}

impl RegexMatcher {
    /// Build one matcher from already-translated alternatives.
    pub fn new(branches: &[String], opts: &PatternOptions) -> Result<Self> {
        let mut pattern = branches
            .iter()
            .map(|b| format!("(?:{b})"))
            .collect::<Vec<_>>()
            .join("|");
        if opts.whole_lines {
            pattern = format!("^(?:{pattern})$");
        } else if opts.whole_words {
            pattern = format!("\\b(?:{pattern})\\b");
        }
        // With the newline terminator, `^`/`$` anchor at line boundaries of
        // the whole scanned buffer. Any other terminator gets record-at-a-
        // time matching instead (see `execute_by_lines`), where the anchors
        // must mean begin/end of the record only.
        let re = RegexBuilder::new(&pattern)
            .multi_line(opts.eol == b'\n')
            .case_insensitive(opts.ignore_case)
            .build()
            .context("regex compilation failed")?;
        Ok(Self { re, eol: opts.eol })
    }

    /// Bounds of the line containing `pos`: start index and one past the
    /// terminator (or the end of `buf` for an unterminated tail).
    fn line_bounds(&self, buf: &[u8], pos: usize) -> (usize, usize) {
        let start = memrchr(self.eol, &buf[..pos]).map_or(0, |i| i + 1);
        let end = memchr(self.eol, &buf[pos..]).map_or(buf.len(), |i| pos + i + 1);
        (start, end)
    }
}

impl Matcher for RegexMatcher {
    fn execute(&self, buf: &[u8], start: Option<usize>) -> Option<Span> {
        if self.eol != b'\n' {
            return self.execute_by_lines(buf, start);
        }
        if let Some(s) = start {
            let m = self.re.find_at(buf, s)?;
            return Some(Span {
                start: m.start(),
                len: m.len(),
            });
        }

        let mut pos = 0;
        while pos < buf.len() {
            let m = self.re.find_at(buf, pos)?;
            let (line_start, line_end) = self.line_bounds(buf, m.start());
            if m.end() <= line_end {
                return Some(Span {
                    start: line_start,
                    len: line_end - line_start,
                });
            }
            // The match crosses a line terminator; accept the line only if
            // it matches on its own.
            if self.re.is_match(&buf[line_start..line_end]) {
                return Some(Span {
                    start: line_start,
                    len: line_end - line_start,
                });
            }
            pos = line_end;
        }
        None
    }
}

impl RegexMatcher {
    /// Slower path for a non-newline terminator, where the compiled
    /// multi-line anchors do not know the record separator: each record is
    /// matched on its own with the terminator stripped, so `^` and `$` land
    /// on record boundaries.
    fn execute_by_lines(&self, buf: &[u8], start: Option<usize>) -> Option<Span> {
        if let Some(s) = start {
            let stripped = buf.len() - usize::from(buf.last() == Some(&self.eol));
            let m = self.re.find_at(&buf[..stripped], s)?;
            return Some(Span {
                start: m.start(),
                len: m.len(),
            });
        }
        let mut pos = 0;
        while pos < buf.len() {
            let end = memchr(self.eol, &buf[pos..]).map_or(buf.len(), |i| pos + i + 1);
            let content_end = end - usize::from(buf[end - 1] == self.eol);
            if self.re.is_match(&buf[pos..content_end]) {
                return Some(Span {
                    start: pos,
                    len: end - pos,
                });
            }
            pos = end;
        }
        None
    }
}

/// Translate a POSIX basic regular expression (with the usual GNU
/// extensions) into the crate's syntax.
///
/// In a BRE the grouping, alternation, interval and `+`/`?` operators are
/// spelled with backslashes and their bare forms are literals; `^` and `$`
/// are anchors only in leading/trailing position. Bracket expressions pass
/// through untouched.
pub fn bre_to_crate_syntax(pattern: &str) -> String {
    let bytes = pattern.as_bytes();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;
    // True at positions where a repetition operator cannot apply: the start
    // of the pattern or just after `\(`, `\|` or an anchoring `^`.
    let mut at_expr_start = true;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\\' if i + 1 < bytes.len() => {
                let next = bytes[i + 1];
                match next {
                    b'(' | b')' | b'{' | b'}' | b'|' | b'+' | b'?' => {
                        out.push(next as char);
                        at_expr_start = matches!(next, b'(' | b'|');
                    }
                    b'<' | b'>' => {
                        out.push_str("\\b");
                        at_expr_start = false;
                    }
                    _ => {
                        // Escaped multibyte characters keep their whole
                        // encoding.
                        if let Some(c) = pattern[i + 1..].chars().next() {
                            out.push('\\');
                            out.push(c);
                            at_expr_start = false;
                            i += 1 + c.len_utf8();
                            continue;
                        }
                        at_expr_start = false;
                    }
                }
                i += 2;
                continue;
            }
            b'(' | b')' | b'{' | b'}' | b'|' | b'+' | b'?' => {
                out.push('\\');
                out.push(c as char);
                at_expr_start = false;
            }
            b'*' => {
                if at_expr_start {
                    out.push_str("\\*");
                } else {
                    out.push('*');
                }
                // A starred atom can itself be starred again.
            }
            b'^' => {
                if at_expr_start {
                    out.push('^');
                    // `*` right after a leading anchor is still literal.
                } else {
                    out.push_str("\\^");
                }
            }
            b'$' => {
                let anchoring = i + 1 == bytes.len()
                    || bytes[i + 1..].starts_with(b"\\)")
                    || bytes[i + 1..].starts_with(b"\\|");
                if anchoring {
                    out.push('$');
                } else {
                    out.push_str("\\$");
                }
                at_expr_start = false;
            }
            b'[' => {
                let end = bracket_end(bytes, i);
                out.push_str(&pattern[i..end]);
                i = end;
                at_expr_start = false;
                continue;
            }
            _ => {
                push_byte(&mut out, pattern, i);
                at_expr_start = false;
            }
        }
        i += 1;
    }
    out
}

/// Adjust a POSIX extended regular expression for the crate: the GNU word
/// boundary escapes become `\b`, bare braces that do not open a valid
/// interval are escaped so they stay literal, everything else passes
/// through.
pub fn ere_to_crate_syntax(pattern: &str) -> String {
    let bytes = pattern.as_bytes();
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                match bytes[i + 1] {
                    b'<' | b'>' => {
                        out.push_str("\\b");
                        i += 2;
                    }
                    _ => {
                        out.push('\\');
                        if let Some(c) = pattern[i + 1..].chars().next() {
                            out.push(c);
                            i += 1 + c.len_utf8();
                        } else {
                            i += 2;
                        }
                    }
                }
            }
            b'[' => {
                let end = bracket_end(bytes, i);
                out.push_str(&pattern[i..end]);
                i = end;
            }
            b'{' if !interval_follows(bytes, i) => {
                out.push_str("\\{");
                i += 1;
            }
            _ => {
                push_byte(&mut out, pattern, i);
                i += 1;
            }
        }
    }
    out
}

/// Push the character whose encoding starts at byte `i`. Continuation bytes
/// of a multibyte character are visited by the byte walk too and contribute
/// nothing; the whole character was pushed at its first byte.
fn push_byte(out: &mut String, pattern: &str, i: usize) {
    let b = pattern.as_bytes()[i];
    if b.is_ascii() {
        out.push(b as char);
    } else if pattern.is_char_boundary(i) {
        if let Some(c) = pattern[i..].chars().next() {
            out.push(c);
        }
    }
}

/// One past the closing `]` of a bracket expression starting at `start`,
/// honoring leading `]`, `[:class:]`, `[.coll.]` and `[=eq=]` forms.
fn bracket_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    if bytes.get(i) == Some(&b'^') {
        i += 1;
    }
    if bytes.get(i) == Some(&b']') {
        i += 1;
    }
    while i < bytes.len() {
        match bytes[i] {
            b']' => return i + 1,
            b'[' if matches!(bytes.get(i + 1), Some(b':' | b'.' | b'=')) => {
                let delim = bytes[i + 1];
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == delim && bytes[i + 1] == b']') {
                    i += 1;
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// True when `{` at `open` begins a `{m}`, `{m,}` or `{m,n}` interval.
fn interval_follows(bytes: &[u8], open: usize) -> bool {
    let mut i = open + 1;
    let digits_start = i;
    while matches!(bytes.get(i), Some(b'0'..=b'9')) {
        i += 1;
    }
    if i == digits_start {
        return false;
    }
    if bytes.get(i) == Some(&b',') {
        i += 1;
        while matches!(bytes.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    bytes.get(i) == Some(&b'}')
}
