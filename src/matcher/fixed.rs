//! Fixed-string back-end: substring search with `memmem`, one finder per
//! newline-separated pattern.
//!
//! Only the plain case lives here; `-i`, `-w` and `-x` route fixed patterns
//! through the regex back-end with everything escaped (see
//! [`crate::matcher::compile`]).

use memchr::{memchr, memmem, memrchr};

use super::{Matcher, Span};

pub struct FixedMatcher {
    finders: Vec<memmem::Finder<'static>>,
    eol: u8,
}

impl FixedMatcher {
    pub fn new(patterns: &[&str], eol: u8) -> Self {
        let finders = patterns
            .iter()
            .map(|p| memmem::Finder::new(p.as_bytes()).into_owned())
            .collect();
        Self { finders, eol }
    }

    /// Earliest match at or after `from` across all patterns; ties prefer
    /// the longest needle so the result is leftmost-longest.
    fn find_from(&self, buf: &[u8], from: usize) -> Option<Span> {
        let mut best: Option<Span> = None;
        for finder in &self.finders {
            if let Some(i) = finder.find(&buf[from..]) {
                let cand = Span {
                    start: from + i,
                    len: finder.needle().len(),
                };
                let better = match best {
                    None => true,
                    Some(b) => {
                        cand.start < b.start || (cand.start == b.start && cand.len > b.len)
                    }
                };
                if better {
                    best = Some(cand);
                }
            }
        }
        best
    }
}

impl Matcher for FixedMatcher {
    fn execute(&self, buf: &[u8], start: Option<usize>) -> Option<Span> {
        if let Some(s) = start {
            return self.find_from(buf, s);
        }
        // Needles never contain the terminator, so any hit lies inside one
        // line; widen it to the line boundaries.
        let m = self.find_from(buf, 0)?;
        let line_start = memrchr(self.eol, &buf[..m.start]).map_or(0, |i| i + 1);
        let line_end = memchr(self.eol, &buf[m.start..])
            .map_or(buf.len(), |i| m.start + i + 1);
        Some(Span {
            start: line_start,
            len: line_end - line_start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pattern_line_widening() {
        let m = FixedMatcher::new(&["oba"], b'\n');
        let buf = b"alpha\nfoobar\nbaz\n";
        let span = m.execute(buf, None).unwrap();
        assert_eq!(&buf[span.start..span.end()], b"foobar\n");
    }

    #[test]
    fn test_no_match() {
        let m = FixedMatcher::new(&["zebra"], b'\n');
        assert!(m.execute(b"alpha\nbeta\n", None).is_none());
    }

    #[test]
    fn test_exact_mode_positions() {
        let m = FixedMatcher::new(&["ab"], b'\n');
        let buf = b"ababc abab\n";
        let span = m.execute(buf, Some(0)).unwrap();
        assert_eq!((span.start, span.len), (0, 2));
        let span = m.execute(buf, Some(1)).unwrap();
        assert_eq!((span.start, span.len), (2, 2));
        let span = m.execute(buf, Some(7)).unwrap();
        assert_eq!((span.start, span.len), (8, 2));
        assert!(m.execute(buf, Some(9)).is_none());
    }

    #[test]
    fn test_multiple_patterns_earliest_wins() {
        let m = FixedMatcher::new(&["zz", "beta"], b'\n');
        let buf = b"alpha beta zz\n";
        let span = m.execute(buf, Some(0)).unwrap();
        assert_eq!(&buf[span.start..span.end()], b"beta");
    }

    #[test]
    fn test_tied_start_prefers_longest() {
        let m = FixedMatcher::new(&["ab", "abc"], b'\n');
        let span = m.execute(b"xxabcx\n", Some(0)).unwrap();
        assert_eq!((span.start, span.len), (2, 3));
    }

    #[test]
    fn test_empty_needle_matches_everywhere() {
        let m = FixedMatcher::new(&[""], b'\n');
        let buf = b"aa\nbb\n";
        let span = m.execute(buf, None).unwrap();
        assert_eq!((span.start, span.len), (0, 3));
        let span = m.execute(buf, Some(4)).unwrap();
        assert_eq!((span.start, span.len), (4, 0));
    }

    #[test]
    fn test_binary_needles_and_haystacks() {
        let m = FixedMatcher::new(&["b"], 0);
        let buf = b"aaa\0bbb\0";
        let span = m.execute(buf, None).unwrap();
        assert_eq!((span.start, span.len), (4, 4));
    }
}
