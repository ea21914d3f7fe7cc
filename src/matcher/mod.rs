//! The contract between the scan engine and a compiled pattern.
//!
//! The engine is indifferent to pattern syntax: it compiles the user's
//! pattern once into a [`Matcher`] and calls [`Matcher::execute`] over byte
//! buffers. All back-ends here are reentrant, so one instance is shared
//! read-only by every worker thread.

pub mod fixed;
pub mod regex_matcher;

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use self::fixed::FixedMatcher;
use self::regex_matcher::RegexMatcher;

/// A located match within a scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// A compiled pattern.
pub trait Matcher: Send + Sync {
    /// Search `buf`.
    ///
    /// With `start == None` this is a whole-line search: the result is the
    /// first *line* containing a match, and its length includes the line
    /// terminator. With `start == Some(s)` this is an exact search for the
    /// first match beginning at or after byte `s` (used for highlighting
    /// and `--only-matching`).
    fn execute(&self, buf: &[u8], start: Option<usize>) -> Option<Span>;
}

/// Pattern back-end families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Basic,
    Extended,
    Fixed,
    Perl,
}

impl MatcherKind {
    /// Resolve a back-end by its historical name (the `-X` option).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "grep" => Some(Self::Basic),
            "egrep" | "awk" | "gawk" | "posixawk" => Some(Self::Extended),
            "fgrep" => Some(Self::Fixed),
            "perl" => Some(Self::Perl),
            _ => None,
        }
    }
}

/// Pattern-level modifiers that change how a back-end compiles.
#[derive(Debug, Clone, Copy)]
pub struct PatternOptions {
    pub ignore_case: bool,
    pub whole_words: bool,
    pub whole_lines: bool,
    pub eol: u8,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            ignore_case: false,
            whole_words: false,
            whole_lines: false,
            eol: b'\n',
        }
    }
}

/// Compile `pattern` (one or more newline-separated alternatives) with the
/// selected back-end.
///
/// The fixed-string back-end only runs natively for plain searches; with
/// `-i`, `-w` or `-x` each alternative is escaped and handed to the regex
/// back-end, which implements those modifiers uniformly.
pub fn compile(kind: MatcherKind, pattern: &str, opts: &PatternOptions) -> Result<Arc<dyn Matcher>> {
    let branches: Vec<&str> = pattern.split('\n').collect();

    if kind == MatcherKind::Fixed
        && !(opts.ignore_case || opts.whole_words || opts.whole_lines)
    {
        return Ok(Arc::new(FixedMatcher::new(&branches, opts.eol)));
    }

    let translated: Vec<String> = branches
        .iter()
        .map(|&b| match kind {
            MatcherKind::Basic => regex_matcher::bre_to_crate_syntax(b),
            MatcherKind::Extended => regex_matcher::ere_to_crate_syntax(b),
            MatcherKind::Fixed => regex::escape(b),
            MatcherKind::Perl => b.to_string(),
        })
        .collect();

    let matcher = RegexMatcher::new(&translated, opts)
        .with_context(|| format!("invalid pattern: {pattern}"))?;
    Ok(Arc::new(matcher))
}

/// Pick the back-end from the `-E/-F/-G/-P/-X` selections, diagnosing
/// conflicting choices the way the option surface always has.
pub fn select_kind(names: &[&str]) -> Result<MatcherKind> {
    let mut chosen: Option<(&str, MatcherKind)> = None;
    for &name in names {
        let kind = match MatcherKind::from_name(name) {
            Some(k) => k,
            None => bail!("invalid matcher {name}"),
        };
        match chosen {
            Some((prev, _)) if prev != name => bail!("conflicting matchers specified"),
            _ => chosen = Some((name, kind)),
        }
    }
    Ok(chosen.map(|(_, k)| k).unwrap_or(MatcherKind::Basic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(kind: MatcherKind, pattern: &str) -> Arc<dyn Matcher> {
        compile(kind, pattern, &PatternOptions::default()).unwrap()
    }

    #[test]
    fn test_whole_line_search_returns_line_span() {
        let m = pat(MatcherKind::Extended, "foo");
        let buf = b"alpha\nfoobar\nbaz\n";
        let span = m.execute(buf, None).unwrap();
        assert_eq!(&buf[span.start..span.end()], b"foobar\n");
    }

    #[test]
    fn test_exact_search_returns_match_span() {
        let m = pat(MatcherKind::Extended, "o+");
        let buf = b"foo boo\n";
        let span = m.execute(buf, Some(0)).unwrap();
        assert_eq!((span.start, span.len), (1, 2));
        let span = m.execute(buf, Some(3)).unwrap();
        assert_eq!((span.start, span.len), (5, 2));
    }

    #[test]
    fn test_multiple_branches_alternate() {
        let m = pat(MatcherKind::Extended, "cat\ndog");
        let buf = b"a dog barked\n";
        assert!(m.execute(buf, None).is_some());
    }

    #[test]
    fn test_kind_from_name_aliases() {
        assert_eq!(MatcherKind::from_name("grep"), Some(MatcherKind::Basic));
        assert_eq!(MatcherKind::from_name("awk"), Some(MatcherKind::Extended));
        assert_eq!(MatcherKind::from_name("gawk"), Some(MatcherKind::Extended));
        assert_eq!(MatcherKind::from_name("fgrep"), Some(MatcherKind::Fixed));
        assert_eq!(MatcherKind::from_name("perl"), Some(MatcherKind::Perl));
        assert_eq!(MatcherKind::from_name("teco"), None);
    }

    #[test]
    fn test_select_kind_conflicts() {
        assert!(select_kind(&["egrep", "fgrep"]).is_err());
        assert!(select_kind(&["egrep", "egrep"]).is_ok());
        assert_eq!(select_kind(&[]).unwrap(), MatcherKind::Basic);
    }

    #[test]
    fn test_fixed_with_ignore_case_falls_back_to_regex() {
        let opts = PatternOptions {
            ignore_case: true,
            ..PatternOptions::default()
        };
        let m = compile(MatcherKind::Fixed, "a.b", &opts).unwrap();
        let buf = b"xxA.Bxx\n";
        assert!(m.execute(buf, None).is_some());
        // The dot is literal even through the regex fallback.
        assert!(m.execute(b"xxAxBxx\n", None).is_none());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(compile(
            MatcherKind::Extended,
            "a(b",
            &PatternOptions::default()
        )
        .is_err());
    }
}
