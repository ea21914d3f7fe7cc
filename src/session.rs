//! Run-wide shared state and top-level orchestration.
//!
//! A [`Session`] is the only thing workers share: the read-only options,
//! colors and compiled pattern, the bounded work queue, the output lock,
//! and a few atomics (error seen, halt, write failure). [`run`] spawns the
//! workers, feeds the queue from the command line, joins, and folds
//! everything into the final exit code.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::colors::Colors;
use crate::matcher::Matcher;
use crate::options::Options;
use crate::output::OutputState;
use crate::scan::probe::EncodingProbe;
use crate::scan::ScanError;
use crate::walk;
use crate::worker::worker_loop;
use crate::workqueue::WorkQueue;

pub struct Session {
    pub opts: Options,
    pub colors: Colors,
    pub matcher: Arc<dyn Matcher>,
    pub probe: EncodingProbe,
    pub queue: WorkQueue,
    out: Mutex<OutputState>,
    /// Identity of stdout when it is a regular file, for the self-read
    /// guard.
    pub out_dev_ino: Option<(u64, u64)>,
    errseen: AtomicBool,
    halt: AtomicBool,
    write_failed: AtomicBool,
}

impl Session {
    pub fn new(
        opts: Options,
        colors: Colors,
        matcher: Arc<dyn Matcher>,
        probe: EncodingProbe,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            opts,
            colors,
            matcher,
            probe,
            queue: WorkQueue::new(),
            out: Mutex::new(OutputState::new(writer)),
            out_dev_ino: None,
            errseen: AtomicBool::new(false),
            halt: AtomicBool::new(false),
            write_failed: AtomicBool::new(false),
        }
    }

    pub fn lock_output(&self) -> MutexGuard<'_, OutputState> {
        self.out.lock().expect("output lock poisoned")
    }

    /// Per-file diagnostic, silenced by `-s` but still marking the run as
    /// having seen an error.
    pub fn suppressible_error(&self, path: &str, msg: &str) {
        if !self.opts.suppress_errors {
            eprintln!("mgrep: {path}: {msg}");
        }
        self.set_errseen();
    }

    pub fn suppressible_io_error(&self, path: &str, e: &std::io::Error) {
        self.suppressible_error(path, &e.to_string());
    }

    /// A write failure or counter overflow: diagnose, remember, and stop
    /// the whole run cooperatively.
    pub fn report_fatal(&self, e: &ScanError) {
        eprintln!("mgrep: {e}");
        if matches!(e, ScanError::Write(_)) {
            self.write_failed.store(true, Ordering::SeqCst);
        }
        self.set_errseen();
        self.request_halt();
    }

    pub fn set_errseen(&self) {
        self.errseen.store(true, Ordering::SeqCst);
    }

    pub fn errseen(&self) -> bool {
        self.errseen.load(Ordering::SeqCst)
    }

    /// Ask every worker to finish up: remaining queue entries are closed
    /// without being scanned.
    pub fn request_halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    pub fn halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    pub fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::SeqCst)
    }
}

/// Search every command-line argument and return the process exit code:
/// 0 when a line was selected, 1 when none was, 2 on error (write failures
/// always win). `-q` turns a found match into 0 no matter what.
pub fn run(sess: Arc<Session>, args: &[String]) -> i32 {
    // A zero budget can never select anything.
    if sess.opts.max_count == 0 {
        return 1;
    }

    let threads = sess.opts.num_threads.max(1);
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let sess = Arc::clone(&sess);
            thread::spawn(move || worker_loop(&sess))
        })
        .collect();

    for arg in args {
        walk::search_arg(&sess, arg);
    }
    sess.queue.finish();

    let mut none_matched = true;
    for handle in workers {
        match handle.join() {
            Ok(worker_none) => none_matched = none_matched && worker_none,
            Err(_) => sess.set_errseen(),
        }
    }

    {
        let mut st = sess.lock_output();
        if let Err(e) = st.writer.flush() {
            drop(st);
            sess.report_fatal(&ScanError::Write(e));
        }
    }

    let matched = !none_matched;
    if sess.write_failed() {
        return 2;
    }
    if sess.opts.exit_on_match && matched {
        return if sess.opts.quiet {
            0
        } else if sess.errseen() {
            2
        } else {
            0
        };
    }
    if sess.errseen() {
        2
    } else if matched {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{compile, MatcherKind, PatternOptions};
    use crate::options::{BinaryFiles, ListFiles};
    use crate::test_utils::SharedSink;
    use tempfile::NamedTempFile;

    struct Harness {
        sink: SharedSink,
        sess: Arc<Session>,
    }

    fn harness_with(pattern: &str, kind: MatcherKind, mut opts: Options) -> Harness {
        let popts = PatternOptions {
            eol: opts.eol,
            ..PatternOptions::default()
        };
        let matcher = compile(kind, pattern, &popts).unwrap();
        // Mirror the startup computation of the empty-line probe.
        let empty_matches = matcher
            .execute(&[opts.eol], None)
            .is_some_and(|s| s.start == 0);
        opts.skip_empty_lines = empty_matches == opts.invert;
        opts.out_quiet = opts.count_matches || opts.done_on_match;

        let sink = SharedSink::new();
        let sess = Arc::new(Session::new(
            opts,
            Colors::default(),
            matcher,
            EncodingProbe::utf8(),
            Box::new(sink.clone()),
        ));
        Harness { sink, sess }
    }

    fn file_with(content: &[u8]) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn run_on(h: &Harness, files: &[&NamedTempFile]) -> i32 {
        let args: Vec<String> = files
            .iter()
            .map(|f| f.path().display().to_string())
            .collect();
        run(Arc::clone(&h.sess), &args)
    }

    #[test]
    fn test_basic_match_no_options() {
        let h = harness_with("foo", MatcherKind::Basic, Options::default());
        let f = file_with(b"alpha\nfoobar\nbaz\nfoo\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "foobar\nfoo\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_no_match_exits_one() {
        let h = harness_with("zebra", MatcherKind::Basic, Options::default());
        let f = file_with(b"alpha\nbeta\n");
        let code = run_on(&h, &[&f]);
        assert!(h.sink.contents().is_empty());
        assert_eq!(code, 1);
    }

    #[test]
    fn test_inversion_and_count() {
        let opts = Options {
            invert: true,
            count_matches: true,
            ..Options::default()
        };
        let h = harness_with("foo", MatcherKind::Basic, opts);
        let f = file_with(b"alpha\nfoobar\nbaz\nfoo\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "2\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_context_and_group_separator() {
        let opts = Options {
            before: 1,
            after: 1,
            context_configured: true,
            ..Options::default()
        };
        let h = harness_with("M", MatcherKind::Basic, opts);
        let f = file_with(b"a\nb\nM1\nc\nd\ne\nM2\nf\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "b\nM1\nc\n--\ne\nM2\nf\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_line_numbers_and_byte_offsets() {
        let opts = Options {
            out_line: true,
            out_byte: true,
            ..Options::default()
        };
        let h = harness_with("x", MatcherKind::Basic, opts);
        let f = file_with(b"ab\nxy\nzx\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "2:3:xy\n3:6:zx\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_only_matching_multiple_matches_per_line() {
        let opts = Options {
            only_matching: true,
            ..Options::default()
        };
        let h = harness_with("ab", MatcherKind::Basic, opts);
        let f = file_with(b"ababc abab\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "ab\nab\nab\nab\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_binary_detection_summary() {
        let h = harness_with("hi", MatcherKind::Basic, Options::default());
        let f = file_with(b"hi\n\x00\nhi\n");
        let code = run_on(&h, &[&f]);
        let name = f.path().display().to_string();
        assert_eq!(
            h.sink.contents_string(),
            format!("Binary file {name} matches\n")
        );
        assert_eq!(code, 0);
    }

    #[test]
    fn test_binary_without_match_mode_stays_silent() {
        let opts = Options {
            binary_files: BinaryFiles::WithoutMatch,
            ..Options::default()
        };
        let h = harness_with("hi", MatcherKind::Basic, opts);
        let f = file_with(b"hi\n\x00\nhi\n");
        let code = run_on(&h, &[&f]);
        assert!(h.sink.contents().is_empty());
        assert_eq!(code, 1);
    }

    #[test]
    fn test_binary_as_text_prints_lines() {
        let opts = Options {
            binary_files: BinaryFiles::Text,
            ..Options::default()
        };
        let h = harness_with("hi", MatcherKind::Basic, opts);
        let f = file_with(b"hi\nxx\nhi\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "hi\nhi\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_quiet_first_match_exits_zero_silently() {
        let opts = Options {
            quiet: true,
            exit_on_match: true,
            done_on_match: true,
            ..Options::default()
        };
        let h = harness_with("foo", MatcherKind::Basic, opts);
        let f = file_with(b"xx\nfoo\nyy\n");
        let code = run_on(&h, &[&f]);
        assert!(h.sink.contents().is_empty());
        assert_eq!(code, 0);
    }

    #[test]
    fn test_quiet_no_match_exits_one() {
        let opts = Options {
            quiet: true,
            exit_on_match: true,
            done_on_match: true,
            ..Options::default()
        };
        let h = harness_with("foo", MatcherKind::Basic, opts);
        let f = file_with(b"xx\nyy\n");
        let code = run_on(&h, &[&f]);
        assert!(h.sink.contents().is_empty());
        assert_eq!(code, 1);
    }

    #[test]
    fn test_max_count_limits_output() {
        let opts = Options {
            max_count: 2,
            ..Options::default()
        };
        let h = harness_with("a", MatcherKind::Basic, opts);
        let f = file_with(b"a1\na2\na3\na4\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "a1\na2\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_max_count_zero_exits_one() {
        let opts = Options {
            max_count: 0,
            ..Options::default()
        };
        let h = harness_with("a", MatcherKind::Basic, opts);
        let f = file_with(b"a\n");
        assert_eq!(run_on(&h, &[&f]), 1);
        assert!(h.sink.contents().is_empty());
    }

    #[test]
    fn test_filenames_for_multiple_inputs() {
        let opts = Options {
            out_file: true,
            ..Options::default()
        };
        let h = harness_with("hit", MatcherKind::Basic, opts);
        let f1 = file_with(b"hit one\n");
        let f2 = file_with(b"miss\nhit two\n");
        let code = run_on(&h, &[&f1, &f2]);
        let out = h.sink.contents_string();
        assert!(out.contains(&format!("{}:hit one\n", f1.path().display())));
        assert!(out.contains(&format!("{}:hit two\n", f2.path().display())));
        assert_eq!(code, 0);
    }

    #[test]
    fn test_list_files_with_matches() {
        let opts = Options {
            list_files: ListFiles::Matching,
            done_on_match: true,
            ..Options::default()
        };
        let h = harness_with("hit", MatcherKind::Basic, opts);
        let f1 = file_with(b"hit\n");
        let f2 = file_with(b"miss\n");
        let code = run_on(&h, &[&f1, &f2]);
        let out = h.sink.contents_string();
        assert!(out.contains(&f1.path().display().to_string()));
        assert!(!out.contains(&f2.path().display().to_string()));
        assert_eq!(code, 0);
    }

    #[test]
    fn test_list_files_without_match() {
        let opts = Options {
            list_files: ListFiles::NonMatching,
            done_on_match: true,
            ..Options::default()
        };
        let h = harness_with("hit", MatcherKind::Basic, opts);
        let f1 = file_with(b"hit\n");
        let f2 = file_with(b"miss\n");
        let code = run_on(&h, &[&f1, &f2]);
        let out = h.sink.contents_string();
        assert!(!out.contains(&f1.path().display().to_string()));
        assert!(out.contains(&f2.path().display().to_string()));
        // -L listing still exits 0: a match existed somewhere.
        assert_eq!(code, 0);
    }

    #[test]
    fn test_missing_file_is_error_exit_two() {
        let opts = Options {
            suppress_errors: true,
            ..Options::default()
        };
        let h = harness_with("x", MatcherKind::Basic, opts);
        let code = run(Arc::clone(&h.sess), &["/nonexistent/mgrep-test".to_string()]);
        assert_eq!(code, 2);
    }

    #[test]
    fn test_match_beats_missing_file_for_status_two() {
        // An error always wins: exit 2 even though another file matched.
        let opts = Options {
            suppress_errors: true,
            ..Options::default()
        };
        let h = harness_with("hit", MatcherKind::Basic, opts);
        let f = file_with(b"hit\n");
        let args = vec![
            f.path().display().to_string(),
            "/nonexistent/mgrep-test".to_string(),
        ];
        assert_eq!(run(Arc::clone(&h.sess), &args), 2);
    }

    #[test]
    fn test_inversion_duality() {
        let input: &[u8] = b"alpha\nfoobar\nbaz\nfoo\nquux\n";
        let selected = {
            let h = harness_with("foo", MatcherKind::Basic, Options::default());
            let f = file_with(input);
            run_on(&h, &[&f]);
            h.sink.contents_string()
        };
        let rejected = {
            let opts = Options {
                invert: true,
                ..Options::default()
            };
            let h = harness_with("foo", MatcherKind::Basic, opts);
            let f = file_with(input);
            run_on(&h, &[&f]);
            h.sink.contents_string()
        };
        let mut all: Vec<&str> = selected.lines().chain(rejected.lines()).collect();
        all.sort_unstable();
        let mut expected: Vec<&str> = std::str::from_utf8(input).unwrap().lines().collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_count_matches_line_output() {
        // -c equals the number of lines plain output would emit.
        let input: &[u8] = b"one match\ntwo match\nneither\nmatch three\n";
        let plain = {
            let h = harness_with("match", MatcherKind::Basic, Options::default());
            let f = file_with(input);
            run_on(&h, &[&f]);
            h.sink.contents_string().lines().count()
        };
        let counted = {
            let opts = Options {
                count_matches: true,
                ..Options::default()
            };
            let h = harness_with("match", MatcherKind::Basic, opts);
            let f = file_with(input);
            run_on(&h, &[&f]);
            h.sink.contents_string().trim().parse::<usize>().unwrap()
        };
        assert_eq!(plain, counted);
    }

    #[test]
    fn test_no_trailing_newline_final_line() {
        let h = harness_with("end", MatcherKind::Basic, Options::default());
        let f = file_with(b"first\nthe end");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "the end\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_null_data_mode() {
        let opts = Options {
            eol: 0,
            ..Options::default()
        };
        let h = harness_with("beta", MatcherKind::Basic, opts);
        let f = file_with(b"alpha\0beta\0gamma\0");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents(), b"beta\0");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_large_file_line_numbers_across_refills() {
        // Force several buffer refills and check line accounting stays
        // exact across them.
        let mut data = Vec::new();
        for i in 0..20_000 {
            data.extend_from_slice(format!("line number {i} padding padding\n").as_bytes());
        }
        data.extend_from_slice(b"needle\n");
        for i in 0..5 {
            data.extend_from_slice(format!("tail {i}\n").as_bytes());
        }
        let opts = Options {
            out_line: true,
            ..Options::default()
        };
        let h = harness_with("needle", MatcherKind::Basic, opts);
        let f = file_with(&data);
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "20001:needle\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_parallel_workers_emit_whole_lines() {
        let opts = Options {
            num_threads: 4,
            out_file: true,
            ..Options::default()
        };
        let h = harness_with("hit", MatcherKind::Basic, opts);
        let files: Vec<NamedTempFile> = (0..16)
            .map(|i| file_with(format!("hit {i} a\nmiss\nhit {i} b\n").as_bytes()))
            .collect();
        let refs: Vec<&NamedTempFile> = files.iter().collect();
        let code = run_on(&h, &refs);
        assert_eq!(code, 0);

        // Regions from different workers may come out in any order, but
        // every emitted line must be intact: correct name prefix, correct
        // payload, nothing torn mid-line.
        let out = h.sink.contents_string();
        assert_eq!(out.lines().count(), 32);
        for f in &files {
            let name = f.path().display().to_string();
            let lines: Vec<&str> = out
                .lines()
                .filter(|l| l.starts_with(&format!("{name}:")))
                .collect();
            assert_eq!(lines.len(), 2, "expected both hits for {name}");
            assert!(lines.iter().any(|l| l.ends_with(" a")));
            assert!(lines.iter().any(|l| l.ends_with(" b")));
        }
    }

    fn colored_harness(pattern: &str, opts: Options) -> Harness {
        let mut h = harness_with(pattern, MatcherKind::Extended, opts);
        let sess = Arc::get_mut(&mut h.sess).expect("fresh session");
        sess.colors.enabled = true;
        h
    }

    #[test]
    fn test_color_wraps_match_in_sgr() {
        let h = colored_harness("oo", Options::default());
        let f = file_with(b"foo\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(
            h.sink.contents_string(),
            "f\x1b[01;31m\x1b[Koo\x1b[m\x1b[K\n"
        );
        assert_eq!(code, 0);
    }

    #[test]
    fn test_color_zero_length_match_highlights_nothing() {
        // A pattern that only matches empty still selects the line, but no
        // SGR sequence is emitted for it.
        let h = colored_harness("x*", Options::default());
        let f = file_with(b"abc\n");
        let code = run_on(&h, &[&f]);
        assert_eq!(h.sink.contents_string(), "abc\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_trailing_context_stops_at_next_match_when_budget_spent() {
        let opts = Options {
            max_count: 1,
            after: 2,
            context_configured: true,
            ..Options::default()
        };
        let h = harness_with("a", MatcherKind::Basic, opts);
        let f = file_with(b"a\nx\na\ny\n");
        let code = run_on(&h, &[&f]);
        // One selected line, one trailing-context line; the second "a"
        // would have been selected, so it ends the context early.
        assert_eq!(h.sink.contents_string(), "a\nx\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_encoding_error_line_downgrades_to_binary_summary() {
        let h = harness_with("hi", MatcherKind::Basic, Options::default());
        let f = file_with(b"hi \xff there\nplain\n");
        let code = run_on(&h, &[&f]);
        let name = f.path().display().to_string();
        assert_eq!(
            h.sink.contents_string(),
            format!("Binary file {name} matches\n")
        );
        assert_eq!(code, 0);
    }
}
