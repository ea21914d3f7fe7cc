//! Resolved run configuration shared read-only by every worker.

/// How binary (NUL-containing) files are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFiles {
    /// Scan, but report only `Binary file <name> matches`.
    Binary,
    /// Treat the file as text; print matching lines as-is.
    Text,
    /// Pretend the file does not match at all.
    WithoutMatch,
}

/// How directories named as inputs are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directories {
    Read,
    Recurse,
    Skip,
}

/// How device files, FIFOs and sockets are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Devices {
    /// Read devices named on the command line, skip those found by recursion.
    ReadCommandLine,
    Read,
    Skip,
}

/// File-listing output mode (`-l` / `-L`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFiles {
    None,
    Matching,
    NonMatching,
}

/// Everything the scanning and output engine needs to know about one run.
///
/// Built once from the command line, then shared immutably. The two dynamic
/// flags (`out_quiet`, `done_on_match`) are only the *initial* per-file
/// values; the scan context owns mutable copies that binary detection flips.
#[derive(Debug, Clone)]
pub struct Options {
    pub invert: bool,
    pub out_line: bool,
    pub out_byte: bool,
    /// Print file names ahead of matching lines.
    pub out_file: bool,
    /// `-Z`: terminate file names with NUL instead of the separator.
    pub filename_nul: bool,
    pub count_matches: bool,
    pub list_files: ListFiles,
    pub max_count: u64,
    pub before: usize,
    pub after: usize,
    /// True when any of `-A`/`-B`/`-C`/`-NUM` appeared; gates the group
    /// separator even when the resolved context is zero.
    pub context_configured: bool,
    /// Line printed between disjoint match regions; `None` suppresses it.
    pub group_separator: Option<String>,
    pub only_matching: bool,
    /// `-T`: pad offsets and prefix separators so columns line up.
    pub align_tabs: bool,
    pub line_buffered: bool,
    /// Display name for standard input.
    pub label: Option<String>,
    /// End-of-line byte; `\0` under `-z`.
    pub eol: u8,
    pub binary_files: BinaryFiles,
    pub directories: Directories,
    pub devices: Devices,
    /// `-R`: follow symbolic links during recursion.
    pub follow_links: bool,
    pub suppress_errors: bool,
    /// Stop the whole run as soon as any match is known (`-q`, or stdout is
    /// /dev/null).
    pub exit_on_match: bool,
    /// `-q` was given; forces exit status 0 once a match is found.
    pub quiet: bool,
    /// Initial per-file value: suppress line output entirely.
    pub out_quiet: bool,
    /// Initial per-file value: one match settles the file.
    pub done_on_match: bool,
    /// Whether an empty line would be skipped by the current pattern and
    /// inversion; drives the sparse-file hole skip.
    pub skip_empty_lines: bool,
    pub include: Vec<glob::Pattern>,
    pub exclude: Vec<glob::Pattern>,
    pub exclude_dir: Vec<glob::Pattern>,
    pub num_threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            invert: false,
            out_line: false,
            out_byte: false,
            out_file: false,
            filename_nul: false,
            count_matches: false,
            list_files: ListFiles::None,
            max_count: u64::MAX,
            before: 0,
            after: 0,
            context_configured: false,
            group_separator: Some("--".to_string()),
            only_matching: false,
            align_tabs: false,
            line_buffered: false,
            label: None,
            eol: b'\n',
            binary_files: BinaryFiles::Binary,
            directories: Directories::Read,
            devices: Devices::ReadCommandLine,
            follow_links: false,
            suppress_errors: false,
            exit_on_match: false,
            quiet: false,
            out_quiet: false,
            done_on_match: false,
            skip_empty_lines: false,
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_dir: Vec::new(),
            num_threads: 1,
        }
    }
}
