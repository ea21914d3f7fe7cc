//! Command-line front end: argument parsing, environment handling, option
//! resolution, and process exit.

use std::fs;
use std::io::{self, BufWriter, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};

use mgrep::colors::Colors;
use mgrep::matcher::{self, PatternOptions};
use mgrep::options::{BinaryFiles, Devices, Directories, ListFiles, Options};
use mgrep::scan::probe::EncodingProbe;
use mgrep::session::{run, Session};

#[derive(Parser, Debug)]
#[command(name = "mgrep")]
#[command(version)]
#[command(about = "Search for a pattern in each file or standard input")]
// `-h` historically means --no-filename, so the help flag is long-only.
#[command(disable_help_flag = true)]
#[command(override_usage = "mgrep [OPTION]... PATTERN [FILE]...")]
#[command(after_help = "\
With no FILE, or when FILE is -, read standard input. With -r and no FILE,\n\
search the working directory. Exit status is 0 if any line was selected,\n\
1 otherwise; if any error occurs, the exit status is 2.")]
struct Cli {
    /// Pattern, then files; the first positional is the pattern unless -e
    /// or -f supplied one
    #[arg(value_name = "PATTERN_OR_FILE")]
    args: Vec<String>,

    /// PATTERN is an extended regular expression
    #[arg(short = 'E', long = "extended-regexp")]
    extended_regexp: bool,

    /// PATTERN is a set of newline-separated strings
    #[arg(short = 'F', long = "fixed-strings", alias = "fixed-regexp")]
    fixed_strings: bool,

    /// PATTERN is a basic regular expression (default)
    #[arg(short = 'G', long = "basic-regexp")]
    basic_regexp: bool,

    /// PATTERN is a Perl regular expression
    #[arg(short = 'P', long = "perl-regexp")]
    perl_regexp: bool,

    #[arg(short = 'X', value_name = "MATCHER", hide = true)]
    matcher: Option<String>,

    /// Use PATTERN for matching
    #[arg(short = 'e', long = "regexp", value_name = "PATTERN")]
    regexp: Vec<String>,

    /// Obtain patterns from FILE, one per line
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pattern_files: Vec<PathBuf>,

    /// Ignore case distinctions
    #[arg(short = 'i', long = "ignore-case")]
    ignore_case: bool,

    #[arg(short = 'y', hide = true)]
    ignore_case_old: bool,

    /// Force PATTERN to match only whole words
    #[arg(short = 'w', long = "word-regexp")]
    word_regexp: bool,

    /// Force PATTERN to match only whole lines
    #[arg(short = 'x', long = "line-regexp")]
    line_regexp: bool,

    /// A data line ends in 0 byte, not newline
    #[arg(short = 'z', long = "null-data")]
    null_data: bool,

    /// Print NUM lines of trailing context
    #[arg(short = 'A', long = "after-context", value_name = "NUM")]
    after_context: Option<u64>,

    /// Print NUM lines of leading context
    #[arg(short = 'B', long = "before-context", value_name = "NUM")]
    before_context: Option<u64>,

    /// Print NUM lines of output context
    #[arg(short = 'C', long = "context", value_name = "NUM")]
    context: Option<u64>,

    /// Print the byte offset with output lines
    #[arg(short = 'b', long = "byte-offset")]
    byte_offset: bool,

    /// Print only a count of matching lines per file
    #[arg(short = 'c', long = "count")]
    count: bool,

    /// Print the file name for each match
    #[arg(short = 'H', long = "with-filename")]
    with_filename: bool,

    /// Suppress the file name prefix on output
    #[arg(short = 'h', long = "no-filename")]
    no_filename: bool,

    /// Print line number with output lines
    #[arg(short = 'n', long = "line-number")]
    line_number: bool,

    /// Show only the part of a line matching PATTERN
    #[arg(short = 'o', long = "only-matching")]
    only_matching: bool,

    /// Suppress all normal output
    #[arg(short = 'q', long = "quiet", alias = "silent")]
    quiet: bool,

    /// Suppress error messages
    #[arg(short = 's', long = "no-messages")]
    no_messages: bool,

    /// Select non-matching lines
    #[arg(short = 'v', long = "invert-match")]
    invert_match: bool,

    /// Print only names of files with no selected lines
    #[arg(short = 'L', long = "files-without-match")]
    files_without_match: bool,

    /// Print only names of files with selected lines
    #[arg(short = 'l', long = "files-with-matches")]
    files_with_matches: bool,

    /// Stop after NUM selected lines per file
    #[arg(short = 'm', long = "max-count", value_name = "NUM")]
    max_count: Option<u64>,

    /// Use NUM search threads (NUM omitted means one per CPU)
    #[arg(
        short = 'M',
        long = "parallel",
        value_name = "NUM",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "0"
    )]
    parallel: Option<u64>,

    /// Read all files under each directory, recursively
    #[arg(short = 'r', long = "recursive")]
    recursive: bool,

    /// Likewise, but follow all symbolic links
    #[arg(short = 'R', long = "dereference-recursive")]
    dereference_recursive: bool,

    /// Process a binary file as if it were text
    #[arg(short = 'a', long = "text")]
    text: bool,

    /// Assume binary files do not match
    #[arg(short = 'I')]
    binary_without_match: bool,

    /// (no effect on this platform)
    #[arg(short = 'U', long = "binary")]
    binary: bool,

    /// (no effect on this platform)
    #[arg(short = 'u', long = "unix-byte-offsets")]
    unix_byte_offsets: bool,

    /// Make tabs line up by padding offsets
    #[arg(short = 'T', long = "initial-tab")]
    initial_tab: bool,

    /// Print 0 byte after each file name
    #[arg(short = 'Z', long = "null")]
    null: bool,

    /// How to handle directories: read, recurse, or skip
    #[arg(short = 'd', long = "directories", value_name = "ACTION")]
    directories: Option<DirAction>,

    /// How to handle devices, FIFOs and sockets: read or skip
    #[arg(short = 'D', long = "devices", value_name = "ACTION")]
    devices: Option<DevAction>,

    /// Assume that binary files are TYPE: binary, text, or without-match
    #[arg(long = "binary-files", value_name = "TYPE")]
    binary_files: Option<BinaryKind>,

    /// Use markers to highlight the matching strings
    #[arg(
        long = "color",
        alias = "colour",
        value_name = "WHEN",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "auto"
    )]
    color: Option<String>,

    /// Search only files that match GLOB
    #[arg(long = "include", value_name = "GLOB")]
    include: Vec<String>,

    /// Skip files that match GLOB
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Skip files whose base name matches any pattern from FILE
    #[arg(long = "exclude-from", value_name = "FILE")]
    exclude_from: Vec<PathBuf>,

    /// Skip directories that match GLOB during recursion
    #[arg(long = "exclude-dir", value_name = "GLOB")]
    exclude_dir: Vec<String>,

    /// Use SEP as the group separator (default --)
    #[arg(long = "group-separator", value_name = "SEP")]
    group_separator: Option<String>,

    /// Do not print a separator between groups of lines
    #[arg(long = "no-group-separator", action = ArgAction::SetTrue)]
    no_group_separator: bool,

    /// Flush output on every line
    #[arg(long = "line-buffered")]
    line_buffered: bool,

    /// Use LABEL as the standard input file name
    #[arg(long = "label", value_name = "LABEL")]
    label: Option<String>,

    /// Print help
    #[arg(long = "help", action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirAction {
    Read,
    Recurse,
    Skip,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DevAction {
    Read,
    Skip,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BinaryKind {
    Binary,
    Text,
    WithoutMatch,
}

fn main() {
    let mut argv: Vec<String> = std::env::args().collect();

    if let Ok(env_opts) = std::env::var("GREP_OPTIONS") {
        let extra = split_env_options(&env_opts);
        if !extra.is_empty() {
            eprintln!("mgrep: warning: GREP_OPTIONS is deprecated; please use an alias or script");
            argv.splice(1..1, extra);
        }
    }
    let digit_context = extract_context_digits(&mut argv);

    let cli = Cli::parse_from(&argv);
    match build_and_run(cli, digit_context) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("mgrep: {e:#}");
            std::process::exit(2);
        }
    }
}

/// Split `GREP_OPTIONS` on whitespace; backslash escapes the next
/// character.
fn split_env_options(options: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = options.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            return out;
        }
        let mut arg = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            if c == '\\' {
                match chars.next() {
                    Some(escaped) => arg.push(escaped),
                    None => arg.push('\\'),
                }
            } else {
                arg.push(c);
            }
        }
        out.push(arg);
    }
}

/// Options whose value arrives as the next token; a `-NUM`-looking token
/// after one of these is an argument, not a digit option.
const VALUE_OPTIONS: &[&str] = &[
    "-e", "-f", "-m", "-A", "-B", "-C", "-d", "-D", "-X", "--regexp", "--file", "--max-count",
    "--after-context", "--before-context", "--context", "--directories", "--devices",
    "--binary-files", "--include", "--exclude", "--exclude-from", "--exclude-dir",
    "--group-separator", "--label",
];

/// Remove standalone `-NUM` tokens (the digit context options, last one
/// wins) and rewrite the attached `-MNUM` form into `--parallel=NUM`.
fn extract_context_digits(argv: &mut Vec<String>) -> Option<u64> {
    let mut context = None;
    let mut i = 1;
    while i < argv.len() {
        if argv[i] == "--" {
            break;
        }
        if VALUE_OPTIONS.contains(&argv[i].as_str()) {
            i += 2;
            continue;
        }
        let Some(rest) = argv[i].strip_prefix('-') else {
            i += 1;
            continue;
        };
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            context = Some(rest.parse().unwrap_or(u64::MAX));
            argv.remove(i);
        } else if rest.len() > 1
            && rest.starts_with('M')
            && rest[1..].bytes().all(|b| b.is_ascii_digit())
        {
            argv[i] = format!("--parallel={}", &rest[1..]);
            i += 1;
        } else {
            i += 1;
        }
    }
    context
}

fn build_and_run(cli: Cli, digit_context: Option<u64>) -> Result<i32> {
    // Back-end selection; conflicting choices are a usage error.
    let mut names: Vec<&str> = Vec::new();
    if cli.basic_regexp {
        names.push("grep");
    }
    if cli.extended_regexp {
        names.push("egrep");
    }
    if cli.fixed_strings {
        names.push("fgrep");
    }
    if cli.perl_regexp {
        names.push("perl");
    }
    if let Some(name) = &cli.matcher {
        names.push(name.as_str());
    }
    let kind = matcher::select_kind(&names)?;

    // Assemble the newline-joined pattern list from -e/-f, falling back to
    // the first positional.
    let mut keys = String::new();
    let mut have_keys = false;
    for e in &cli.regexp {
        keys.push_str(e);
        keys.push('\n');
        have_keys = true;
    }
    for path in &cli.pattern_files {
        let text = if path.as_os_str() == "-" {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading patterns from standard input")?;
            buf
        } else {
            fs::read_to_string(path)
                .with_context(|| format!("{}", path.display()))?
        };
        keys.push_str(&text);
        if !text.is_empty() && !text.ends_with('\n') {
            keys.push('\n');
        }
        have_keys = true;
    }

    let mut file_args: Vec<String> = cli.args.clone();
    if have_keys {
        // Strip the one trailing newline the assembly added.
        if keys.ends_with('\n') {
            keys.pop();
        }
    } else if !file_args.is_empty() {
        keys = file_args.remove(0);
    } else {
        bail!("usage: mgrep [OPTION]... PATTERN [FILE]...");
    }

    let mut invert = cli.invert_match;
    let mut whole_words = cli.word_regexp;
    let mut whole_lines = cli.line_regexp;
    // Patterns were supplied but all of them were empty input (e.g. -f on
    // an empty file): match nothing.
    if have_keys && keys.is_empty() && cli.regexp.is_empty() {
        invert = !invert;
        whole_words = false;
        whole_lines = false;
    }

    let eol: u8 = if cli.null_data { 0 } else { b'\n' };

    let mut exit_on_match = cli.quiet;

    // What stdout is changes behavior: a regular file arms the self-read
    // guard, /dev/null means output is irrelevant, a terminal enables
    // color=auto and line buffering.
    let stdout_info = if exit_on_match {
        StdoutInfo::default()
    } else {
        probe_stdout()
    };
    if stdout_info.is_dev_null {
        exit_on_match = true;
    }

    let mut colors = Colors::default();
    colors.enabled = match cli.color.as_deref().map(|w| w.to_ascii_lowercase()) {
        None => false,
        Some(w) if ["always", "yes", "force"].contains(&w.as_str()) => true,
        Some(w) if ["never", "no", "none"].contains(&w.as_str()) => false,
        Some(w) if ["auto", "tty", "if-tty"].contains(&w.as_str()) => {
            stdout_info.possibly_tty && io::stdout().is_terminal()
        }
        Some(w) => bail!("invalid argument {w} for --color"),
    };
    if colors.enabled {
        if let Ok(legacy) = std::env::var("GREP_COLOR") {
            if !legacy.is_empty() {
                colors.set_legacy_match_color(&legacy);
            }
        }
        if let Ok(spec) = std::env::var("GREP_COLORS") {
            colors.parse_grep_colors(&spec);
        }
    }

    // -q overrides -l and -L, which in turn override -c.
    let mut list_files = if cli.files_without_match {
        ListFiles::NonMatching
    } else if cli.files_with_matches {
        ListFiles::Matching
    } else {
        ListFiles::None
    };
    if exit_on_match {
        list_files = ListFiles::None;
    }
    let mut count_matches = cli.count;
    let mut done_on_match = false;
    if exit_on_match || list_files != ListFiles::None {
        count_matches = false;
        done_on_match = true;
    }
    let out_quiet = count_matches || done_on_match;

    let default_context = cli.context.or(digit_context);
    let before = cli.before_context.or(default_context).unwrap_or(0);
    let after = cli.after_context.or(default_context).unwrap_or(0);
    let context_configured = cli.before_context.is_some()
        || cli.after_context.is_some()
        || default_context.is_some();

    let group_separator = if cli.no_group_separator {
        None
    } else {
        Some(cli.group_separator.clone().unwrap_or_else(|| "--".to_string()))
    };

    let directories = if let Some(action) = cli.directories {
        match action {
            DirAction::Read => Directories::Read,
            DirAction::Recurse => Directories::Recurse,
            DirAction::Skip => Directories::Skip,
        }
    } else if cli.recursive || cli.dereference_recursive {
        Directories::Recurse
    } else {
        Directories::Read
    };
    let devices = match cli.devices {
        Some(DevAction::Read) => Devices::Read,
        Some(DevAction::Skip) => Devices::Skip,
        // Following every symlink also means reading whatever devices the
        // walk turns up.
        None if cli.dereference_recursive => Devices::Read,
        None => Devices::ReadCommandLine,
    };

    let binary_files = match cli.binary_files {
        Some(BinaryKind::Binary) => BinaryFiles::Binary,
        Some(BinaryKind::Text) => BinaryFiles::Text,
        Some(BinaryKind::WithoutMatch) => BinaryFiles::WithoutMatch,
        None if cli.text => BinaryFiles::Text,
        None if cli.binary_without_match => BinaryFiles::WithoutMatch,
        None => BinaryFiles::Binary,
    };

    let num_threads = match cli.parallel {
        None => 1,
        Some(0) => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    };

    let pattern_opts = PatternOptions {
        ignore_case: cli.ignore_case || cli.ignore_case_old,
        whole_words,
        whole_lines,
        eol,
    };
    let compiled = matcher::compile(kind, &keys, &pattern_opts)?;

    // Whether an empty line would be skipped decides if runs of zeros in
    // sparse files can be leapt over without scanning.
    let empty_matches = compiled
        .execute(&[eol], None)
        .is_some_and(|span| span.start == 0);
    let skip_empty_lines = empty_matches == invert;

    if file_args.is_empty() {
        if directories == Directories::Recurse {
            file_args.push(".".to_string());
        } else {
            file_args.push("-".to_string());
        }
    }

    let out_file = ((file_args.len() > 1 || directories == Directories::Recurse)
        && !cli.no_filename)
        || cli.with_filename;

    let mut exclude = compile_globs(&cli.exclude)?;
    for path in &cli.exclude_from {
        let text =
            fs::read_to_string(path).with_context(|| format!("{}", path.display()))?;
        for line in text.lines().filter(|l| !l.is_empty()) {
            exclude.push(
                glob::Pattern::new(line)
                    .with_context(|| format!("invalid exclude pattern {line}"))?,
            );
        }
    }

    let opts = Options {
        invert,
        out_line: cli.line_number,
        out_byte: cli.byte_offset,
        out_file,
        filename_nul: cli.null,
        count_matches,
        list_files,
        max_count: cli.max_count.unwrap_or(u64::MAX),
        before: usize::try_from(before).unwrap_or(usize::MAX),
        after: usize::try_from(after).unwrap_or(usize::MAX),
        context_configured,
        group_separator,
        only_matching: cli.only_matching,
        align_tabs: cli.initial_tab,
        line_buffered: cli.line_buffered || io::stdout().is_terminal(),
        label: cli.label.clone(),
        eol,
        binary_files,
        directories,
        devices,
        follow_links: cli.dereference_recursive,
        suppress_errors: cli.no_messages,
        exit_on_match,
        quiet: cli.quiet,
        out_quiet,
        done_on_match,
        skip_empty_lines,
        include: compile_globs(&cli.include)?,
        exclude,
        exclude_dir: compile_globs(&cli.exclude_dir)?,
        num_threads,
    };

    let writer = Box::new(BufWriter::with_capacity(64 * 1024, io::stdout()));
    let mut session = Session::new(
        opts,
        colors,
        compiled,
        EncodingProbe::from_locale(),
        writer,
    );
    session.out_dev_ino = stdout_info.regular_dev_ino;

    Ok(run(Arc::new(session), &file_args))
}

fn compile_globs(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| glob::Pattern::new(p).with_context(|| format!("invalid pattern {p}")))
        .collect()
}

#[derive(Default)]
struct StdoutInfo {
    /// Set when stdout is a regular file.
    regular_dev_ino: Option<(u64, u64)>,
    possibly_tty: bool,
    is_dev_null: bool,
}

#[cfg(unix)]
fn probe_stdout() -> StdoutInfo {
    use std::os::unix::fs::MetadataExt;

    let mut info = StdoutInfo::default();
    // SAFETY: fstat fills the zeroed struct; descriptor 1 always exists.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(1, &mut st) } != 0 {
        return info;
    }
    match st.st_mode & libc::S_IFMT {
        libc::S_IFREG => {
            info.regular_dev_ino = Some((st.st_dev as u64, st.st_ino as u64));
        }
        libc::S_IFCHR => {
            let dev_null = fs::metadata("/dev/null")
                .map(|m| m.dev() == st.st_dev as u64 && m.ino() == st.st_ino as u64)
                .unwrap_or(false);
            if dev_null {
                info.is_dev_null = true;
            } else {
                info.possibly_tty = true;
            }
        }
        _ => {}
    }
    info
}

#[cfg(not(unix))]
fn probe_stdout() -> StdoutInfo {
    StdoutInfo {
        regular_dev_ino: None,
        possibly_tty: io::stdout().is_terminal(),
        is_dev_null: false,
    }
}
