//! Dispatcher: expand command-line arguments into opened work items.
//!
//! `-` becomes the standard-input item; directories recurse, are read, or
//! are skipped per `-d`; devices follow `-D`; `--include`/`--exclude`
//! filter by basename glob. Every opened file is enqueued and owned by the
//! queue until a worker takes it.

use std::fs::{self, File, Metadata};
use std::path::Path;

use walkdir::WalkDir;

use crate::input::WorkFile;
#[cfg(unix)]
use crate::options::ListFiles;
use crate::options::{Devices, Directories};
use crate::session::Session;

/// Expand one command-line argument.
pub fn search_arg(sess: &Session, arg: &str) {
    if arg == "-" {
        sess.queue
            .enqueue(WorkFile::stdin(sess.opts.label.as_deref()));
        return;
    }
    search_path(sess, Path::new(arg), arg, true);
}

fn search_path(sess: &Session, path: &Path, display: &str, command_line: bool) {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            sess.suppressible_io_error(display, &e);
            return;
        }
    };

    if meta.is_dir() {
        match sess.opts.directories {
            Directories::Recurse => {
                walk_directory(sess, path);
                return;
            }
            Directories::Skip => return,
            // Fall through: reading the descriptor will produce the
            // per-file diagnostic.
            Directories::Read => {}
        }
    } else {
        if skipped_by_patterns(sess, path) {
            return;
        }
        if is_device(&meta) && skip_devices(sess, command_line) {
            return;
        }
    }

    open_and_enqueue(sess, path, display, &meta);
}

fn walk_directory(sess: &Session, root: &Path) {
    let strip_dot = root == Path::new(".");
    let walker = WalkDir::new(root)
        .follow_links(sess.opts.follow_links)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.depth() > 0
                && entry.file_type().is_dir()
                && matches_any(&sess.opts.exclude_dir, entry.file_name().to_string_lossy().as_ref()))
        });

    for item in walker {
        let entry = match item {
            Ok(e) => e,
            Err(e) => {
                if e.loop_ancestor().is_some() {
                    if !sess.opts.suppress_errors {
                        eprintln!(
                            "mgrep: warning: {}: recursive directory loop",
                            e.path().map(|p| p.display().to_string()).unwrap_or_default()
                        );
                    }
                } else {
                    sess.suppressible_error(
                        &e.path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| root.display().to_string()),
                        &e.to_string(),
                    );
                }
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }
        if !file_type.is_file() && sess.opts.devices != Devices::Read {
            continue;
        }
        if skipped_by_patterns(sess, entry.path()) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                sess.suppressible_error(&entry.path().display().to_string(), &e.to_string());
                continue;
            }
        };

        let display = display_name(entry.path(), strip_dot);
        open_and_enqueue(sess, entry.path(), &display, &meta);
    }
}

fn open_and_enqueue(sess: &Session, path: &Path, display: &str, meta: &Metadata) {
    if reads_own_output(sess, meta) {
        if !sess.opts.suppress_errors {
            eprintln!("mgrep: input file {display} is also the output");
        }
        sess.set_errseen();
        return;
    }
    match File::open(path) {
        Ok(file) => {
            let wf = WorkFile::from_file(file, display.to_string(), meta.is_file(), meta.len());
            wf.advise_readahead();
            sess.queue.enqueue(wf);
        }
        Err(e) => sess.suppressible_io_error(display, &e),
    }
}

/// Drop the leading `./` that a walk rooted at `.` prefixes on every path.
fn display_name(path: &Path, strip_dot: bool) -> String {
    let name = path.display().to_string();
    if strip_dot {
        if let Some(stripped) = name.strip_prefix("./") {
            return stripped.to_string();
        }
    }
    name
}

/// Basename filtering: with `--include` only matching names are searched,
/// and `--exclude` always wins for names it matches.
fn skipped_by_patterns(sess: &Session, path: &Path) -> bool {
    if sess.opts.include.is_empty() && sess.opts.exclude.is_empty() {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if matches_any(&sess.opts.exclude, &name) {
        return true;
    }
    !sess.opts.include.is_empty() && !matches_any(&sess.opts.include, &name)
}

fn matches_any(patterns: &[glob::Pattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

fn skip_devices(sess: &Session, command_line: bool) -> bool {
    match sess.opts.devices {
        Devices::Skip => true,
        Devices::ReadCommandLine => !command_line,
        Devices::Read => false,
    }
}

#[cfg(unix)]
fn is_device(meta: &Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    let ft = meta.file_type();
    ft.is_char_device() || ft.is_block_device() || ft.is_fifo() || ft.is_socket()
}

#[cfg(not(unix))]
fn is_device(meta: &Metadata) -> bool {
    !meta.is_file() && !meta.is_dir()
}

/// True when scanning this file would read lines we are writing: stdout is
/// a regular file with the same identity, and the output modes in effect
/// could echo input back into it indefinitely.
#[cfg(unix)]
fn reads_own_output(sess: &Session, meta: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Some((dev, ino)) = sess.out_dev_ino else {
        return false;
    };
    !sess.opts.out_quiet
        && sess.opts.list_files == ListFiles::None
        && sess.opts.max_count > 1
        && meta.dev() == dev
        && meta.ino() == ino
}

#[cfg(not(unix))]
fn reads_own_output(_sess: &Session, _meta: &Metadata) -> bool {
    false
}
