//! Opened inputs and the unit of work handed to scanner threads.
//!
//! A [`WorkFile`] owns exactly one open descriptor from the moment the
//! dispatcher enqueues it until the worker that dequeued it drops it, which
//! is what lets the queue bound double as a descriptor bound.

use std::fs::File;
use std::io::{self, Read};

/// Display label for the standard-input work item.
pub const STDIN_LABEL: &str = "(standard input)";

/// An opened byte source.
pub enum Input {
    File(File),
    Stdin(io::Stdin),
}

impl Input {
    pub fn is_stdin(&self) -> bool {
        matches!(self, Self::Stdin(_))
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> i32 {
        use std::os::unix::io::AsRawFd;
        match self {
            Self::File(f) => f.as_raw_fd(),
            Self::Stdin(s) => s.as_raw_fd(),
        }
    }

    /// Current read offset of the underlying descriptor, when seekable.
    #[cfg(unix)]
    pub fn current_offset(&self) -> Option<u64> {
        // SAFETY: lseek only inspects the descriptor we own.
        let r = unsafe { libc::lseek(self.raw_fd(), 0, libc::SEEK_CUR) };
        (r >= 0).then_some(r as u64)
    }

    #[cfg(not(unix))]
    pub fn current_offset(&self) -> Option<u64> {
        None
    }

    /// Reposition the descriptor; returns false on failure.
    #[cfg(unix)]
    pub fn seek_to(&self, offset: u64) -> bool {
        // SAFETY: lseek only inspects the descriptor we own.
        unsafe { libc::lseek(self.raw_fd(), offset as libc::off_t, libc::SEEK_SET) >= 0 }
    }

    #[cfg(not(unix))]
    pub fn seek_to(&self, _offset: u64) -> bool {
        false
    }

    /// Jump to the next non-hole region at or after `offset`.
    ///
    /// Returns `None` when the operation is unsupported or fails, which the
    /// buffer records so it never tries again on this file. Some systems
    /// report `ENXIO` for a hole that runs to end-of-file; that lands on the
    /// end of the file instead, matching a known size.
    #[cfg(unix)]
    pub fn seek_data(&self, offset: u64, known_size: Option<u64>) -> Option<u64> {
        // SAFETY: lseek only inspects the descriptor we own.
        let r = unsafe { libc::lseek(self.raw_fd(), offset as libc::off_t, libc::SEEK_DATA) };
        if r >= 0 {
            return Some(r as u64);
        }
        let enxio = io::Error::last_os_error().raw_os_error() == Some(libc::ENXIO);
        if enxio && known_size.is_some_and(|size| offset < size) {
            // SAFETY: as above.
            let end = unsafe { libc::lseek(self.raw_fd(), 0, libc::SEEK_END) };
            if end >= 0 {
                return Some(end as u64);
            }
        }
        None
    }

    #[cfg(not(unix))]
    pub fn seek_data(&self, _offset: u64, _known_size: Option<u64>) -> Option<u64> {
        None
    }

    /// Offset of the first hole at or after `offset`, restoring the read
    /// position afterwards. `None` when holes cannot be probed.
    #[cfg(unix)]
    pub fn seek_hole(&self, offset: u64) -> Option<u64> {
        // SAFETY: lseek only inspects the descriptor we own.
        let hole = unsafe { libc::lseek(self.raw_fd(), offset as libc::off_t, libc::SEEK_HOLE) };
        if hole < 0 {
            return None;
        }
        // SAFETY: as above.
        unsafe { libc::lseek(self.raw_fd(), offset as libc::off_t, libc::SEEK_SET) };
        Some(hole as u64)
    }

    #[cfg(not(unix))]
    pub fn seek_hole(&self, _offset: u64) -> Option<u64> {
        None
    }

    /// File type and size of standard input.
    #[cfg(unix)]
    pub fn stat_stdin() -> (bool, Option<u64>) {
        // SAFETY: fstat fills the zeroed struct; descriptor 0 always exists.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(0, &mut st) } == 0 {
            let regular = (st.st_mode & libc::S_IFMT) == libc::S_IFREG;
            (regular, Some(st.st_size as u64))
        } else {
            (false, None)
        }
    }

    #[cfg(not(unix))]
    pub fn stat_stdin() -> (bool, Option<u64>) {
        (false, None)
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.read(buf),
            Self::Stdin(s) => s.read(buf),
        }
    }
}

/// One opened file waiting in (or taken from) the work queue.
pub struct WorkFile {
    pub input: Input,
    /// Resolved display path.
    pub path: String,
    pub is_regular: bool,
    pub size: Option<u64>,
}

impl WorkFile {
    pub fn from_file(file: File, path: String, is_regular: bool, size: u64) -> Self {
        Self {
            input: Input::File(file),
            path,
            is_regular,
            size: Some(size),
        }
    }

    pub fn stdin(label: Option<&str>) -> Self {
        let (is_regular, size) = Input::stat_stdin();
        Self {
            input: Input::Stdin(io::stdin()),
            path: label.unwrap_or(STDIN_LABEL).to_string(),
            is_regular,
            size,
        }
    }

    /// The remaining-size heuristic is only trustworthy for regular files.
    pub fn known_size(&self) -> Option<u64> {
        if self.is_regular {
            self.size
        } else {
            None
        }
    }

    /// Ask the kernel to read ahead; purely advisory.
    pub fn advise_readahead(&self) {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: posix_fadvise only inspects the descriptor we own.
            unsafe {
                libc::posix_fadvise(self.input.raw_fd(), 0, 0, libc::POSIX_FADV_WILLNEED);
            }
        }
    }
}
