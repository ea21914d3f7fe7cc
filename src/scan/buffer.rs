//! Streaming input buffer.
//!
//! The live data sits between a one-byte backward sentinel (always the
//! end-of-line byte, so backward line scans stop without bounds checks) and
//! one machine word of zeroed slop (so word-wide probes may read a little
//! past the end). Layout:
//!
//! ```text
//! [ sentinel ][ data: beg..lim ][ >= WORD zeroed bytes ]
//! ```
//!
//! Refills keep a caller-chosen suffix of the old data (`save`) as the new
//! head: the residue of an incomplete trailing line plus any lines needed as
//! leading context.

use std::io::{self, Read};

use crate::input::Input;

/// Initial data capacity, not counting sentinel and slop.
pub const INITIAL_BUFSIZE: usize = 32 * 1024;

/// Read granularity; reads are multiples of this.
const PAGESIZE: usize = 4096;

const WORD: usize = std::mem::size_of::<u64>();

pub struct ScanBuffer {
    buf: Vec<u8>,
    beg: usize,
    lim: usize,
    offset: u64,
    eol: u8,
    /// Treat all-zero chunks as runs of line terminators and try to leap
    /// over file holes.
    pub skip_nuls: bool,
    /// A failed `SEEK_DATA` disables further attempts for this file.
    pub seek_data_failed: bool,
}

impl ScanBuffer {
    pub fn new(eol: u8) -> Self {
        let mut buf = vec![0u8; 1 + INITIAL_BUFSIZE + WORD];
        buf[0] = eol;
        Self {
            buf,
            beg: 1,
            lim: 1,
            offset: 0,
            eol,
            skip_nuls: false,
            seek_data_failed: false,
        }
    }

    /// Prepare for a new file whose first unread byte sits at
    /// `start_offset` (nonzero only for an already-consumed stdin).
    pub fn reset(&mut self, eol: u8, start_offset: u64) {
        self.eol = eol;
        self.buf[0] = eol;
        self.beg = 1;
        self.lim = 1;
        self.offset = start_offset;
        self.skip_nuls = false;
        self.seek_data_failed = false;
    }

    /// Index of the first live byte. `bytes()[beg() - 1]` is the sentinel.
    pub fn beg(&self) -> usize {
        self.beg
    }

    /// One past the last live byte.
    pub fn lim(&self) -> usize {
        self.lim
    }

    /// Input offset corresponding to `lim()`.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn data_capacity(&self) -> usize {
        self.buf.len() - 1 - WORD
    }

    /// Append one end-of-line byte after the live data (used once, at
    /// end-of-file, to terminate a residue). The slop word guarantees room.
    pub fn push_eol(&mut self) {
        self.buf[self.lim] = self.eol;
        self.lim += 1;
    }

    /// Refill from `input`, keeping the last `save` live bytes as the new
    /// head. Grows geometrically until `save` plus one page fits, holding
    /// growth near the remaining file size when that is known.
    ///
    /// Returns the number of input bytes skipped as virtual end-of-line
    /// bytes (all-zero chunks and leapt-over holes); the caller accounts
    /// them as line terminators.
    pub fn fill(
        &mut self,
        input: &mut Input,
        save: usize,
        known_size: Option<u64>,
    ) -> io::Result<u64> {
        let saved_start = self.lim - save;
        self.buf.copy_within(saved_start..self.lim, 1);
        self.beg = 1;
        self.lim = 1 + save;
        self.buf[0] = self.eol;

        let minsize = save + PAGESIZE;
        let mut newsize = self.data_capacity();
        while newsize < minsize {
            newsize = newsize
                .checked_mul(2)
                .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "buffer too large"))?;
        }
        if let Some(size) = known_size {
            let remaining = size.saturating_sub(self.offset);
            let wanted = save as u64 + remaining;
            if remaining > 0
                && wanted >= minsize as u64
                && wanted <= usize::MAX as u64
                && (wanted as usize) < newsize
            {
                newsize = wanted as usize;
            }
        }
        if newsize > self.data_capacity() {
            self.buf.resize(1 + newsize + WORD, 0);
        }

        let mut readsize = self.data_capacity() - save;
        readsize -= readsize % PAGESIZE;

        let mut skipped = 0u64;
        loop {
            let dst = self.lim;
            let n = loop {
                match input.read(&mut self.buf[dst..dst + readsize]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            self.offset += n as u64;

            if n == 0 || !self.skip_nuls || !all_zeros(&self.buf[dst..dst + n]) {
                self.lim = dst + n;
                break;
            }

            // A whole chunk of zeros: count it as that many terminators and
            // try to leap straight to the next data region.
            skipped += n as u64;
            if !self.seek_data_failed {
                match input.seek_data(self.offset, known_size) {
                    Some(data_start) => {
                        skipped += data_start - self.offset;
                        self.offset = data_start;
                    }
                    None => self.seek_data_failed = true,
                }
            }
        }

        let lim = self.lim;
        self.buf[lim..lim + WORD].fill(0);
        Ok(skipped)
    }
}

fn all_zeros(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}
