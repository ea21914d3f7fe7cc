//! Binary-content and encoding-error probes.
//!
//! The encoding probe carries a per-locale "unibyte mask": a byte pattern
//! with a bit set for every byte value that cannot stand alone as a valid
//! character. Bytes with all mask bits clear are skipped a machine word at a
//! time; only from the first suspect byte onward is the data actually
//! decoded.

use memchr::memchr;

const WORD: usize = std::mem::size_of::<u64>();

/// True if the buffer contains a NUL byte.
pub fn has_nulls(buf: &[u8]) -> bool {
    memchr(0, buf).is_some()
}

/// Locale-derived detector for encoding errors.
#[derive(Debug, Clone, Copy)]
pub struct EncodingProbe {
    mask: u8,
}

impl EncodingProbe {
    /// Derive the mask from the locale environment: UTF-8 locales mark all
    /// high-bit bytes suspect; unibyte locales have no invalid bytes at all.
    pub fn from_locale() -> Self {
        let locale = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LC_CTYPE"))
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_default();
        let upper = locale.to_ascii_uppercase();
        if upper.contains("UTF-8") || upper.contains("UTF8") {
            Self::utf8()
        } else {
            Self::unibyte()
        }
    }

    pub fn utf8() -> Self {
        Self { mask: 0x80 }
    }

    pub fn unibyte() -> Self {
        Self { mask: 0 }
    }

    /// True if `buf` contains an invalid or incomplete multibyte sequence.
    pub fn has_encoding_errors(&self, buf: &[u8]) -> bool {
        if self.mask == 0 {
            return false;
        }
        match self.first_suspect(buf) {
            Some(i) => std::str::from_utf8(&buf[i..]).is_err(),
            None => false,
        }
    }

    /// Index of the first byte with a mask bit set, skipping clear bytes a
    /// word at a time.
    fn first_suspect(&self, buf: &[u8]) -> Option<usize> {
        let wide = u64::from_ne_bytes([self.mask; WORD]);
        let mut offset = 0;
        let mut chunks = buf.chunks_exact(WORD);
        for chunk in &mut chunks {
            let word = u64::from_ne_bytes(chunk.try_into().expect("exact chunk"));
            if word & wide != 0 {
                let i = chunk
                    .iter()
                    .position(|&b| b & self.mask != 0)
                    .expect("word had a suspect byte");
                return Some(offset + i);
            }
            offset += WORD;
        }
        chunks
            .remainder()
            .iter()
            .position(|&b| b & self.mask != 0)
            .map(|i| offset + i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_nulls() {
        assert!(!has_nulls(b"plain text\n"));
        assert!(has_nulls(b"bin\x00ary"));
        assert!(!has_nulls(b""));
    }

    #[test]
    fn test_unibyte_probe_never_errors() {
        let probe = EncodingProbe::unibyte();
        assert!(!probe.has_encoding_errors(b"\xff\xfe\x80"));
    }

    #[test]
    fn test_utf8_probe_accepts_ascii() {
        let probe = EncodingProbe::utf8();
        assert!(!probe.has_encoding_errors(b"just ascii, nothing else"));
    }

    #[test]
    fn test_utf8_probe_accepts_valid_multibyte() {
        let probe = EncodingProbe::utf8();
        assert!(!probe.has_encoding_errors("naïve — ζώο".as_bytes()));
    }

    #[test]
    fn test_utf8_probe_rejects_invalid_byte() {
        let probe = EncodingProbe::utf8();
        assert!(probe.has_encoding_errors(b"ok so far \xff nope"));
    }

    #[test]
    fn test_utf8_probe_rejects_truncated_sequence() {
        let probe = EncodingProbe::utf8();
        // First two bytes of a three-byte sequence.
        assert!(probe.has_encoding_errors(b"tail \xe2\x82"));
    }

    #[test]
    fn test_suspect_found_past_word_boundary() {
        let probe = EncodingProbe::utf8();
        let mut buf = vec![b'a'; 37];
        buf.push(0xc3);
        buf.push(0xa9); // 'é'
        assert!(!probe.has_encoding_errors(&buf));
        buf.push(0x80); // stray continuation byte
        assert!(probe.has_encoding_errors(&buf));
    }
}
