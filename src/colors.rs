//! ANSI color configuration and the `GREP_COLORS` parser.
//!
//! Capability values are raw SGR parameter strings (`01;31`), emitted
//! verbatim as `ESC [ <value> m`. Each SGR sequence is normally followed by
//! an erase-to-end-of-line so background colors survive line wrapping; the
//! `ne` capability turns that off.

use std::io::{self, Write};

/// Color palette and color-related switches for one run.
#[derive(Debug, Clone)]
pub struct Colors {
    /// Master switch; when off, no escape sequence is ever written.
    pub enabled: bool,
    /// `rv`: swap selected/context line colors under `-v`.
    pub rv: bool,
    /// Append `EL to Right` after each SGR sequence (cleared by `ne`).
    pub sgr_el: bool,
    pub selected_match: String,
    pub context_match: String,
    pub filename: String,
    pub line_num: String,
    pub byte_num: String,
    pub separator: String,
    pub selected_line: String,
    pub context_line: String,
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            enabled: false,
            rv: false,
            sgr_el: true,
            selected_match: "01;31".to_string(),
            context_match: "01;31".to_string(),
            filename: "35".to_string(),
            line_num: "32".to_string(),
            byte_num: "32".to_string(),
            separator: "36".to_string(),
            selected_line: String::new(),
            context_line: String::new(),
        }
    }
}

impl Colors {
    /// Apply the legacy `GREP_COLOR` variable (sets both match colors).
    /// `GREP_COLORS` assignments applied afterwards take priority.
    pub fn set_legacy_match_color(&mut self, value: &str) {
        self.selected_match = value.to_string();
        self.context_match = value.to_string();
    }

    /// Parse a `GREP_COLORS` string: colon-separated `name=value` pairs
    /// where values may contain only digits and `;`.
    ///
    /// The parse is strict from the first malformed byte onward: everything
    /// before it is kept, the rest of the string is discarded silently.
    /// Unknown capability names are skipped for forward compatibility.
    pub fn parse_grep_colors(&mut self, spec: &str) {
        let bytes = spec.as_bytes();
        let mut name_start = 0;
        let mut val_start: Option<usize> = None;
        let mut i = 0;
        loop {
            match bytes.get(i).copied() {
                Some(b':') | None => {
                    let (name, val) = match val_start {
                        Some(v) => (&spec[name_start..v - 1], Some(&spec[v..i])),
                        None => (&spec[name_start..i], None),
                    };
                    self.assign(name, val);
                    if bytes.get(i).is_none() {
                        return;
                    }
                    i += 1;
                    name_start = i;
                    val_start = None;
                }
                Some(b'=') => {
                    // An empty name or a second '=' ends the parse.
                    if i == name_start || val_start.is_some() {
                        return;
                    }
                    val_start = Some(i + 1);
                    i += 1;
                }
                Some(_) if val_start.is_none() => i += 1,
                Some(b';') | Some(b'0'..=b'9') => i += 1,
                Some(_) => return,
            }
        }
    }

    fn assign(&mut self, name: &str, val: Option<&str>) {
        match name {
            "mt" => {
                if let Some(v) = val {
                    self.selected_match = v.to_string();
                }
                self.context_match = self.selected_match.clone();
            }
            "ms" => {
                if let Some(v) = val {
                    self.selected_match = v.to_string();
                }
            }
            "mc" => {
                if let Some(v) = val {
                    self.context_match = v.to_string();
                }
            }
            "fn" => {
                if let Some(v) = val {
                    self.filename = v.to_string();
                }
            }
            "ln" => {
                if let Some(v) = val {
                    self.line_num = v.to_string();
                }
            }
            "bn" => {
                if let Some(v) = val {
                    self.byte_num = v.to_string();
                }
            }
            "se" => {
                if let Some(v) = val {
                    self.separator = v.to_string();
                }
            }
            "sl" => {
                if let Some(v) = val {
                    self.selected_line = v.to_string();
                }
            }
            "cx" => {
                if let Some(v) = val {
                    self.context_line = v.to_string();
                }
            }
            "rv" => self.rv = true,
            "ne" => self.sgr_el = false,
            _ => {}
        }
    }

    /// Emit an SGR start sequence if `spec` is non-empty.
    pub fn start<W: Write + ?Sized>(&self, out: &mut W, spec: &str) -> io::Result<()> {
        if spec.is_empty() {
            return Ok(());
        }
        if self.sgr_el {
            write!(out, "\x1b[{spec}m\x1b[K")
        } else {
            write!(out, "\x1b[{spec}m")
        }
    }

    /// Emit an SGR reset if the matching `start` would have emitted one.
    pub fn end<W: Write + ?Sized>(&self, out: &mut W, spec: &str) -> io::Result<()> {
        if spec.is_empty() {
            return Ok(());
        }
        if self.sgr_el {
            out.write_all(b"\x1b[m\x1b[K")
        } else {
            out.write_all(b"\x1b[m")
        }
    }

    /// Like [`start`](Self::start), but only when coloring is on.
    pub fn start_if<W: Write + ?Sized>(&self, out: &mut W, spec: &str) -> io::Result<()> {
        if self.enabled {
            self.start(out, spec)?;
        }
        Ok(())
    }

    /// Like [`end`](Self::end), but only when coloring is on.
    pub fn end_if<W: Write + ?Sized>(&self, out: &mut W, spec: &str) -> io::Result<()> {
        if self.enabled {
            self.end(out, spec)?;
        }
        Ok(())
    }
}
