//! EDF tokeniser.
//!
//! Splits dotenv text into `KEY=VALUE` entries carrying byte-exact
//! spans into the original input, plus the byte offset at which every
//! line begins. Malformed lines never fail the parse; they simply
//! produce no entry. The only hard error is non-UTF-8 input.

use std::sync::Arc;

use crate::fingerprint;
use crate::{Error, QuoteType, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Emit entries for `#KEY=VALUE`-shaped comment lines.
    pub include_comments: bool,
    /// Compute the line-offset table.
    pub track_positions: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            include_comments: true,
            track_positions: true,
        }
    }
}

/// One parsed `KEY=VALUE` record. All string fields borrow the input;
/// offsets are absolute byte positions into it.
///
/// For quoted values the span excludes the outer quotes: `value_start`
/// is one past the opening quote and `value_end` sits on the closing
/// quote. Line numbers are 1-indexed; `value_end_line` exceeds
/// `line_number` only for multi-line double-quoted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub key: &'a str,
    pub value: &'a str,
    pub key_start: usize,
    pub key_end: usize,
    pub value_start: usize,
    pub value_end: usize,
    pub line_number: usize,
    pub value_end_line: usize,
    pub quote_type: QuoteType,
    pub is_exported: bool,
    pub is_comment: bool,
}

/// Entries in input order plus the line-offset table:
/// `line_offsets[i]` is the byte offset where 1-indexed line `i + 1`
/// begins, so `column = byte_offset - line_offsets[line - 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult<'a> {
    pub entries: Vec<Entry<'a>>,
    pub line_offsets: Vec<usize>,
}

/// Parse `input` into entries and line offsets.
///
/// Default options go through the process-global parse cache; other
/// option combinations parse directly.
pub fn parse(input: &[u8], options: ParseOptions) -> Result<ParseResult<'_>, Error> {
    let text = std::str::from_utf8(input)?;
    let raw: Arc<RawParse> = if options == ParseOptions::default() {
        fingerprint::parse_cached(text)
    } else {
        Arc::new(scan(text))
    };
    let entries = raw
        .entries
        .iter()
        .filter(|raw| options.include_comments || !raw.is_comment)
        .filter_map(|raw| raw.view(text))
        .collect();
    let line_offsets = if options.track_positions {
        raw.line_offsets.clone()
    } else {
        Vec::new()
    };
    Ok(ParseResult {
        entries,
        line_offsets,
    })
}

// ───────────────────────── raw scan ─────────────────────────

/// Position-only parse, safe to cache across inputs that share a
/// fingerprint: every range is re-checked before it is re-borrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawParse {
    pub entries: Vec<RawEntry>,
    pub line_offsets: Vec<usize>,
}

impl RawParse {
    pub(crate) fn spans_valid(&self, text: &str) -> bool {
        let line_count = self.line_offsets.len();
        self.line_offsets.last().map_or(true, |&last| last <= text.len())
            && self.entries.iter().all(|raw| {
                raw.value_end_line <= line_count && raw.view(text).is_some()
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawEntry {
    pub key: Span,
    pub value: Span,
    pub line_number: usize,
    pub value_end_line: usize,
    pub quote_type: QuoteType,
    pub is_exported: bool,
    pub is_comment: bool,
}

impl RawEntry {
    /// Re-borrow the entry from `text`; `None` if any range fails to
    /// land on character boundaries within it.
    pub(crate) fn view<'a>(&self, text: &'a str) -> Option<Entry<'a>> {
        let key = text.get(self.key.start..self.key.end)?;
        let value = text.get(self.value.start..self.value.end)?;
        Some(Entry {
            key,
            value,
            key_start: self.key.start,
            key_end: self.key.end,
            value_start: self.value.start,
            value_end: self.value.end,
            line_number: self.line_number,
            value_end_line: self.value_end_line,
            quote_type: self.quote_type,
            is_exported: self.is_exported,
            is_comment: self.is_comment,
        })
    }
}

pub(crate) fn scan(text: &str) -> RawParse {
    let bytes = text.as_bytes();
    let line_offsets = build_line_offsets(bytes);
    let mut entries = Vec::new();
    let mut li = 0;
    while li < line_offsets.len() {
        li = scan_line(bytes, &line_offsets, li, &mut entries);
    }
    RawParse {
        entries,
        line_offsets,
    }
}

fn build_line_offsets(bytes: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(bytes.len() / 24 + 1);
    offsets.push(0);
    for nl in memchr::memchr_iter(b'\n', bytes) {
        offsets.push(nl + 1);
    }
    offsets
}

/// 0-based index of the line containing `offset`.
fn line_index_of(offsets: &[usize], offset: usize) -> usize {
    match offsets.binary_search(&offset) {
        Ok(idx) => idx,
        Err(0) => 0,
        Err(idx) => idx - 1,
    }
}

/// Scan the line at index `li`; returns the index to resume at (more
/// than `li + 1` when a double-quoted value swallowed further lines).
fn scan_line(bytes: &[u8], offsets: &[usize], li: usize, entries: &mut Vec<RawEntry>) -> usize {
    let line_start = offsets[li];
    let terminated = li + 1 < offsets.len();
    let mut end = if terminated {
        offsets[li + 1] - 1
    } else {
        bytes.len()
    };
    if end > line_start && bytes[end - 1] == b'\r' {
        end -= 1; // CRLF
    }

    let mut i = line_start;
    if line_start == 0 && bytes.starts_with(b"\xEF\xBB\xBF") {
        i = 3; // BOM belongs to no entry
    }
    i = skip_space(bytes, i, end);
    if i >= end {
        return li + 1; // blank
    }

    let mut is_comment = false;
    if bytes[i] == b'#' {
        is_comment = true;
        i = skip_space(bytes, i + 1, end);
        if i >= end {
            return li + 1;
        }
    }

    let mut is_exported = false;
    if end - i > 6 && &bytes[i..i + 6] == b"export" && is_space(bytes[i + 6]) {
        is_exported = true;
        i = skip_space(bytes, i + 6, end);
        if i >= end {
            return li + 1;
        }
    }

    // KEY = [A-Za-z_][A-Za-z0-9_]*
    let key_start = i;
    if !(bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        return li + 1;
    }
    i += 1;
    while i < end && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    let key_end = i;
    i = skip_space(bytes, i, end);
    if i >= end || bytes[i] != b'=' {
        return li + 1;
    }
    i = skip_space(bytes, i + 1, end);

    let line_number = li + 1;
    let key = Span::new(key_start, key_end);

    if i < end && bytes[i] == b'\'' {
        // Single-quoted: next quote on the same line, EOL if unterminated.
        let value_start = i + 1;
        let value_end = match memchr::memchr(b'\'', &bytes[value_start..end]) {
            Some(off) => value_start + off,
            None => end,
        };
        entries.push(RawEntry {
            key,
            value: Span::new(value_start, value_end),
            line_number,
            value_end_line: line_number,
            quote_type: QuoteType::Single,
            is_exported,
            is_comment,
        });
        return li + 1;
    }

    if i < end && bytes[i] == b'"' {
        // Double-quoted: next unescaped quote, possibly on a later
        // line. Comment entries stay line-scoped; EOF terminates an
        // unterminated value.
        let value_start = i + 1;
        let bound = if is_comment { end } else { bytes.len() };
        let mut value_end = bound;
        let mut j = value_start;
        while j < bound {
            match bytes[j] {
                b'\\' => j += 2,
                b'"' => {
                    value_end = j;
                    break;
                }
                _ => j += 1,
            }
        }
        let value_end_line = if value_end > value_start {
            line_index_of(offsets, value_end - 1) + 1
        } else {
            line_number
        };
        entries.push(RawEntry {
            key,
            value: Span::new(value_start, value_end),
            line_number,
            value_end_line,
            quote_type: QuoteType::Double,
            is_exported,
            is_comment,
        });
        return line_index_of(offsets, value_end) + 1;
    }

    // Unquoted: up to EOL or an inline comment ('#' preceded by a
    // space or tab), trailing whitespace excluded.
    let value_start = i;
    let mut value_end = end;
    let mut k = value_start;
    while let Some(off) = memchr::memchr(b'#', &bytes[k..end]) {
        let at = k + off;
        if at > line_start && is_space(bytes[at - 1]) {
            value_end = at;
            break;
        }
        k = at + 1;
    }
    while value_end > value_start && is_space(bytes[value_end - 1]) {
        value_end -= 1;
    }
    entries.push(RawEntry {
        key,
        value: Span::new(value_start, value_end),
        line_number,
        value_end_line: line_number,
        quote_type: QuoteType::None,
        is_exported,
        is_comment,
    });
    li + 1
}

// ───── helpers ─────

#[inline]
fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

#[inline]
fn skip_space(bytes: &[u8], mut idx: usize, end: usize) -> usize {
    while idx < end && is_space(bytes[idx]) {
        idx += 1;
    }
    idx
}
