//! Minimal SQL scanner.
//!
//! Splits SQL text into code and opaque spans. Opaque spans are string
//! literals, quoted identifiers, comments and (for PostgreSQL) dollar-quoted
//! bodies; every rewrite in this crate only touches code spans, so markers
//! inside a literal such as `'10:30'` or `'100%'` survive untouched.

use crate::error::DbResult;
use crate::models::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Code,
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    /// Byte offset of the span in the original text.
    pub start: usize,
    pub text: &'a str,
    pub kind: SpanKind,
}

/// Split `sql` into alternating code and opaque spans.
pub fn split(sql: &str, dialect: Dialect) -> Vec<Span<'_>> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let next = bytes.get(idx + 1).copied();
        let opaque_end = match bytes[idx] {
            b'\'' => Some(quoted_end(
                bytes,
                idx,
                b'\'',
                dialect == Dialect::MySql || escape_string_prefix(bytes, idx, dialect),
            )),
            b'"' => Some(quoted_end(bytes, idx, b'"', dialect == Dialect::MySql)),
            b'`' if dialect == Dialect::MySql => Some(quoted_end(bytes, idx, b'`', false)),
            b'[' if dialect == Dialect::Mssql => Some(quoted_end(bytes, idx, b']', false)),
            b'-' if next == Some(b'-') => Some(line_comment_end(bytes, idx)),
            b'/' if next == Some(b'*') => Some(block_comment_end(bytes, idx)),
            b'$' if dialect == Dialect::Postgres => dollar_quote_end(sql, idx),
            _ => None,
        };

        match opaque_end {
            Some(end) => {
                if start < idx {
                    spans.push(Span {
                        start,
                        text: &sql[start..idx],
                        kind: SpanKind::Code,
                    });
                }
                spans.push(Span {
                    start: idx,
                    text: &sql[idx..end],
                    kind: SpanKind::Opaque,
                });
                idx = end;
                start = end;
            }
            None => idx += 1,
        }
    }

    if start < bytes.len() {
        spans.push(Span {
            start,
            text: &sql[start..],
            kind: SpanKind::Code,
        });
    }
    spans
}

/// Rewrite the code spans of `sql`, copying opaque spans verbatim.
pub fn rewrite_code<F>(sql: &str, dialect: Dialect, mut rewrite: F) -> DbResult<String>
where
    F: FnMut(&str, &mut String) -> DbResult<()>,
{
    let mut out = String::with_capacity(sql.len() + 16);
    for span in split(sql, dialect) {
        match span.kind {
            SpanKind::Code => rewrite(span.text, &mut out)?,
            SpanKind::Opaque => out.push_str(span.text),
        }
    }
    Ok(out)
}

pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Identifier starting at `idx`, if any.
pub fn ident_at(text: &str, idx: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if !bytes.get(idx).copied().is_some_and(is_ident_start) {
        return None;
    }
    let end = bytes[idx..]
        .iter()
        .position(|b| !is_ident_char(*b))
        .map(|p| idx + p)
        .unwrap_or(bytes.len());
    Some(&text[idx..end])
}

/// `:name` bind marker at `idx`: a colon not part of a `::` cast, followed by
/// an identifier. Returns the name.
pub fn colon_marker_at(text: &str, idx: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(idx) != Some(&b':') {
        return None;
    }
    if idx > 0 && bytes[idx - 1] == b':' {
        return None;
    }
    ident_at(text, idx + 1)
}

/// Names of all `:name` markers in the code spans, in order of appearance.
pub fn colon_markers(sql: &str, dialect: Dialect) -> Vec<String> {
    let mut names = Vec::new();
    for span in split(sql, dialect) {
        if span.kind != SpanKind::Code {
            continue;
        }
        let mut idx = 0;
        while idx < span.text.len() {
            match colon_marker_at(span.text, idx) {
                Some(name) => {
                    names.push(name.to_string());
                    idx += name.len() + 1;
                }
                None => idx += 1,
            }
        }
    }
    names
}

/// Byte offset of the last `ORDER BY` outside parentheses, literals and comments.
pub fn top_level_order_by(sql: &str, dialect: Dialect) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut found = None;

    for span in split(sql, dialect) {
        if span.kind != SpanKind::Code {
            continue;
        }
        let bytes = span.text.as_bytes();
        let mut idx = 0;
        while idx < bytes.len() {
            match bytes[idx] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                b'o' | b'O' if depth == 0 => {
                    if let Some(len) = order_by_len(span.text, idx) {
                        found = Some(span.start + idx);
                        idx += len;
                        continue;
                    }
                }
                _ => {}
            }
            idx += 1;
        }
    }
    found
}

/// Length of an `ORDER <ws> BY` keyword pair starting at `idx`.
fn order_by_len(text: &str, idx: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if idx > 0 && is_ident_char(bytes[idx - 1]) {
        return None;
    }
    let word = ident_at(text, idx)?;
    if !word.eq_ignore_ascii_case("order") {
        return None;
    }
    let mut pos = idx + word.len();
    let ws_start = pos;
    while bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        pos += 1;
    }
    if pos == ws_start {
        return None;
    }
    let by = ident_at(text, pos)?;
    if !by.eq_ignore_ascii_case("by") {
        return None;
    }
    Some(pos + by.len() - idx)
}

/// Trim whitespace and trailing statement terminators.
pub fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// PostgreSQL `E'...'` literal: the quote follows a standalone `E`.
fn escape_string_prefix(bytes: &[u8], quote: usize, dialect: Dialect) -> bool {
    if dialect != Dialect::Postgres || quote == 0 {
        return false;
    }
    if !matches!(bytes[quote - 1], b'E' | b'e') {
        return false;
    }
    quote == 1 || !is_ident_char(bytes[quote - 2])
}

fn quoted_end(bytes: &[u8], open: usize, close: u8, backslash_escapes: bool) -> usize {
    let mut idx = open + 1;
    while idx < bytes.len() {
        let b = bytes[idx];
        if backslash_escapes && b == b'\\' {
            idx += 2;
            continue;
        }
        if b == close {
            // doubled delimiter is an escaped delimiter
            if bytes.get(idx + 1) == Some(&close) {
                idx += 2;
                continue;
            }
            return idx + 1;
        }
        idx += 1;
    }
    bytes.len()
}

fn line_comment_end(bytes: &[u8], open: usize) -> usize {
    bytes[open..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|p| open + p + 1)
        .unwrap_or(bytes.len())
}

fn block_comment_end(bytes: &[u8], open: usize) -> usize {
    let mut depth = 1;
    let mut idx = open + 2;
    while idx < bytes.len() {
        if bytes[idx] == b'/' && bytes.get(idx + 1) == Some(&b'*') {
            depth += 1;
            idx += 2;
        } else if bytes[idx] == b'*' && bytes.get(idx + 1) == Some(&b'/') {
            depth -= 1;
            idx += 2;
            if depth == 0 {
                return idx;
            }
        } else {
            idx += 1;
        }
    }
    bytes.len()
}

/// End of a `$tag$ ... $tag$` body starting at `open`, if one starts there.
fn dollar_quote_end(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    if open > 0 && is_ident_char(bytes[open - 1]) {
        return None;
    }
    let mut idx = open + 1;
    if bytes.get(idx).is_some_and(|b| is_ident_start(*b)) {
        while bytes.get(idx).is_some_and(|b| is_ident_char(*b)) {
            idx += 1;
        }
    }
    if bytes.get(idx) != Some(&b'$') {
        return None;
    }
    let tag = &sql[open..=idx];
    let body_start = idx + 1;
    Some(
        sql[body_start..]
            .find(tag)
            .map(|p| body_start + p + tag.len())
            .unwrap_or(bytes.len()),
    )
}
