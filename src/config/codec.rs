//! Line-oriented `key=value` codec for configuration payloads.
//!
//! The stored payload is plain text: a `#` header comment recording the
//! writer's identity, then one `key=value` line per entry in key order.
//! Round-tripping must be exact, so `\`, newline, carriage return, and (in
//! keys) `=` are backslash-escaped. Comment lines and blank lines are ignored
//! on decode.

use crate::config::ConfigSnapshot;
use thiserror::Error;

/// Payload decoding errors.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Line {line}: missing '=' separator")]
    MissingSeparator { line: usize },

    #[error("Line {line}: invalid escape '\\{escape}'")]
    InvalidEscape { line: usize, escape: char },

    #[error("Line {line}: dangling '\\' at end of line")]
    DanglingEscape { line: usize },

    #[error("Payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a snapshot, stamping the writer's identity into the header.
pub fn encode(snapshot: &ConfigSnapshot, writer: &str) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("# Shared configuration written by {}\n", writer));
    for (key, value) in snapshot.iter() {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push('\n');
    }
    out.into_bytes()
}

/// Decodes a payload produced by [`encode`].
pub fn decode(data: &[u8]) -> CodecResult<ConfigSnapshot> {
    let text = std::str::from_utf8(data)?;
    let mut entries = Vec::new();

    for (idx, line) in text.split('\n').enumerate() {
        let line_no = idx + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let sep = find_separator(line).ok_or(CodecError::MissingSeparator { line: line_no })?;
        let key = unescape(&line[..sep], line_no)?;
        let value = unescape(&line[sep + 1..], line_no)?;
        entries.push((key, value));
    }

    Ok(entries.into_iter().collect())
}

/// Escapes `\`, newline, and carriage return; additionally `=` in keys so the
/// first unescaped `=` is unambiguous on decode.
fn escape(text: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' if is_key => out.push_str("\\="),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(text: &str, line_no: usize) -> CodecResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('=') => out.push('='),
            Some(other) => {
                return Err(CodecError::InvalidEscape {
                    line: line_no,
                    escape: other,
                })
            }
            None => return Err(CodecError::DanglingEscape { line: line_no }),
        }
    }
    Ok(out)
}

/// Finds the byte offset of the first unescaped `=`.
fn find_separator(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '=' {
            return Some(idx);
        }
    }
    None
}
