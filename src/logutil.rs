//! Helpers that keep log lines single-line and bounded when they carry
//! broker-supplied content (topics, chat text, raw payload bytes).

use std::fmt::Write;

const MAX_PREVIEW_CHARS: usize = 200;

/// Escape a string for single-line logging.
///
/// Newlines, carriage returns, tabs and backslashes are written as their escape
/// sequences and other control characters as `\xNN`. Output is capped at
/// 200 characters with a trailing `…`.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW_CHARS) + 4);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW_CHARS {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lowercase hex of at most `max` leading bytes, with `…` when truncated.
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2 + 3);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push('…');
    }
    out
}
