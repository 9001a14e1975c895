//! Helpers that keep log lines about mesh traffic readable.
//!
//! Message bodies arrive from arbitrary radios and may contain newlines, control bytes
//! or very long text. Everything that ends up in a log line goes through here first.

use std::fmt::Write;

/// Longest body preview (in chars) written to the log.
pub const MAX_LOG_PREVIEW: usize = 120;

/// Escape a message body so it fits on one log line and cap it at [`MAX_LOG_PREVIEW`]
/// characters, appending `…` when something was cut.
pub fn escape_log(s: &str) -> String {
    escape_log_max(s, MAX_LOG_PREVIEW)
}

/// Same as [`escape_log`] with an explicit character limit.
pub fn escape_log_max(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 4);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
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

/// Short hex dump used in trace logs for raw frames.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push('…');
    }
    out
}
