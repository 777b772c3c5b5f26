//! Logging helpers for strings read out of world data (custom item names, entity ids),
//! which may contain newlines, control characters or formatting codes.

/// Longest preview kept when logging an untrusted string.
const MAX_PREVIEW: usize = 120;

/// Render `s` on a single line for logging: backslash, newline, carriage return and
/// tab are escaped, other control characters become `\xNN`, and anything past
/// `MAX_PREVIEW` characters is replaced by an ellipsis.
pub fn escape_log(s: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count == MAX_PREVIEW {
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
