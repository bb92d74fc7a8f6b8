//! Keeps player-supplied text (home and warp names, chat input) on one log line.

const MAX_PREVIEW: usize = 120;

/// Escape control characters so the value cannot break a log line.
///
/// Backslash, `\n`, `\r` and `\t` get their usual escapes; any other control
/// character becomes `\xNN`. Values longer than the preview limit are cut with `…`.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
