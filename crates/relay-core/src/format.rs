//! Text helpers for chat transports.
//!
//! Telegram rejects messages longer than 4096 characters and HTML messages
//! with unescaped markup, so everything that reaches the transport goes
//! through these helpers.

/// Largest message part the relay sends, leaving headroom under Telegram's 4096 limit.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// Escape HTML special characters for Telegram HTML mode.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Truncate to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = s.chars().take(keep).collect();
    out.push('…');
    out
}

/// Split text into parts of at most `limit` characters.
///
/// Prefers to break after a newline, then after a space, and only cuts
/// inside a word when a single line is longer than `limit`.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let hard_end = byte_index_of_char(rest, limit);
        let window = &rest[..hard_end];

        let cut = window
            .rfind('\n')
            .map(|i| i + 1)
            .or_else(|| window.rfind(' ').map(|i| i + 1))
            .unwrap_or(hard_end);

        parts.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

/// Format a duration given in milliseconds (`850ms`, `12.3s`, `2m 05s`).
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Format a USD cost with four decimals.
pub fn format_cost(usd: f64) -> String {
    format!("${:.4}", usd)
}

fn byte_index_of_char(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_multibyte() {
        let out = truncate_chars("привет мир", 5);
        assert_eq!(out, "прив…");
        assert_eq!(out.chars().count(), 5);
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hi", 10), vec!["hi".to_string()]);
        assert_eq!(split_message("", 10), vec![String::new()]);
    }

    #[test]
    fn test_split_prefers_newlines() {
        let text = "line one\nline two\nline three";
        let parts = split_message(text, 12);
        assert_eq!(parts[0], "line one\n");
        assert!(parts.iter().all(|p| p.chars().count() <= 12));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_hard_cut() {
        let text = "x".repeat(25);
        let parts = split_message(&text, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "xxxxx");
    }

    #[test]
    fn test_split_telegram_limit() {
        let text = "word ".repeat(2000);
        let parts = split_message(&text, MAX_MESSAGE_LENGTH);
        assert!(parts.len() >= 3);
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_MESSAGE_LENGTH));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(850), "850ms");
        assert_eq!(format_duration_ms(12_345), "12.3s");
        assert_eq!(format_duration_ms(125_000), "2m 05s");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.01234), "$0.0123");
    }
}
