/// Marker appended whenever oversized text is cut for display.
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Truncates `text` to at most `max_bytes` of UTF-8, appending an explicit
/// truncation marker when anything was cut. Splits on a char boundary so the
/// result is always valid UTF-8.
pub fn truncate_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

/// Reduces `raw` to a filesystem-safe token: alphanumerics, `-`, `_`, and `.`
/// pass through; runs of anything else collapse to a single `-`.
pub fn sanitize_for_path(raw: &str) -> String {
    let mut normalized = String::new();
    let mut last_was_sep = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            normalized.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            normalized.push('-');
            last_was_sep = true;
        }
    }
    let trimmed = normalized.trim_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_truncate_with_marker_passes_short_text_through() {
        assert_eq!(truncate_with_marker("hello", 10), "hello");
        assert_eq!(truncate_with_marker("hello", 5), "hello");
    }

    #[test]
    fn unit_truncate_with_marker_appends_marker_on_cut() {
        let truncated = truncate_with_marker("hello world", 5);
        assert_eq!(truncated, format!("hello{TRUNCATION_MARKER}"));
    }

    #[test]
    fn regression_truncate_with_marker_respects_char_boundaries() {
        // Multi-byte chars must never be split mid-sequence.
        let text = "héllo wörld";
        for cap in 0..text.len() {
            let truncated = truncate_with_marker(text, cap);
            assert!(truncated.ends_with(TRUNCATION_MARKER));
        }
    }

    #[test]
    fn unit_sanitize_for_path_collapses_unsafe_runs() {
        assert_eq!(sanitize_for_path("owner/repo #7"), "owner-repo-7");
        assert_eq!(sanitize_for_path("sess_01.abc"), "sess_01.abc");
        assert_eq!(sanitize_for_path("///"), "unnamed");
    }
}
