// src/util.rs — Shared utility functions

/// Truncate a string for display/logging (UTF-8 safe).
///
/// Returns a substring of at most `max_len` bytes, ensuring the cut
/// point falls on a valid UTF-8 character boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

/// Score for terminal output; `-` when absent.
pub fn format_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{s:.1}"),
        None => "-".to_string(),
    }
}

/// Signed score change, e.g. `+2.5`.
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(d) => format!("{d:+.1}"),
        None => "-".to_string(),
    }
}
