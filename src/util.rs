//! Utility functions for `gemrelay`.
//!
//! This module contains reusable helper functions used across the codebase.

/// Marker appended to replies that were cut to fit the transport limit.
pub const ELLIPSIS: char = '…';

/// Trim a reply to at most `max_chars` characters, marking truncation with a single `…`.
///
/// Length is measured in Unicode scalar values, so multi-byte UTF-8 text (emoji,
/// CJK, Cyrillic) is never split inside a character.
///
/// # Returns
/// * Original string if length <= `max_chars`
/// * Otherwise the first `max_chars - 1` characters with trailing whitespace
///   removed and `…` appended; the result never exceeds `max_chars` characters
///
/// # Examples
/// ```ignore
/// use gemrelay::util::trim_reply;
///
/// assert_eq!(trim_reply("hello", 10), "hello");
/// assert_eq!(trim_reply("hello world", 7), "hello…");
/// assert_eq!(trim_reply("hello", 1), "…");
/// ```
pub fn trim_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = max_chars.saturating_sub(1);
    let end = text
        .char_indices()
        .nth(cut)
        .map_or(text.len(), |(idx, _)| idx);

    let mut trimmed = text[..end].trim_end().to_string();
    trimmed.push(ELLIPSIS);
    trimmed
}

/// Return the greatest valid UTF-8 char boundary at or below `index`.
///
/// This mirrors `str::floor_char_boundary` behavior while remaining compatible
/// with stable toolchains where that API is not available.
pub fn floor_utf8_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }

    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
