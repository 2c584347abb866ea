//! Small string helpers

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_\-]+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Collapses runs of whitespace into single spaces and trims the ends.
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        let normalized = WHITESPACE_REGEX.replace_all(text.trim(), " ");
        if normalized == text {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(normalized.into_owned())
        }
    }

    /// Keeps the first `max_chars` characters and appends `...` when anything was cut.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => Cow::Owned(format!("{}...", &text[..byte_idx])),
            None => Cow::Borrowed(text),
        }
    }

    /// Filesystem-safe slug of at most `max_chars` characters.
    pub fn sanitize_filename(text: &str, max_chars: usize) -> String {
        let slug = UNSAFE_FILENAME_CHARS.replace_all(text.trim(), "_");
        let slug: String = slug.trim_matches('_').chars().take(max_chars).collect();
        if slug.is_empty() {
            "query".to_string()
        } else {
            slug
        }
    }
}
