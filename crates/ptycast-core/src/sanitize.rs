//! Terminal-identity response stripping.
//!
//! Interactive programs probe the terminal with a Device Attributes query and
//! the answering sequence (e.g. `ESC [ ? 1 ; 2 c`) can surface in captured
//! output, or arrive as forged input from an observer. Neither may reach
//! history, the fan-out, or the process input stream, so every chunk passes
//! through here first. Chunks that sanitize to empty are dropped by callers.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Matches a Device Attributes response: an escape introducer (or a bare `[`
/// left over when a terminal layer already consumed the ESC), a `?` or `>`
/// marker, digits/semicolons, terminated by `c`.
fn da_response_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?:\x1b\[|\[)[?>][0-9;]*c").expect("device attributes regex must compile")
    })
}

/// Remove every Device Attributes response from `text`, leaving all
/// surrounding bytes untouched. Pure and stateless.
pub fn strip_device_attributes(text: &str) -> Cow<'_, str> {
    da_response_regex().replace_all(text, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_response_with_esc_prefix() {
        assert_eq!(strip_device_attributes("\x1b[?1;2c"), "");
        assert_eq!(strip_device_attributes("hi\x1b[?1;2c\r\n"), "hi\r\n");
    }

    #[test]
    fn removes_response_without_esc_prefix() {
        assert_eq!(strip_device_attributes("[?1;2c"), "");
        assert_eq!(strip_device_attributes("hi[?1;2c\r\n"), "hi\r\n");
    }

    #[test]
    fn removes_secondary_attributes_marker() {
        assert_eq!(strip_device_attributes("a\x1b[>0c b"), "a b");
    }

    #[test]
    fn removes_every_occurrence() {
        assert_eq!(strip_device_attributes("\x1b[?1;2cmid[>65;1;9ctail"), "midtail");
    }

    #[test]
    fn leaves_ordinary_sequences_alone() {
        // Cursor movement and color sequences are terminal output, not
        // identity responses, and must survive byte-identical.
        let s = "\x1b[2J\x1b[1;31mred\x1b[0m [plain] c";
        assert_eq!(strip_device_attributes(s), s);
    }

    #[test]
    fn borrows_when_nothing_matches() {
        assert!(matches!(strip_device_attributes("hello"), Cow::Borrowed(_)));
    }
}
