//! Inbound message type and the text scrubbing applied on both sides of the kernel.
//!
//! Input is stripped of characters that confuse the rule interpreter's
//! pattern normalizer. Output is stripped of link schemes and mentions so the
//! bot's own reply never pings anyone or renders a clickable URL.

/// Characters removed from user text before it reaches the kernel.
pub const STRIPPED_INPUT_CHARS: [char; 11] = ['/', '\'', '.', '\\', '(', ')', '"', '\n', '@', '<', '>'];

/// Substrings removed from kernel output before it is sent.
const STRIPPED_OUTPUT_PATTERNS: [&str; 2] = ["://", "@"];

/// Max chars per reply. The platform limit is higher; this leaves headroom.
pub const MAX_RESPONSE_CHARS: usize = 1800;

/// A message delivered by the platform, reduced to what a turn needs.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub channel_id: i64,
    /// Server (guild) the channel belongs to.
    pub server_id: i64,
    pub server_name: String,
    /// None for media-only or service messages.
    pub text: Option<String>,
}

/// Remove every character in [`STRIPPED_INPUT_CHARS`].
pub fn sanitize_input(text: &str) -> String {
    text.chars()
        .filter(|c| !STRIPPED_INPUT_CHARS.contains(c))
        .collect()
}

/// Scrub kernel output and cap its length.
///
/// Removal repeats until nothing matches, since deleting one pattern can join
/// its neighbours into a new one (`"::////"` -> `"://"`).
pub fn clean_response(text: &str) -> String {
    let mut cleaned = text.to_string();
    while STRIPPED_OUTPUT_PATTERNS.iter().any(|p| cleaned.contains(p)) {
        for pattern in STRIPPED_OUTPUT_PATTERNS {
            cleaned = cleaned.replace(pattern, "");
        }
    }
    truncate_chars(&cleaned, MAX_RESPONSE_CHARS).to_string()
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_every_listed_char() {
        let input = "a/b'c.d\\e(f)g\"h\ni@j<k>l";
        assert_eq!(sanitize_input(input), "abcdefghijkl");
    }

    #[test]
    fn test_sanitize_leaves_other_text_alone() {
        assert_eq!(sanitize_input("Hello there, how are you?"), "Hello there, how are you?");
        assert_eq!(sanitize_input("héllo wörld"), "héllo wörld");
    }

    #[test]
    fn test_sanitize_output_has_no_stripped_chars() {
        let inputs = [
            "<@123456> hi",
            "what's (this)?",
            "C:\\path\\to\\file.txt",
            "line one\nline two",
            "\"quoted\" 'single'",
            "http://example.com/page.html",
        ];
        for input in inputs {
            let out = sanitize_input(input);
            assert!(
                !out.chars().any(|c| STRIPPED_INPUT_CHARS.contains(&c)),
                "{input:?} -> {out:?}"
            );
        }
    }

    #[test]
    fn test_clean_removes_scheme_separator() {
        assert_eq!(clean_response("Check http://evil.example"), "Check httpevil.example");
    }

    #[test]
    fn test_clean_removes_mentions() {
        assert_eq!(clean_response("ping @everyone and @here"), "ping everyone and here");
    }

    #[test]
    fn test_clean_handles_patterns_formed_by_removal() {
        for input in ["::////", ":@//", "h:/@/@/x", "@@://@"] {
            let out = clean_response(input);
            assert!(!out.contains("://"), "{input:?} -> {out:?}");
            assert!(!out.contains('@'), "{input:?} -> {out:?}");
        }
    }

    #[test]
    fn test_clean_truncates_long_output() {
        let long = "x".repeat(MAX_RESPONSE_CHARS + 500);
        let out = clean_response(&long);
        assert_eq!(out.chars().count(), MAX_RESPONSE_CHARS);
        assert_eq!(out, &long[..MAX_RESPONSE_CHARS]);
    }

    #[test]
    fn test_clean_keeps_short_output() {
        let exact = "y".repeat(MAX_RESPONSE_CHARS);
        assert_eq!(clean_response(&exact), exact);
        assert_eq!(clean_response("Hi there"), "Hi there");
    }

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        let s = "héllo";
        assert_eq!(truncate_chars(s, 2), "hé");
        assert_eq!(truncate_chars(s, 10), "héllo");
        assert_eq!(truncate_chars(s, 0), "");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let long: String = "ü".repeat(MAX_RESPONSE_CHARS + 1);
        let out = clean_response(&long);
        assert_eq!(out.chars().count(), MAX_RESPONSE_CHARS);
    }
}
