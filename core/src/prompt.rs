//! Prompt recognition shared by the driver and the grading evaluator.
//!
//! Both sides must agree on what counts as a prompt; keeping the regex in
//! one place closes off an otherwise easy way for them to drift apart.

use std::sync::LazyLock;

use regex_lite::Regex;

/// A prompt is `<user@host:cwd>` with an optional trailing whitespace
/// character. USER contains no `@`, HOST no `:`, CWD no `>`.
pub const PROMPT_PATTERN: &str = r"(<[^@]*?@[^:]*?:[^>]*?>\s|<[^@]*?@[^:]*?:[^>]*?>)\s?";

static PROMPT_SEARCH: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    Regex::new(PROMPT_PATTERN).unwrap()
});

static PROMPT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    Regex::new(&format!("^(?:{PROMPT_PATTERN})")).unwrap()
});

static PROMPT_FULL: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    Regex::new(&format!("^(?:{PROMPT_PATTERN})$")).unwrap()
});

static STRICT_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    Regex::new(r"^<([^@]+)@([^:]+):([^>]+)>\s*$").unwrap()
});

/// First prompt occurrence anywhere in `text`, as byte offsets.
pub fn find(text: &str) -> Option<(usize, usize)> {
    PROMPT_SEARCH.find(text).map(|m| (m.start(), m.end()))
}

/// Whether `text` starts with a prompt. This is the test the evaluator uses
/// to split a tail prompt off a command's output slice.
pub fn matches_prefix(text: &str) -> bool {
    PROMPT_PREFIX.is_match(text)
}

/// Whether `text` is exactly one prompt. The driver uses this to decide that
/// the most recent output event ended the current command.
pub fn matches_full(text: &str) -> bool {
    PROMPT_FULL.is_match(text)
}

/// Structural parse of a prompt in strict mode: `(user, host, cwd)`.
/// Returns `None` when the prompt is malformed.
pub fn parse_strict(text: &str) -> Option<(String, String, String)> {
    let caps = STRICT_PROMPT.captures(text.trim())?;
    Some((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn recognizes_plain_prompt() {
        assert!(matches_full("<user@host:/app>"));
        assert!(matches_full("<user@host:/app> "));
        assert!(!matches_full("user@host:/app"));
        assert!(!matches_full("<user@host:/app> extra"));
    }

    #[test]
    fn finds_prompt_mid_stream() {
        let (start, end) = find("garbage<u@h:/app> ").expect("prompt present");
        assert_eq!(start, 7);
        assert_eq!(end, 18);
    }

    #[test]
    fn strict_parse_extracts_fields() {
        assert_eq!(
            parse_strict("<osnuser@osntesting:/app/test> "),
            Some((
                "osnuser".to_string(),
                "osntesting".to_string(),
                "/app/test".to_string()
            ))
        );
        assert_eq!(parse_strict("<@host:/app>"), None);
        assert_eq!(parse_strict("<user@host:>"), None);
    }

    #[test]
    fn prefix_match_tolerates_trailing_content_only_for_splitting() {
        // The evaluator treats any OUTPUT that *starts* like a prompt as the
        // tail prompt of the slice.
        assert!(matches_prefix("<u@h:/app> "));
        assert!(!matches_prefix("echo <u@h:/app>"));
    }
}
