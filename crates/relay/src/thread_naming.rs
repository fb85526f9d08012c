use crate::limits::THREAD_NAME_MAX;

const SESSION_PREFIX_LEN: usize = 8;

/// `"<prefix> <first 8 chars of session>"`, whitespace collapsed, within
/// Discord's thread name limit.
pub fn thread_name(prefix: &str, session_id: &str) -> String {
    let short: String = session_id.trim().chars().take(SESSION_PREFIX_LEN).collect();
    let raw = format!("{} {}", prefix, short);
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return "Session".to_string();
    }

    let mut out = String::new();
    for ch in normalized.chars().take(THREAD_NAME_MAX) {
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::thread_name;
    use crate::limits::THREAD_NAME_MAX;

    #[test]
    fn uses_prefix_and_short_session() {
        assert_eq!(
            thread_name("Session", "abc12345-6789-4def"),
            "Session abc12345"
        );
        assert_eq!(thread_name("Session", "abc"), "Session abc");
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(thread_name("  Claude \t run ", "abc"), "Claude run abc");
        assert_eq!(thread_name("   ", "   "), "Session");
    }

    #[test]
    fn caps_at_thread_name_limit() {
        let name = thread_name(&"p".repeat(150), "abcdefgh");
        assert_eq!(name.chars().count(), THREAD_NAME_MAX);
    }
}
