use chrono::{DateTime, Utc};

/// Estimate token count from character length (ceil(chars / 4)).
/// Used for context budgeting only, never for billing.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Truncate to at most `max_chars` characters, appending an ellipsis marker
/// when content was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}\u{2026}", cut)
}

/// Dedup key for near-duplicate detection: first 100 chars, lowercased,
/// whitespace collapsed.
pub fn content_key(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(100).collect::<String>().to_lowercase()
}

/// Human-readable age label ("just now", "5m ago", "3h ago", "2d ago")
pub fn time_delta_label(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    if seconds < 60 {
        "just now".to_string()
    } else if seconds < 3_600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3_600)
    } else {
        format!("{}d ago", seconds / 86_400)
    }
}

/// Strip control characters before text enters a log line or JSONL sink
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() && c != '\n' { ' ' } else { c })
        .collect::<String>()
        .replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("a".repeat(120).as_str()), 30);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "a".repeat(20);
        let truncated = truncate_chars(&long, 10);
        assert_eq!(truncated.chars().count(), 10);
        assert!(truncated.ends_with('\u{2026}'));
    }

    #[test]
    fn test_content_key_normalizes() {
        assert_eq!(content_key("Hello   World"), "hello world");
        let long = "x".repeat(200);
        assert_eq!(content_key(&long).len(), 100);
    }

    #[test]
    fn test_time_delta_label() {
        let now = Utc::now();
        assert_eq!(time_delta_label(now, now), "just now");
        assert_eq!(time_delta_label(now - chrono::Duration::minutes(5), now), "5m ago");
        assert_eq!(time_delta_label(now - chrono::Duration::hours(3), now), "3h ago");
        assert_eq!(time_delta_label(now - chrono::Duration::days(2), now), "2d ago");
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("a\x1b[31mb\nc"), "a [31mb c");
    }
}
