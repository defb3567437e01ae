//! Outbound text shaping against a platform's message-size ceiling.

/// Truncate `text` to fit `ceiling` bytes: content is cut at a UTF-8
/// boundary at most `ceiling - 4` bytes in, with a trailing ellipsis.
pub fn truncate_to_ceiling(text: &str, ceiling: usize) -> String {
    if text.len() <= ceiling {
        return text.to_string();
    }
    let budget = ceiling.saturating_sub(4);
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = text[..cut].to_string();
    out.push('…');
    out
}

/// Split `text` into chunks of at most `max` bytes, preferring newline then
/// space boundaries so words are not cut mid-way.
pub fn split_chunks(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > max {
        let mut window_end = max;
        while window_end > 0 && !remaining.is_char_boundary(window_end) {
            window_end -= 1;
        }
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches(['\n', ' ']);
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Standard task-complete framing; `raw` posts skip this.
pub fn task_complete(session: &str, body: &str) -> String {
    format!("**{session}**\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_ceiling("hello", 2000), "hello");
    }

    #[test]
    fn truncation_respects_budget_and_appends_ellipsis() {
        let text = "x".repeat(3000);
        let out = truncate_to_ceiling(&text, 2000);
        assert!(out.len() <= 2000);
        assert!(out.ends_with('…'));
        assert_eq!(out.len(), 1996 + '…'.len_utf8());
    }

    #[test]
    fn truncation_preserves_utf8_boundaries() {
        // multibyte chars positioned to straddle the cut point
        let text = "é".repeat(1200);
        let out = truncate_to_ceiling(&text, 2000);
        assert!(out.len() <= 2000);
        assert!(std::str::from_utf8(out.as_bytes()).is_ok());
        assert!(out.ends_with('…'));
    }

    #[test]
    fn chunks_split_on_newline_first() {
        let line = "a".repeat(1500);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text, 1950);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.len() <= 1950);
        }
    }

    #[test]
    fn unbroken_text_still_splits() {
        let text = "x".repeat(5000);
        let chunks = split_chunks(&text, 1950);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 1950));
        assert_eq!(chunks.concat().len(), 5000);
    }
}
