//! Small helpers shared by the pipeline stages.
//!
//! - Character-safe truncation for summaries and log previews
//! - JSON error classification for truncated provider responses
//! - Origin extraction for per-domain caching

use url::Url;

/// Length of the generated summary when no rewrite provider produced one.
pub const SUMMARY_CHARS: usize = 300;

/// Truncate a string for logging purposes.
///
/// Counts characters, not bytes, so accented and Arabic text never splits
/// inside a code point.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 chars)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => {
            let rest = s[cut..].chars().count();
            format!("{}…(+{} chars)", &s[..cut], rest)
        }
    }
}

/// Default summary for an article body: the first [`SUMMARY_CHARS`]
/// characters followed by `...`.
///
/// The ellipsis is always appended, even for short bodies.
pub fn summarize(body: &str) -> String {
    let cut = body
        .char_indices()
        .nth(SUMMARY_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    format!("{}...", &body[..cut])
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A model response cut off by its token limit fails with an EOF error and is
/// worth asking again; any other parse error is not.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// `scheme://host[:port]` of a URL, used as the per-domain cache key.
pub fn origin_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 chars)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let s = "é".repeat(10);
        assert_eq!(truncate_for_log(&s, 3), "ééé…(+7 chars)");
    }

    #[test]
    fn test_summarize_truncates_at_300_chars() {
        let body = "x".repeat(1000);
        let summary = summarize(&body);
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 3);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summarize_short_body_keeps_ellipsis() {
        assert_eq!(summarize("Court texte."), "Court texte....");
    }

    #[test]
    fn test_summarize_multibyte_body() {
        let body = "ب".repeat(400);
        let summary = summarize(&body);
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"title": "value"#;
        let err = serde_json::from_str::<serde_json::Value>(json_eof).unwrap_err();
        assert!(looks_truncated(&err));

        let err = serde_json::from_str::<serde_json::Value>("{]").unwrap_err();
        assert!(!looks_truncated(&err));
    }

    #[test]
    fn test_origin_of() {
        let url = Url::parse("https://www.seneweb.com/news/politique/article").unwrap();
        assert_eq!(origin_of(&url).as_deref(), Some("https://www.seneweb.com"));

        let url = Url::parse("http://localhost:8080/a").unwrap();
        assert_eq!(origin_of(&url).as_deref(), Some("http://localhost:8080"));
    }
}
