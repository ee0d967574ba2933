//! Post → Telegram-HTML message formatting.
//!
//! Telegram HTML supports only a small subset: `<b>`, `<i>`, `<code>`,
//! `<pre>`, `<a href="...">`.

use chrono::{DateTime, Utc};

use crate::domain::Post;

const SUMMARY_MAX_CHARS: usize = 500;

/// Escape HTML special chars for Telegram `parse_mode=HTML`.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render one forum post as a channel message.
pub fn format_post(post: &Post) -> String {
    let mut lines = Vec::new();
    lines.push(format!("<b>{}</b>", escape_html(&post.title)));
    lines.push(format!(
        "{} · {}",
        escape_html(&post.author),
        format_publish_time(post.published_at)
    ));

    let summary = truncate_chars(post.summary.trim(), SUMMARY_MAX_CHARS);
    if !summary.is_empty() {
        lines.push(String::new());
        lines.push(escape_html(&summary));
    }

    lines.push(String::new());
    lines.push(format!("<a href=\"{}\">View thread</a>", post.url));
    lines.join("\n")
}

fn format_publish_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "unknown time".to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PostId;
    use chrono::TimeZone;

    fn post() -> Post {
        Post {
            id: PostId(42),
            title: "Deals & <steals>".to_string(),
            author: "alice".to_string(),
            summary: "Big sale today".to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
            url: "https://forum.example/forum.php?mod=viewthread&tid=42".to_string(),
        }
    }

    #[test]
    fn escapes_html_specials() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn formats_title_author_time_and_link() {
        let msg = format_post(&post());
        assert!(msg.starts_with("<b>Deals &amp; &lt;steals&gt;</b>\n"));
        assert!(msg.contains("alice · 2024-05-01 12:30"));
        assert!(msg.contains("Big sale today"));
        assert!(msg.ends_with("<a href=\"https://forum.example/forum.php?mod=viewthread&tid=42\">View thread</a>"));
    }

    #[test]
    fn omits_empty_summary_block() {
        let mut p = post();
        p.summary = "   ".to_string();
        let msg = format_post(&p);
        assert!(!msg.contains("\n\n\n"));
    }

    #[test]
    fn truncates_long_summaries() {
        let mut p = post();
        p.summary = "x".repeat(SUMMARY_MAX_CHARS + 100);
        let msg = format_post(&p);
        assert!(msg.contains(&format!("{}...", "x".repeat(SUMMARY_MAX_CHARS))));
    }

    #[test]
    fn unknown_publish_time_is_rendered() {
        let mut p = post();
        p.published_at = None;
        assert!(format_post(&p).contains("unknown time"));
    }
}
