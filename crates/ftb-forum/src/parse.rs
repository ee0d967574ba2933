//! Pure HTML extraction helpers for Discuz pages.
//!
//! Discuz markup is stable enough that targeted regexes beat a full DOM
//! pass for the handful of fields we need.

use chrono::{NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use ftb_core::domain::{Post, PostId};

/// Compile a pattern once, on first use. These run on every poll cycle.
macro_rules! regex {
    ($pat:expr) => {{
        static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| Regex::new($pat).expect("valid regex"))
    }};
}

/// Tokens scraped from the login page form.
#[derive(Clone, Debug)]
pub struct LoginForm {
    pub loginhash: String,
    pub formhash: String,
    /// Present when the login form already demands a captcha up front.
    pub seccode_idhash: Option<String>,
}

pub fn extract_login_form(html: &str) -> Option<LoginForm> {
    let loginhash_re =
        regex!(r#"<form[^>]*name="login"[^>]*id="loginform_([A-Za-z0-9]+)""#);
    let formhash_re = regex!(r#"name="formhash"[^>]*value="([^"]+)""#);

    let loginhash = loginhash_re.captures(html)?.get(1)?.as_str().to_string();
    let formhash = formhash_re.captures(html)?.get(1)?.as_str().to_string();

    Some(LoginForm {
        loginhash,
        formhash,
        seccode_idhash: captcha_idhash(html),
    })
}

/// idhash of a seccode (captcha) referenced anywhere in the page.
pub fn captcha_idhash(html: &str) -> Option<String> {
    let patterns: [&Regex; 3] = [
        regex!(r#"mod=seccode[^"']*idhash=([A-Za-z0-9]+)"#),
        regex!(r#"id="seccode_([A-Za-z0-9]+)""#),
        regex!(r#"updateseccode\('([A-Za-z0-9]+)'"#),
    ];
    for re in patterns {
        if let Some(c) = re.captures(html) {
            return Some(c[1].to_string());
        }
    }
    None
}

/// The inajax login response signals success with a `succeedhandle_` script
/// call, or a reload back into the forum.
pub fn login_succeeded(body: &str, base_url: &str) -> bool {
    body.contains("succeedhandle_") || (body.contains("reload") && body.contains(base_url))
}

/// Human-readable error out of an inajax CDATA response, if any.
pub fn error_message(body: &str) -> Option<String> {
    if let Some(c) = regex!(r#"errorhandle_[^']*'([^']+)'"#).captures(body) {
        return Some(c[1].to_string());
    }
    regex!(r#"<p>([^<]+)</p>"#)
        .captures(body)
        .map(|c| c[1].trim().to_string())
}

/// A listing response that bounced us to the login flow means the session
/// cookies are stale.
pub fn looks_unauthenticated(final_url: &str, body: &str) -> bool {
    final_url.contains("mod=logging")
        || body.contains("id=\"messagelogin\"")
        || body.contains("请先登录")
}

/// Parse the "newthread" guide listing into posts, newest first, capped at
/// `limit` rows. Rows that are missing a thread id or title are skipped.
pub fn parse_thread_listing(html: &str, base_url: &str, limit: usize) -> Vec<Post> {
    let row_re = regex!(r#"(?s)<tbody id="normalthread_(\d+)">(.*?)</tbody>"#);
    let title_re = regex!(r#"<a href="([^"]+)"[^>]*class="(?:s )?xst"[^>]*>(.*?)</a>"#);
    let author_re = regex!(r#"(?s)<td class="by">.*?<a[^>]*>([^<]+)</a>"#);
    let time_re = regex!(r#"(?s)<em>(?:<span[^>]*>)?([^<]+)"#);

    let mut posts = Vec::new();
    for caps in row_re.captures_iter(html).take(limit) {
        let Ok(tid) = caps[1].parse::<u64>() else {
            continue;
        };
        let row = &caps[2];

        let Some(title_caps) = title_re.captures(row) else {
            continue;
        };
        let href = decode_entities(&title_caps[1]);
        let title = decode_entities(title_caps[2].trim());
        if title.is_empty() {
            continue;
        }

        let author = author_re
            .captures(row)
            .map(|c| decode_entities(c[1].trim()))
            .unwrap_or_else(|| "unknown".to_string());
        let published_at = time_re
            .captures(row)
            .and_then(|c| parse_forum_time(c[1].trim()));

        posts.push(Post {
            id: PostId(tid),
            title,
            author,
            summary: String::new(),
            published_at,
            url: absolutize(base_url, &href),
        });
    }
    posts
}

/// Plain text of the first post body (`t_f` cell) on a thread page.
pub fn extract_first_post_text(html: &str) -> Option<String> {
    let re = regex!(r#"(?s)<td class="t_f"[^>]*>(.*?)</td>"#);
    let raw = re.captures(html)?.get(1)?.as_str();
    let text = decode_entities(&strip_tags(raw));
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn strip_tags(html: &str) -> String {
    regex!(r"<[^>]+>").replace_all(html, " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href.trim_start_matches('/'))
    }
}

/// Discuz prints listing times like `2024-5-1 12:30`; anything else (for
/// example relative spans) comes back as None.
fn parse_forum_time(text: &str) -> Option<chrono::DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
      <form method="post" autocomplete="off" name="login" id="loginform_Labc12"
            action="member.php?mod=logging&amp;action=login&amp;loginsubmit=yes">
        <input type="hidden" name="formhash" value="deadbeef" />
      </form>
    "#;

    const LOGIN_PAGE_WITH_SECCODE: &str = r#"
      <form method="post" name="login" id="loginform_Lxyz99" action="member.php">
        <input type="hidden" name="formhash" value="0badf00d" />
        <span id="seccode_cSAhash1"></span>
        <img src="misc.php?mod=seccode&update=123&idhash=cSAhash1" />
      </form>
    "#;

    const LISTING: &str = r#"
      <div id="forumnew"></div>
      <tbody id="normalthread_1003">
        <tr>
          <th><a href="forum.php?mod=viewthread&amp;tid=1003" class="s xst">Newest thread</a></th>
          <td class="by"><cite><a href="space-uid-9.html">carol</a></cite>
            <em><span title="2024-5-3 09:15">2024-5-3 09:15</span></em></td>
        </tr>
      </tbody>
      <tbody id="normalthread_1002">
        <tr>
          <th><a href="forum.php?mod=viewthread&amp;tid=1002" class="xst">Middle &amp; thread</a></th>
          <td class="by"><cite><a href="space-uid-8.html">bob</a></cite>
            <em>3 minutes ago</em></td>
        </tr>
      </tbody>
      <tbody id="normalthread_1001">
        <tr>
          <th><a href="forum.php?mod=viewthread&amp;tid=1001" class="s xst">Oldest thread</a></th>
          <td class="by"><cite><a href="space-uid-7.html">alice</a></cite>
            <em><span>2024-5-1 08:00</span></em></td>
        </tr>
      </tbody>
    "#;

    #[test]
    fn extracts_login_form_tokens() {
        let form = extract_login_form(LOGIN_PAGE).unwrap();
        assert_eq!(form.loginhash, "Labc12");
        assert_eq!(form.formhash, "deadbeef");
        assert!(form.seccode_idhash.is_none());
    }

    #[test]
    fn detects_upfront_captcha_on_login_form() {
        let form = extract_login_form(LOGIN_PAGE_WITH_SECCODE).unwrap();
        assert_eq!(form.seccode_idhash.as_deref(), Some("cSAhash1"));
    }

    #[test]
    fn recognizes_login_success_response() {
        let body = r#"<root><![CDATA[if(typeof succeedhandle_login=='function'){succeedhandle_login('https://forum.example/', '欢迎回来');}]]></root>"#;
        assert!(login_succeeded(body, "https://forum.example"));
        assert!(!login_succeeded("<root>login failed</root>", "https://forum.example"));
    }

    #[test]
    fn extracts_rejection_message() {
        let body = r#"errorhandle_login('Login failed, password incorrect', {});"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("Login failed, password incorrect")
        );
    }

    #[test]
    fn parses_listing_rows_newest_first() {
        let posts = parse_thread_listing(LISTING, "https://forum.example", 10);
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].id, PostId(1003));
        assert_eq!(posts[0].title, "Newest thread");
        assert_eq!(posts[0].author, "carol");
        assert_eq!(
            posts[0].url,
            "https://forum.example/forum.php?mod=viewthread&tid=1003"
        );
        assert!(posts[0].published_at.is_some());

        // Entity-decoded title, relative timestamp tolerated as None.
        assert_eq!(posts[1].title, "Middle & thread");
        assert!(posts[1].published_at.is_none());
        assert_eq!(posts[2].id, PostId(1001));
    }

    #[test]
    fn listing_respects_limit() {
        let posts = parse_thread_listing(LISTING, "https://forum.example", 2);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].id, PostId(1002));
    }

    #[test]
    fn detects_stale_session_listing() {
        assert!(looks_unauthenticated(
            "https://forum.example/member.php?mod=logging&action=login&referer=...",
            ""
        ));
        assert!(looks_unauthenticated(
            "https://forum.example/forum.php",
            r#"<div id="messagelogin">...</div>"#
        ));
        assert!(!looks_unauthenticated(
            "https://forum.example/forum.php?mod=guide&view=newthread",
            LISTING
        ));
    }

    #[test]
    fn extracts_first_post_text() {
        let html = r#"
          <td class="t_f" id="postmessage_1">
            Big <b>sale</b> today&nbsp;&amp; tomorrow<br />
            details inside
          </td>
        "#;
        assert_eq!(
            extract_first_post_text(html).as_deref(),
            Some("Big sale today & tomorrow details inside")
        );
        assert!(extract_first_post_text("<p>no post body here</p>").is_none());
    }
}
