//! Building [`Article`]s from raw store records.
//!
//! Feed bodies often carry relative links. They are rewritten against the
//! feed's base link so they still work when shown outside the feed's site.

use crate::error::{HearthError, Result};
use crate::types::{Article, FeedId};
use chrono::DateTime;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

lazy_static! {
    static ref LINK_ATTR_RE: Regex = Regex::new(r#"(href|src)=(['"])([^'"]+)['"]"#).unwrap();
    static ref ABSOLUTE_URL_RE: Regex = Regex::new(r"^(mailto:|[a-zA-Z][-a-zA-Z0-9+.]*://)").unwrap();
    static ref LAST_SEGMENT_RE: Regex = Regex::new(r"[^/]+/$").unwrap();
    static ref ORIGIN_RE: Regex = Regex::new(r"^[a-zA-Z][-a-zA-Z0-9+.]*://[^/]*").unwrap();
}

/// Rewrite relative `href`/`src` values in `text` against `base`.
///
/// Absolute URLs and `mailto:` links are left alone. Rewritten attributes are
/// emitted with double quotes.
pub fn fix_relative_links(text: &str, base: Option<&str>) -> String {
    let Some(base) = base.filter(|b| !b.is_empty()) else {
        return text.to_string();
    };

    LINK_ATTR_RE
        .replace_all(text, |caps: &Captures| {
            let url = &caps[3];
            if ABSOLUTE_URL_RE.is_match(url) {
                caps[0].to_string()
            } else {
                format!("{}=\"{}\"", &caps[1], resolve(base, url))
            }
        })
        .into_owned()
}

/// Join a relative `url` onto `base`.
///
/// Each leading `../` drops one trailing directory from the base. A leading
/// `/` resolves against the base's origin.
pub fn resolve(base: &str, url: &str) -> String {
    let mut base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };

    if let Some(rest) = url.strip_prefix("//") {
        let scheme = base.split("://").next().unwrap_or("http");
        return format!("{}://{}", scheme, rest);
    }
    if url.starts_with('/') {
        if let Some(origin) = ORIGIN_RE.find(&base) {
            return format!("{}{}", origin.as_str(), url);
        }
    }

    let mut url = url;
    loop {
        if let Some(rest) = url.strip_prefix("../") {
            url = rest;
            // Never climb above the origin.
            let origin_len = ORIGIN_RE.find(&base).map(|m| m.end() + 1).unwrap_or(0);
            if base.len() > origin_len {
                base = LAST_SEGMENT_RE.replace(&base, "").into_owned();
            }
        } else if let Some(rest) = url.strip_prefix("./") {
            url = rest;
        } else {
            break;
        }
    }

    format!("{}{}", base, url.trim_start_matches('/'))
}

/// Interpret a record's `date` field as epoch milliseconds.
///
/// Accepts a number, a numeric string, RFC 3339 or RFC 2822. Absent means 0.
pub fn parse_date(value: Option<&Value>) -> std::result::Result<i64, String> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("date out of range: {}", n)),
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Ok(millis) = s.parse::<i64>() {
                return Ok(millis);
            }
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_rfc2822(s))
                .map(|dt| dt.timestamp_millis())
                .map_err(|_| format!("unrecognized date {:?}", s))
        }
        Some(other) => Err(format!("unexpected date value {}", other)),
    }
}

fn text_field(record: &Map<String, Value>, name: &str) -> String {
    match record.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Build an article from the raw record stored under `key`.
///
/// The summary falls back to the description when the record has none.
pub fn build_article(feed_id: &FeedId, key: &str, raw: &Value, base_link: Option<&str>) -> Result<Article> {
    let location = format!("{}/{}", feed_id, key);
    let record = raw
        .as_object()
        .ok_or_else(|| HearthError::validation(&location, "article record is not an object"))?;

    let published_at =
        parse_date(record.get("date")).map_err(|reason| HearthError::validation(&location, reason))?;

    let description = text_field(record, "description");
    let summary = match text_field(record, "summary") {
        s if s.is_empty() => description.clone(),
        s => s,
    };

    Ok(Article {
        id: key.to_string(),
        feed_id: feed_id.clone(),
        title: text_field(record, "title"),
        summary: fix_relative_links(&summary, base_link),
        description: fix_relative_links(&description, base_link),
        link: text_field(record, "link"),
        published_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parent_segment_consumed() {
        let fixed = fix_relative_links("<a href='../x'>t</a>", Some("http://ex.com/feed/"));
        assert!(fixed.contains(r#"href="http://ex.com/x""#), "{}", fixed);
    }

    #[test]
    fn test_multiple_parent_segments() {
        assert_eq!(resolve("http://ex.com/a/b/c/", "../../x.png"), "http://ex.com/a/x.png");
        assert_eq!(resolve("http://ex.com/a/", "../../../x"), "http://ex.com/x");
    }

    #[test]
    fn test_plain_relative_and_root_relative() {
        assert_eq!(resolve("http://ex.com/blog", "img/a.png"), "http://ex.com/blog/img/a.png");
        assert_eq!(resolve("http://ex.com/blog/", "/img/a.png"), "http://ex.com/img/a.png");
        assert_eq!(resolve("https://ex.com/blog/", "//cdn.ex.com/a.js"), "https://cdn.ex.com/a.js");
        assert_eq!(resolve("http://ex.com/blog/", "./a"), "http://ex.com/blog/a");
    }

    #[test]
    fn test_absolute_and_mailto_untouched() {
        let text = r#"<a href="https://other.org/p">x</a><a href='mailto:me@ex.com'>m</a>"#;
        assert_eq!(fix_relative_links(text, Some("http://ex.com/")), text);
    }

    #[test]
    fn test_src_rewritten() {
        let fixed = fix_relative_links(r#"<img src="pic.jpg">"#, Some("http://ex.com/feed/"));
        assert_eq!(fixed, r#"<img src="http://ex.com/feed/pic.jpg">"#);
    }

    #[test]
    fn test_no_base_leaves_text() {
        assert_eq!(fix_relative_links("<a href='x'>", None), "<a href='x'>");
        assert_eq!(fix_relative_links("<a href='x'>", Some("")), "<a href='x'>");
    }

    #[test]
    fn test_build_article() {
        let raw = json!({
            "title": "Hello",
            "description": "<a href='../x'>t</a>",
            "link": "http://ex.com/hello",
            "date": "2024-03-01T12:00:00Z"
        });
        let article = build_article(&FeedId::from("tech"), "k1", &raw, Some("http://ex.com/feed/")).unwrap();

        assert_eq!(article.id, "k1");
        assert_eq!(article.feed_id, FeedId::from("tech"));
        assert!(article.description.contains(r#"href="http://ex.com/x""#));
        assert_eq!(article.summary, article.description);
        assert_eq!(article.published_at, 1_709_294_400_000);
    }

    #[test]
    fn test_dates() {
        assert_eq!(parse_date(Some(&json!(1700000000000i64))), Ok(1_700_000_000_000));
        assert_eq!(parse_date(Some(&json!("1700000000000"))), Ok(1_700_000_000_000));
        assert_eq!(
            parse_date(Some(&json!("Fri, 01 Mar 2024 12:00:00 +0000"))),
            Ok(1_709_294_400_000)
        );
        assert_eq!(parse_date(None), Ok(0));
        assert!(parse_date(Some(&json!("yesterday"))).is_err());
    }

    #[test]
    fn test_malformed_record() {
        let result = build_article(&FeedId::from("tech"), "k1", &json!("just a string"), None);
        assert!(matches!(result, Err(HearthError::Validation { .. })));

        let result = build_article(&FeedId::from("tech"), "k1", &json!({"date": "soon"}), None);
        assert!(matches!(result, Err(HearthError::Validation { .. })));
    }
}
