//! Content matching: the slow path of a search.
//!
//! Only reached for records whose metadata could not decide the predicate.
//! Text comparisons are case-insensitive substring matches on decoded text.

use crate::parser::header::{self, decode_encoded_words};
use crate::parser::ParsedMessage;

use super::query::SearchKey;

/// Evaluates one content search key against a parsed message.
///
/// The store only hands over keys for which [`SearchKey::is_content_key`]
/// holds; anything else may be answered with `false`.
pub trait ContentMatcher: Send + Sync {
    fn matches(&self, key: &SearchKey, message: &ParsedMessage) -> bool;
}

/// The built-in matcher: headers are RFC 2047-decoded, bodies are decoded
/// with `mail-parser` (transfer encodings, charsets, HTML-only parts).
#[derive(Debug, Clone, Copy, Default)]
pub struct TextMatcher;

impl ContentMatcher for TextMatcher {
    fn matches(&self, key: &SearchKey, message: &ParsedMessage) -> bool {
        match key {
            SearchKey::SentBefore(date) => sent_day(message).is_some_and(|d| d < *date),
            SearchKey::SentOn(date) => sent_day(message).is_some_and(|d| d == *date),
            SearchKey::SentSince(date) => sent_day(message).is_some_and(|d| d >= *date),
            SearchKey::Header(name, value) => header_matches(message, name, value),
            SearchKey::Body(needle) => contains(&body_text(message), needle),
            SearchKey::Text(needle) => {
                contains(&decoded_headers(message), needle)
                    || contains(&body_text(message), needle)
            }
            SearchKey::Larger(n) => message.size() as u64 > *n,
            SearchKey::Smaller(n) => (message.size() as u64) < *n,
            _ => false,
        }
    }
}

fn sent_day(message: &ParsedMessage) -> Option<chrono::NaiveDate> {
    message.sent_date().map(|d| d.date_naive())
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn header_matches(message: &ParsedMessage, name: &str, value: &str) -> bool {
    message
        .headers()
        .iter()
        .filter(|f| f.name.eq_ignore_ascii_case(name))
        .any(|f| value.is_empty() || contains(&decode_encoded_words(&f.value), value))
}

fn decoded_headers(message: &ParsedMessage) -> String {
    let mut out = String::new();
    for field in message.headers() {
        out.push_str(&field.name);
        out.push_str(": ");
        out.push_str(&decode_encoded_words(&field.value));
        out.push('\n');
    }
    out
}

/// All text parts of the message, decoded, including those of attached
/// messages. HTML parts are reduced to plain text. Falls back to the raw
/// body when `mail-parser` gives up.
fn body_text(message: &ParsedMessage) -> String {
    match mail_parser::MessageParser::default().parse(message.raw()) {
        Some(parsed) => {
            let mut out = String::new();
            collect_text(&parsed, &mut out);
            out
        }
        None => header::decode_header_bytes(message.text_bytes()),
    }
}

fn collect_text(message: &mail_parser::Message<'_>, out: &mut String) {
    use mail_parser::PartType;

    for part in &message.parts {
        match &part.body {
            PartType::Text(text) => out.push_str(text),
            PartType::Html(html) => out.push_str(&html_to_text(html)),
            PartType::Message(inner) => collect_text(inner, out),
            _ => continue,
        }
        out.push('\n');
    }
}

/// Convert HTML to plain text for matching.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`
/// - Removes scripts and styles
/// - Decodes common HTML entities
pub fn html_to_text(html: &str) -> String {
    // Remove script and style blocks
    let mut owned = remove_tag_block(html, "script");
    owned = remove_tag_block(&owned, "style");

    for tag in ["br", "br/", "br /", "p", "div", "tr", "li"] {
        owned = owned.replace(&format!("<{tag}>"), "\n");
        owned = owned.replace(&format!("<{}>", tag.to_uppercase()), "\n");
    }

    // Strip all remaining HTML tags
    let mut result = String::with_capacity(owned.len());
    let mut in_tag = false;
    for ch in owned.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    // Decode HTML entities
    result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    while let Some(start) = remaining.to_ascii_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.to_ascii_lowercase().find(&close) {
            Some(end) => remaining = &after[end + close.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{MessageParser, MimeParser};
    use chrono::NaiveDate;

    const MESSAGE: &[u8] = b"From: =?UTF-8?Q?Jos=C3=A9?= <jose@example.com>\r\n\
Subject: Quarterly budget\r\n\
Date: Tue, 05 Mar 2024 09:00:00 +0100\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
Caf=C3=A9 meeting at noon.\r\n";

    const HTML_ONLY: &[u8] = b"Subject: html\r\n\
Content-Type: text/html\r\n\
\r\n\
<html><body><p>Tom &amp; Jerry</p><script>var hidden;</script></body></html>\r\n";

    fn parsed(raw: &[u8]) -> ParsedMessage {
        MimeParser.parse(raw.to_vec()).unwrap()
    }

    fn matches(key: &str, raw: &[u8]) -> bool {
        TextMatcher.matches(&SearchKey::parse(key).unwrap(), &parsed(raw))
    }

    // ─── Test 1: Headers ───

    #[test]
    fn test_header_keys_decode_encoded_words() {
        assert!(matches("FROM josé", MESSAGE));
        assert!(matches("FROM JOSE@EXAMPLE", MESSAGE));
        assert!(matches("SUBJECT budget", MESSAGE));
        assert!(!matches("SUBJECT invoice", MESSAGE));
        assert!(matches("HEADER Content-Transfer-Encoding \"\"", MESSAGE));
        assert!(!matches("HEADER X-Missing \"\"", MESSAGE));
    }

    // ─── Test 2: Bodies ───

    #[test]
    fn test_body_is_transfer_decoded() {
        assert!(matches("BODY café", MESSAGE));
        assert!(!matches("BODY Caf=C3", MESSAGE));
        assert!(matches("TEXT quarterly", MESSAGE));
        assert!(matches("TEXT noon", MESSAGE));
    }

    #[test]
    fn test_html_only_body() {
        assert!(matches("BODY \"tom & jerry\"", HTML_ONLY));
        assert!(!matches("BODY hidden", HTML_ONLY));
    }

    // ─── Test 3: Sent date and size ───

    #[test]
    fn test_sent_date_and_size() {
        let message = parsed(MESSAGE);
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert!(TextMatcher.matches(&SearchKey::SentOn(day), &message));
        assert!(TextMatcher.matches(&SearchKey::SentSince(day), &message));
        assert!(!TextMatcher.matches(&SearchKey::SentBefore(day), &message));

        let size = MESSAGE.len() as u64;
        assert!(TextMatcher.matches(&SearchKey::Larger(size - 1), &message));
        assert!(!TextMatcher.matches(&SearchKey::Larger(size), &message));
        assert!(TextMatcher.matches(&SearchKey::Smaller(size + 1), &message));
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
        assert_eq!(html_to_text("Before<script>alert('x')</script>After"), "BeforeAfter");
    }
}
