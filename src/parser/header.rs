//! RFC 5322 header parsing: field splitting and folding, encoded-words
//! (RFC 2047), and date parsing.

use std::ops::Range;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// One header field of a message or MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Field name as written (case preserved).
    pub name: String,
    /// Unfolded value; encoded-words are left as they are.
    pub value: String,
    /// Byte range of the whole field, continuation lines and line break
    /// included, relative to the header block it was split from.
    pub range: Range<usize>,
}

/// Locate the end of a header block.
///
/// Returns `(fields_end, body_start)`: the offset just after the last header
/// line (where the blank separator line starts) and the offset of the body.
/// A block without a blank line is all header and no body.
pub fn split_header_body(data: &[u8]) -> (usize, usize) {
    if data.starts_with(b"\r\n") {
        return (0, 2);
    }
    if data.starts_with(b"\n") {
        return (0, 1);
    }
    for i in 0..data.len() {
        if data[i] != b'\n' {
            continue;
        }
        let rest = &data[i + 1..];
        if rest.starts_with(b"\n") {
            return (i + 1, i + 2);
        }
        if rest.starts_with(b"\r\n") {
            return (i + 1, i + 3);
        }
    }
    (data.len(), data.len())
}

/// Split a header block into fields, joining continuation lines (starting
/// with space or tab) onto the field they continue.
///
/// Stops at the first blank line. Lines that are neither a field nor a
/// continuation are skipped.
pub fn split_fields(header: &[u8]) -> Vec<HeaderField> {
    let mut fields: Vec<HeaderField> = Vec::new();
    let mut pos = 0;

    while pos < header.len() {
        let line_end = header[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i + 1)
            .unwrap_or(header.len());
        let line = &header[pos..line_end];
        let content = trim_line_break(line);

        if content.is_empty() {
            break;
        }

        if content[0] == b' ' || content[0] == b'\t' {
            if let Some(last) = fields.last_mut() {
                last.value.push(' ');
                last.value.push_str(decode_header_bytes(content).trim());
                last.range.end = line_end;
            }
        } else if let Some(colon) = content.iter().position(|&b| b == b':') {
            let name = decode_header_bytes(&content[..colon]).trim().to_string();
            let value = decode_header_bytes(&content[colon + 1..]).trim().to_string();
            fields.push(HeaderField {
                name,
                value,
                range: pos..line_end,
            });
        }

        pos = line_end;
    }

    fields
}

/// First value of the field called `name` (case-insensitive).
pub fn get_header<'a>(fields: &'a [HeaderField], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| f.value.as_str())
}

fn trim_line_break(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &bytes[3..]
    } else {
        bytes
    };

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}
/// Decode RFC 2047 encoded-words (`=?charset?B|Q?text?=`) in a header value.
///
/// Whitespace between two adjacent encoded-words is dropped. A malformed
/// word is kept as written.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let gap = &rest[..start];
        match decode_word(&rest[start..]) {
            Some((text, len)) => {
                if !(after_word && gap.trim().is_empty()) {
                    out.push_str(gap);
                }
                out.push_str(&text);
                rest = &rest[start + len..];
                after_word = true;
            }
            None => {
                out.push_str(&rest[..start + 2]);
                rest = &rest[start + 2..];
                after_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode the encoded-word at the start of `s`; returns the text and the
/// number of bytes the word spans.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let mut pieces = s.strip_prefix("=?")?.splitn(3, '?');
    let charset = pieces.next()?;
    let encoding = pieces.next()?;
    let tail = pieces.next()?;
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let end = tail.find("?=")?;
    let bytes = match encoding {
        "B" | "b" => decode_base64(&tail[..end])?,
        "Q" | "q" => decode_q(&tail[..end]),
        _ => return None,
    };
    let len = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(charset, &bytes), len))
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() / 4 * 3);
    let mut acc = 0u32;
    let mut bits = 0u32;
    for c in text.bytes() {
        let value = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            b'=' => break,
            b' ' | b'\t' | b'\r' | b'\n' => continue,
            _ => return None,
        };
        acc = ((acc << 6) | u32::from(value)) & 0xFFFF;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    Some(out)
}

/// Q encoding: `_` is a space, `=XX` a hex byte.
fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'=');
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

/// Decode `bytes` in the charset named by `label` (an RFC 2231 language
/// suffix is ignored). Unknown charsets decode as lossy UTF-8.
fn decode_charset(label: &str, bytes: &[u8]) -> String {
    let label = label.split('*').next().unwrap_or(label);
    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset = label, "Unknown charset, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const NAMED_ZONES: [(&str, &str); 14] = [
    ("UT", "+0000"),
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
    ("JST", "+0900"),
];

const ZONED_FORMATS: [&str; 4] = [
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
];

/// Formats without a zone; the time is taken as UTC.
const NAIVE_FORMATS: [&str; 5] = [
    "%d %b %Y %H:%M:%S",
    "%b %d %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse a `Date:` header value or an IMAP-style `16-JUL-2025 03:01:03`.
///
/// Strict RFC 2822 and RFC 3339 are tried first, then common deviations:
/// missing weekday, dashed day-month-year, named zones, no zone at all.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let normalized = normalize_date(value);
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Some(dt) = mail_parser_date(value) {
        return Some(dt);
    }
    warn!(date = value, "Could not parse date");
    None
}

/// Last resort: let `mail-parser` read it as a `Date:` header.
fn mail_parser_date(value: &str) -> Option<DateTime<Utc>> {
    let raw = format!("Date: {value}\r\n\r\n");
    let parsed = mail_parser::MessageParser::default().parse(raw.as_bytes())?;
    DateTime::parse_from_rfc3339(&parsed.date()?.to_rfc3339())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Bring a date into `DD Mon YYYY HH:MM:SS +ZZZZ` shape: drop the weekday
/// and zone comments, undash `16-JUL-2025`, and replace named zones.
fn normalize_date(value: &str) -> String {
    let value = match value.split_once([',', ' ']) {
        Some((head, tail)) if WEEKDAYS.iter().any(|d| d.eq_ignore_ascii_case(head)) => tail,
        _ => value,
    };

    let mut words: Vec<String> = value
        .split_whitespace()
        .filter(|w| !(w.starts_with('(') && w.ends_with(')')))
        .map(str::to_string)
        .collect();

    let undashed = words.first().and_then(|first| {
        let mut parts = first.splitn(3, '-');
        let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
        let is_month = month.len() == 3 && month.bytes().all(|b| b.is_ascii_alphabetic());
        (is_month && day.bytes().all(|b| b.is_ascii_digit())).then(|| {
            let mut month = month.to_ascii_lowercase();
            month[..1].make_ascii_uppercase();
            vec![day.to_string(), month, year.to_string()]
        })
    });
    if let Some(parts) = undashed {
        words.splice(0..1, parts);
    }

    if let Some(last) = words.last_mut() {
        if let Some((_, offset)) = NAMED_ZONES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(last))
        {
            *last = (*offset).to_string();
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_encoded_words() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
        assert_eq!(
            decode_encoded_words("=?ISO-8859-1?Q?R=E9sum=E9_du_projet?="),
            "Résumé du projet"
        );
        assert_eq!(decode_encoded_words("=?UTF-8?B?5bGx55Sw5aSq6YOO?="), "山田太郎");
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_adjacent_words_join_without_gap() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_mixed_plain_and_encoded() {
        assert_eq!(
            decode_encoded_words("Re: =?UTF-8?B?SG9sYQ==?= there"),
            "Re: Hola there"
        );
        assert_eq!(decode_encoded_words("50% =? off"), "50% =? off");
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
    }

    #[test]
    fn test_split_fields_unfolds_continuations() {
        let raw = b"Subject: This is a long\r\n\tsubject line\r\nFrom: user@example.com\r\n\r\n";
        let fields = split_fields(raw);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "Subject");
        assert_eq!(fields[0].value, "This is a long subject line");
        assert_eq!(
            &raw[fields[0].range.clone()],
            b"Subject: This is a long\r\n\tsubject line\r\n"
        );
        assert_eq!(get_header(&fields, "from"), Some("user@example.com"));
    }

    #[test]
    fn test_split_header_body() {
        assert_eq!(split_header_body(b"A: b\n\nbody"), (5, 6));
        assert_eq!(split_header_body(b"A: b\r\n\r\nbody"), (6, 8));
        assert_eq!(split_header_body(b"\r\nbody only"), (0, 2));
        assert_eq!(split_header_body(b"A: no body"), (10, 10));
    }

    #[test]
    fn test_decode_header_bytes_latin1_fallback() {
        assert_eq!(decode_header_bytes(b"caf\xe9"), "café");
    }

    #[test]
    fn test_parse_date_variants() {
        let expected = "2024-01-04T10:00:00+00:00";
        for input in [
            "Thu, 04 Jan 2024 10:00:00 +0000",
            "04 Jan 2024 10:00:00 +0000",
            "2024-01-04T10:00:00Z",
            "Thu, 04 Jan 2024 10:00:00 +0000 (UTC)",
            "04-JAN-2024 10:00:00 +0000",
        ] {
            let parsed = parse_date(input).unwrap_or_else(|| panic!("failed on {input}"));
            assert_eq!(parsed.to_rfc3339(), expected, "input {input}");
        }

        let est = parse_date("Thu, 04 Jan 2024 10:00:00 EST").unwrap();
        assert_eq!(est.to_rfc3339(), "2024-01-04T15:00:00+00:00");

        let naive = parse_date("16-JUL-2025 03:01:03").unwrap();
        assert_eq!(naive.to_rfc3339(), "2025-07-16T03:01:03+00:00");

        assert!(parse_date("   ").is_none());
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("16-JUL-2025 03:01:03"), "16 Jul 2025 03:01:03");
        assert_eq!(normalize_date("Mon, 1 Jan 2024 10:00 PST"), "1 Jan 2024 10:00 -0800");
        assert_eq!(normalize_date("2024-01-04 10:00:00"), "2024-01-04 10:00:00");
    }
}
