//! MIME structure parsing: content types, multipart splitting, encapsulated
//! messages, and the section/envelope/body-structure views built on top.

use std::ops::Range;

use chrono::{DateTime, Utc};

use crate::error::{Result, StoreError};
use crate::model::address::EnvelopeAddress;
use crate::model::fetch::{BodyFields, BodyStructure, Disposition, Envelope, Section, SectionText};
use crate::parser::header::{self, HeaderField};
use crate::parser::MessageParser;

/// Maximum nesting of multiparts and encapsulated messages that is parsed.
/// Deeper parts are treated as opaque leaves.
const MAX_DEPTH: usize = 10;

/// A parsed `Content-Type` (or `Content-Disposition`) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercase top-level type, e.g. `text`.
    pub media_type: String,
    /// Lowercase subtype, e.g. `plain`.
    pub subtype: String,
    /// Parameters with lowercase names and unquoted values.
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// `text/plain; charset=us-ascii`, the RFC 2045 default.
    pub fn text_plain() -> Self {
        Self {
            media_type: "text".to_string(),
            subtype: "plain".to_string(),
            params: vec![("charset".to_string(), "us-ascii".to_string())],
        }
    }

    fn message_rfc822() -> Self {
        Self {
            media_type: "message".to_string(),
            subtype: "rfc822".to_string(),
            params: Vec::new(),
        }
    }

    /// Parse a header value. Returns `None` when there is no `type/subtype`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut pieces = split_params(value).into_iter();
        let kind = pieces.next()?;
        let (media_type, subtype) = kind.split_once('/')?;
        let media_type = media_type.trim().to_ascii_lowercase();
        let subtype = subtype.trim().to_ascii_lowercase();
        if media_type.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self {
            media_type,
            subtype,
            params: pieces.filter_map(|p| parse_param(&p)).collect(),
        })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        self.media_type == "multipart"
    }

    pub fn is_message(&self) -> bool {
        self.media_type == "message" && self.subtype == "rfc822"
    }
}

/// Split a structured header value on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                escaped = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => pieces.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    pieces.push(current);

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_param(piece: &str) -> Option<(String, String)> {
    let (name, value) = piece.split_once('=')?;
    let name = name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    };
    Some((name, value))
}

/// One node of the MIME tree. All ranges index into the raw message.
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Header block including the blank separator line.
    pub header: Range<usize>,
    pub body: Range<usize>,
    pub fields: Vec<HeaderField>,
    pub content_type: ContentType,
    /// Sub-parts of a multipart.
    pub children: Vec<MimePart>,
    /// The encapsulated message of a `message/rfc822` part.
    pub message: Option<Box<MimePart>>,
}

impl MimePart {
    fn parse(raw: &[u8], range: Range<usize>, default_type: ContentType, depth: usize) -> Self {
        let data = &raw[range.clone()];
        let (fields_end, body_start) = header::split_header_body(data);
        let fields = header::split_fields(&data[..fields_end])
            .into_iter()
            .map(|mut f| {
                f.range = f.range.start + range.start..f.range.end + range.start;
                f
            })
            .collect::<Vec<_>>();

        let content_type = header::get_header(&fields, "Content-Type")
            .and_then(ContentType::parse)
            .unwrap_or(default_type);

        let mut part = Self {
            header: range.start..range.start + body_start,
            body: range.start + body_start..range.end,
            fields,
            content_type,
            children: Vec::new(),
            message: None,
        };

        if depth >= MAX_DEPTH {
            return part;
        }

        if part.content_type.is_multipart() {
            if let Some(boundary) = part.content_type.param("boundary").map(str::to_string) {
                let child_default = if part.content_type.subtype == "digest" {
                    ContentType::message_rfc822()
                } else {
                    ContentType::text_plain()
                };
                part.children = split_multipart(raw, part.body.clone(), &boundary)
                    .into_iter()
                    .map(|r| MimePart::parse(raw, r, child_default.clone(), depth + 1))
                    .collect();
            }
        } else if part.content_type.is_message() {
            let inner = MimePart::parse(raw, part.body.clone(), ContentType::text_plain(), depth + 1);
            part.message = Some(Box::new(inner));
        }

        part
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header::get_header(&self.fields, name)
    }

    /// Locate the sub-part addressed by an IMAP part path.
    ///
    /// A non-multipart part has exactly one part, numbered 1: itself. Below
    /// the first level, a `message/rfc822` part is numbered through its
    /// encapsulated message.
    fn find(&self, path: &[u32]) -> Option<&MimePart> {
        let mut current = self;
        for (i, &n) in path.iter().enumerate() {
            if i > 0 {
                if let Some(inner) = current.message.as_deref() {
                    current = inner;
                }
            }
            if current.content_type.is_multipart() {
                current = current.children.get(usize::try_from(n).ok()?.checked_sub(1)?)?;
            } else if n != 1 {
                return None;
            }
        }
        Some(current)
    }

    fn envelope(&self) -> Envelope {
        let text = |name: &str| self.header(name).map(str::to_string);
        let addresses = |name: &str| {
            self.header(name)
                .map(EnvelopeAddress::parse_list)
                .unwrap_or_default()
        };

        let from = addresses("From");
        let sender = match addresses("Sender") {
            list if list.is_empty() => from.clone(),
            list => list,
        };
        let reply_to = match addresses("Reply-To") {
            list if list.is_empty() => from.clone(),
            list => list,
        };

        Envelope {
            date: text("Date"),
            subject: text("Subject"),
            from,
            sender,
            reply_to,
            to: addresses("To"),
            cc: addresses("Cc"),
            bcc: addresses("Bcc"),
            in_reply_to: text("In-Reply-To"),
            message_id: text("Message-ID"),
        }
    }

    fn structure(&self, raw: &[u8], extensible: bool) -> BodyStructure {
        let disposition = if extensible {
            self.header("Content-Disposition")
                .map(|value| {
                    let mut pieces = split_params(value).into_iter();
                    Disposition {
                        kind: pieces.next().unwrap_or_default().to_ascii_lowercase(),
                        params: pieces.filter_map(|p| parse_param(&p)).collect(),
                    }
                })
        } else {
            None
        };

        let ct = &self.content_type;
        if ct.is_multipart() {
            return BodyStructure::Multipart {
                parts: self
                    .children
                    .iter()
                    .map(|c| c.structure(raw, extensible))
                    .collect(),
                subtype: ct.subtype.clone(),
                params: if extensible { ct.params.clone() } else { Vec::new() },
                disposition,
            };
        }

        let body = &raw[self.body.clone()];
        let fields = BodyFields {
            params: ct.params.clone(),
            id: self.header("Content-ID").map(str::to_string),
            description: self.header("Content-Description").map(str::to_string),
            encoding: self
                .header("Content-Transfer-Encoding")
                .map(|e| e.trim().to_ascii_uppercase())
                .unwrap_or_else(|| "7BIT".to_string()),
            size: u32::try_from(body.len()).unwrap_or(u32::MAX),
        };

        match (ct.media_type.as_str(), self.message.as_deref()) {
            ("text", _) => BodyStructure::Text {
                subtype: ct.subtype.clone(),
                fields,
                lines: count_lines(body),
                disposition,
            },
            (_, Some(inner)) => BodyStructure::Message {
                fields,
                envelope: Box::new(inner.envelope()),
                body: Box::new(inner.structure(raw, extensible)),
                lines: count_lines(body),
                disposition,
            },
            _ => BodyStructure::Basic {
                media_type: ct.media_type.clone(),
                subtype: ct.subtype.clone(),
                fields,
                disposition,
            },
        }
    }
}

/// Body ranges of the parts of a multipart body.
///
/// The line break before each delimiter belongs to the delimiter. Text before
/// the first delimiter and after the closing one is dropped.
fn split_multipart(raw: &[u8], body: Range<usize>, boundary: &str) -> Vec<Range<usize>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = body.start;

    while pos < body.end {
        let line_end = raw[pos..body.end]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i + 1)
            .unwrap_or(body.end);

        if let Some(rest) = raw[pos..line_end].strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            let tail = if closing { &rest[2..] } else { rest };
            if tail.iter().all(|b| b.is_ascii_whitespace()) {
                if let Some(start) = current.take() {
                    parts.push(start..end_before_line_break(raw, start, pos));
                }
                if closing {
                    return parts;
                }
                current = Some(line_end);
            }
        }
        pos = line_end;
    }

    if let Some(start) = current {
        parts.push(start..body.end);
    }
    parts
}

fn end_before_line_break(raw: &[u8], start: usize, mut end: usize) -> usize {
    if end > start && raw[end - 1] == b'\n' {
        end -= 1;
        if end > start && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

fn count_lines(body: &[u8]) -> u32 {
    let mut lines = body.iter().filter(|&&b| b == b'\n').count();
    if body.last().is_some_and(|&b| b != b'\n') {
        lines += 1;
    }
    u32::try_from(lines).unwrap_or(u32::MAX)
}

/// A raw message together with its MIME tree.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    raw: Vec<u8>,
    root: MimePart,
}

impl ParsedMessage {
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn root(&self) -> &MimePart {
        &self.root
    }

    /// Top-level header block, blank line included.
    pub fn header_bytes(&self) -> &[u8] {
        &self.raw[self.root.header.clone()]
    }

    /// Top-level body.
    pub fn text_bytes(&self) -> &[u8] {
        &self.raw[self.root.body.clone()]
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.root.fields
    }

    /// First top-level header called `name` (case-insensitive), unfolded.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.root.header(name)
    }

    /// The `Date:` header, if present and parseable.
    pub fn sent_date(&self) -> Option<DateTime<Utc>> {
        self.header("Date").and_then(header::parse_date)
    }

    pub fn envelope(&self) -> Envelope {
        self.root.envelope()
    }

    /// `BODYSTRUCTURE` when `extensible`, otherwise the plain `BODY` form.
    pub fn body_structure(&self, extensible: bool) -> BodyStructure {
        self.root.structure(&self.raw, extensible)
    }

    /// Bytes of a `BODY[...]` section, or `None` if the message has no such
    /// section.
    pub fn section(&self, section: &Section) -> Option<Vec<u8>> {
        let part = self.root.find(&section.part)?;

        let Some(text) = &section.text else {
            let range = if section.part.is_empty() {
                0..self.raw.len()
            } else {
                part.body.clone()
            };
            return Some(self.raw[range].to_vec());
        };

        // HEADER and TEXT address a message: the top level, or the
        // encapsulated message of a message/rfc822 part.
        let message = || {
            if section.part.is_empty() {
                Some(part)
            } else {
                part.message.as_deref()
            }
        };

        let bytes = match text {
            SectionText::Mime => self.raw[part.header.clone()].to_vec(),
            SectionText::Header => self.raw[message()?.header.clone()].to_vec(),
            SectionText::Text => self.raw[message()?.body.clone()].to_vec(),
            SectionText::HeaderFields(names) => self.select_fields(message()?, names, true),
            SectionText::HeaderFieldsNot(names) => self.select_fields(message()?, names, false),
        };
        Some(bytes)
    }

    fn select_fields(&self, part: &MimePart, names: &[String], keep: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for field in &part.fields {
            let listed = names.iter().any(|n| n.eq_ignore_ascii_case(&field.name));
            if listed == keep {
                out.extend_from_slice(&self.raw[field.range.clone()]);
                if !out.ends_with(b"\n") {
                    out.extend_from_slice(b"\r\n");
                }
            }
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// The built-in [`MessageParser`]: a tolerant RFC 5322 / MIME splitter that
/// keeps byte ranges into the raw message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeParser;

impl MessageParser for MimeParser {
    fn parse(&self, raw: Vec<u8>) -> Result<ParsedMessage> {
        if raw.is_empty() {
            return Err(StoreError::Parse("empty message".to_string()));
        }
        let root = MimePart::parse(&raw, 0..raw.len(), ContentType::text_plain(), 0);
        Ok(ParsedMessage { raw, root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com, \"Doe, Jane\" <jane@example.com>\r\n\
Subject: Hello\r\n\
\x20there\r\n\
Date: Mon, 15 Jan 2024 10:30:00 +0000\r\n\
Message-ID: <m1@example.com>\r\n\
\r\n\
Line one\r\n\
Line two\r\n";

    const MULTI: &[u8] = b"From: a@example.com\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
preamble\r\n\
--XX\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
first part\r\n\
--XX\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
Subject: inner\r\n\
From: c@example.com\r\n\
\r\n\
inner body\r\n\
--XX--\r\n\
epilogue\r\n";

    fn parse(raw: &[u8]) -> ParsedMessage {
        MimeParser.parse(raw.to_vec()).unwrap()
    }

    // ─── Test 1: Headers and envelope ───

    #[test]
    fn test_envelope_of_simple_message() {
        let msg = parse(SIMPLE);
        let env = msg.envelope();
        assert_eq!(env.subject.as_deref(), Some("Hello there"));
        assert_eq!(env.from[0].addr_spec(), "alice@example.com");
        assert_eq!(env.sender, env.from);
        assert_eq!(env.reply_to, env.from);
        assert_eq!(env.to.len(), 2);
        assert_eq!(env.to[1].name.as_deref(), Some("Doe, Jane"));
        assert_eq!(env.message_id.as_deref(), Some("<m1@example.com>"));
        assert!(msg.sent_date().is_some());
    }

    #[test]
    fn test_folded_header_is_unfolded() {
        let msg = parse(b"Subject: Hello\r\n\tthere\r\n  again\r\nTo: x@example.com\r\n\r\nbody");
        assert_eq!(msg.header("subject"), Some("Hello there again"));
        assert_eq!(msg.headers().len(), 2);
        assert_eq!(
            msg.section(&Section::parse("HEADER.FIELDS (SUBJECT)").unwrap())
                .unwrap(),
            b"Subject: Hello\r\n\tthere\r\n  again\r\n\r\n"
        );
    }

    // ─── Test 2: Whole-message sections ───

    #[test]
    fn test_header_and_text_sections() {
        let msg = parse(SIMPLE);
        let header = msg
            .section(&Section::parse("HEADER").unwrap())
            .unwrap();
        assert!(header.starts_with(b"From: Alice"));
        assert!(header.ends_with(b"\r\n\r\n"));

        let text = msg.section(&Section::parse("TEXT").unwrap()).unwrap();
        assert_eq!(text, b"Line one\r\nLine two\r\n");

        let whole = msg.section(&Section::default()).unwrap();
        assert_eq!(whole, SIMPLE);

        assert_eq!(header.len() + text.len(), SIMPLE.len());
    }

    #[test]
    fn test_header_fields_section() {
        let msg = parse(SIMPLE);
        let only = msg
            .section(&Section::parse("HEADER.FIELDS (subject)").unwrap())
            .unwrap();
        assert_eq!(only, b"Subject: Hello\r\n there\r\n\r\n");

        let not = msg
            .section(&Section::parse("HEADER.FIELDS.NOT (Subject Date Message-ID To)").unwrap())
            .unwrap();
        assert_eq!(not, b"From: Alice <alice@example.com>\r\n\r\n");
    }

    // ─── Test 3: Multipart ───

    #[test]
    fn test_multipart_parts() {
        let msg = parse(MULTI);
        assert_eq!(msg.root().children.len(), 2);

        let first = msg.section(&Section::parse("1").unwrap()).unwrap();
        assert_eq!(first, b"first part");

        let mime = msg.section(&Section::parse("1.MIME").unwrap()).unwrap();
        assert_eq!(mime, b"Content-Type: text/plain; charset=utf-8\r\n\r\n");

        let inner_header = msg.section(&Section::parse("2.HEADER").unwrap()).unwrap();
        assert!(inner_header.starts_with(b"Subject: inner"));

        let inner_text = msg.section(&Section::parse("2.1").unwrap()).unwrap();
        assert_eq!(inner_text, b"inner body");

        assert!(msg.section(&Section::parse("3").unwrap()).is_none());
        assert!(msg.section(&Section::parse("1.HEADER").unwrap()).is_none());
    }

    #[test]
    fn test_non_multipart_part_one_is_body() {
        let msg = parse(SIMPLE);
        let body = msg.section(&Section::parse("1").unwrap()).unwrap();
        assert_eq!(body, b"Line one\r\nLine two\r\n");
        assert!(msg.section(&Section::parse("2").unwrap()).is_none());
    }

    // ─── Test 4: Body structure ───

    #[test]
    fn test_body_structure() {
        let msg = parse(MULTI);
        let BodyStructure::Multipart { parts, subtype, params, .. } = msg.body_structure(true)
        else {
            panic!("expected multipart");
        };
        assert_eq!(subtype, "mixed");
        assert_eq!(params, vec![("boundary".to_string(), "XX".to_string())]);
        assert_eq!(parts.len(), 2);

        match &parts[0] {
            BodyStructure::Text { subtype, fields, lines, .. } => {
                assert_eq!(subtype, "plain");
                assert_eq!(fields.size, 10);
                assert_eq!(fields.encoding, "7BIT");
                assert_eq!(*lines, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &parts[1] {
            BodyStructure::Message { envelope, body, .. } => {
                assert_eq!(envelope.subject.as_deref(), Some("inner"));
                assert!(matches!(**body, BodyStructure::Text { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }

        let BodyStructure::Multipart { params, .. } = msg.body_structure(false) else {
            panic!("expected multipart");
        };
        assert!(params.is_empty());
    }

    // ─── Test 5: Content-Type parsing ───

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/HTML; Charset=\"UTF-8\"; name=\"a;b.html\"").unwrap();
        assert_eq!(ct.media_type, "text");
        assert_eq!(ct.subtype, "html");
        assert_eq!(ct.param("charset"), Some("UTF-8"));
        assert_eq!(ct.param("name"), Some("a;b.html"));
        assert!(ContentType::parse("garbage").is_none());
    }

    #[test]
    fn test_digest_defaults_to_message() {
        let raw = b"Content-Type: multipart/digest; boundary=b\r\n\r\n--b\r\n\r\nSubject: one\r\n\r\nx\r\n--b--\r\n";
        let msg = parse(raw);
        assert!(msg.root().children[0].content_type.is_message());
    }

    #[test]
    fn test_empty_message_is_an_error() {
        assert!(matches!(
            MimeParser.parse(Vec::new()),
            Err(StoreError::Parse(_))
        ));
    }

    #[test]
    fn test_headers_only_message() {
        let msg = parse(b"Subject: no body");
        assert_eq!(msg.header("subject"), Some("no body"));
        assert!(msg.text_bytes().is_empty());
    }
}
