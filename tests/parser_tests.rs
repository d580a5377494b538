//! Integration tests for header decoding, MIME sections and content matching.

use diskmail::model::fetch::{BodyStructure, Section};
use diskmail::parser::header::{decode_encoded_words, parse_date};
use diskmail::parser::{MessageParser, MimeParser, ParsedMessage};
use diskmail::search::fulltext::{ContentMatcher, TextMatcher};
use diskmail::search::query::SearchKey;

fn parse(raw: &[u8]) -> ParsedMessage {
    MimeParser.parse(raw.to_vec()).unwrap()
}

fn matches(query: &str, message: &ParsedMessage) -> bool {
    let key = SearchKey::parse(query).unwrap();
    TextMatcher.matches(&key, message)
}

const FORWARDED: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: =?UTF-8?B?SG9sYSBtdW5kbw==?=\r\n\
Date: Thu, 04 Jan 2024 10:00:00 +0000\r\n\
Message-ID: <fwd001@example.com>\r\n\
In-Reply-To: <orig001@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: text/plain; charset=iso-8859-1\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
Voil=E0 le caf=E9\r\n\
--outer\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
From: Carol <carol@example.com>\r\n\
Subject: original\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
inner plain\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>inner <b>html</b></p>\r\n\
--inner--\r\n\
--outer--\r\n";

// ─── Test 1: Encoded words ──────────────────────────────────────────

#[test]
fn test_decode_encoded_words_base64_utf8() {
    assert_eq!(
        decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="),
        "Hola mundo"
    );
}

#[test]
fn test_decode_encoded_words_q_iso8859() {
    assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
}

#[test]
fn test_decode_encoded_words_plain_passthrough() {
    assert_eq!(decode_encoded_words("Normal subject"), "Normal subject");
}

// ─── Test 2: Date parsing in multiple formats ───────────────────────

#[test]
fn test_date_parsing_formats() {
    let expected = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
    assert_eq!(expected.to_rfc3339(), "2024-01-04T10:00:00+00:00");
    assert_eq!(parse_date("04 Jan 2024 10:00:00 +0000"), Some(expected));
    assert_eq!(parse_date("2024-01-04T10:00:00Z"), Some(expected));
    assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    assert!(parse_date("").is_none());
}

// ─── Test 3: Envelope of a forwarded message ────────────────────────

#[test]
fn test_envelope_fields() {
    let msg = parse(FORWARDED);
    let env = msg.envelope();
    assert_eq!(env.subject.as_deref(), Some("=?UTF-8?B?SG9sYSBtdW5kbw==?="));
    assert_eq!(env.from[0].addr_spec(), "alice@example.com");
    assert_eq!(env.sender, env.from);
    assert_eq!(env.reply_to, env.from);
    assert_eq!(env.message_id.as_deref(), Some("<fwd001@example.com>"));
    assert_eq!(env.in_reply_to.as_deref(), Some("<orig001@example.com>"));
    assert!(env.cc.is_empty());
}

// ─── Test 4: Nested section paths ───────────────────────────────────

#[test]
fn test_nested_section_paths() {
    let msg = parse(FORWARDED);
    let section = |s: &str| msg.section(&Section::parse(s).unwrap());

    assert_eq!(section("1").unwrap(), b"Voil=E0 le caf=E9");
    assert!(section("2.HEADER")
        .unwrap()
        .starts_with(b"From: Carol <carol@example.com>\r\n"));
    assert_eq!(section("2.1").unwrap(), b"inner plain");
    assert_eq!(section("2.2").unwrap(), b"<p>inner <b>html</b></p>");
    assert_eq!(
        section("2.HEADER.FIELDS (SUBJECT)").unwrap(),
        b"Subject: original\r\n\r\n"
    );
    assert!(section("2.3").is_none());
    assert!(section("1.TEXT").is_none());
}

#[test]
fn test_nested_body_structure() {
    let msg = parse(FORWARDED);
    let BodyStructure::Multipart { parts, subtype, .. } = msg.body_structure(true) else {
        panic!("expected multipart");
    };
    assert_eq!(subtype, "mixed");
    assert_eq!(parts.len(), 2);
    match &parts[0] {
        BodyStructure::Text { subtype, fields, .. } => {
            assert_eq!(subtype, "plain");
            assert_eq!(fields.encoding, "QUOTED-PRINTABLE");
        }
        other => panic!("unexpected {other:?}"),
    }
    match &parts[1] {
        BodyStructure::Message { envelope, body, .. } => {
            assert_eq!(envelope.subject.as_deref(), Some("original"));
            assert!(matches!(**body, BodyStructure::Multipart { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ─── Test 5: Content matching ───────────────────────────────────────

#[test]
fn test_content_matching_decodes_text() {
    let msg = parse(FORWARDED);
    assert!(matches("SUBJECT \"hola mundo\"", &msg));
    assert!(matches("BODY café", &msg));
    assert!(matches("BODY \"inner html\"", &msg));
    assert!(matches("TEXT alice", &msg));
    assert!(!matches("BODY absent", &msg));
    assert!(matches("HEADER In-Reply-To \"\"", &msg));
    assert!(!matches("HEADER X-Missing \"\"", &msg));
}

#[test]
fn test_content_matching_sent_dates() {
    let msg = parse(FORWARDED);
    assert!(matches("SENTON 4-Jan-2024", &msg));
    assert!(matches("SENTSINCE 2024-01-01", &msg));
    assert!(!matches("SENTBEFORE 4-Jan-2024", &msg));
}
