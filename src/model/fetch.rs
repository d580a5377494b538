//! Fetch attributes and the projected message data returned by listings.

use std::fmt;

use chrono::{DateTime, Utc};

use super::address::EnvelopeAddress;

/// Which part of a body section is requested after the part path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionText {
    Header,
    HeaderFields(Vec<String>),
    HeaderFieldsNot(Vec<String>),
    Text,
    Mime,
}

/// A `BODY[...]` section specifier: a MIME part path plus an optional text
/// selector. An empty path with no selector is the whole message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Section {
    pub part: Vec<u32>,
    pub text: Option<SectionText>,
}

impl Section {
    /// Parse the text between the brackets of `BODY[...]`.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let mut section = Section::default();
        if spec.is_empty() {
            return Some(section);
        }

        let (path, fields) = match spec.find('(') {
            Some(open) => {
                let close = spec.rfind(')')?;
                if close < open {
                    return None;
                }
                let names = spec[open + 1..close]
                    .split_whitespace()
                    .map(|n| n.trim_matches('"').to_string())
                    .collect::<Vec<_>>();
                (spec[..open].trim(), Some(names))
            }
            None => (spec, None),
        };

        let mut rest = path;
        while !rest.is_empty() {
            let (token, tail) = match rest.find('.') {
                Some(dot) => (&rest[..dot], &rest[dot + 1..]),
                None => (rest, ""),
            };
            match token.parse::<u32>() {
                Ok(0) => return None,
                Ok(n) => {
                    section.part.push(n);
                    rest = tail;
                }
                Err(_) => break,
            }
        }

        if !rest.is_empty() {
            let text = match (rest.to_ascii_uppercase().as_str(), fields) {
                ("HEADER", None) => SectionText::Header,
                ("TEXT", None) => SectionText::Text,
                ("MIME", None) if !section.part.is_empty() => SectionText::Mime,
                ("HEADER.FIELDS", Some(names)) => SectionText::HeaderFields(names),
                ("HEADER.FIELDS.NOT", Some(names)) => SectionText::HeaderFieldsNot(names),
                _ => return None,
            };
            section.text = Some(text);
        }

        Some(section)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self
            .part
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{path}")?;
        let Some(text) = &self.text else {
            return Ok(());
        };
        if !path.is_empty() {
            write!(f, ".")?;
        }
        match text {
            SectionText::Header => write!(f, "HEADER"),
            SectionText::Text => write!(f, "TEXT"),
            SectionText::Mime => write!(f, "MIME"),
            SectionText::HeaderFields(names) => write!(f, "HEADER.FIELDS ({})", names.join(" ")),
            SectionText::HeaderFieldsNot(names) => {
                write!(f, "HEADER.FIELDS.NOT ({})", names.join(" "))
            }
        }
    }
}

/// One requested fetch attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    Flags,
    Uid,
    InternalDate,
    Envelope,
    BodyStructure,
    /// `BODY` without brackets: the non-extensible body structure.
    Body,
    Rfc822Size,
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    BodySection {
        section: Section,
        partial: Option<(u32, u32)>,
        peek: bool,
    },
}

impl FetchAttribute {
    /// Parse one attribute name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let attr = match upper.as_str() {
            "FLAGS" => Self::Flags,
            "UID" => Self::Uid,
            "INTERNALDATE" => Self::InternalDate,
            "ENVELOPE" => Self::Envelope,
            "BODYSTRUCTURE" => Self::BodyStructure,
            "BODY" => Self::Body,
            "RFC822.SIZE" => Self::Rfc822Size,
            "RFC822" => Self::Rfc822,
            "RFC822.HEADER" => Self::Rfc822Header,
            "RFC822.TEXT" => Self::Rfc822Text,
            _ => return Self::parse_section(name.trim()),
        };
        Some(attr)
    }

    fn parse_section(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        let (peek, rest) = if upper.starts_with("BODY.PEEK[") {
            (true, &name["BODY.PEEK[".len()..])
        } else if upper.starts_with("BODY[") {
            (false, &name["BODY[".len()..])
        } else {
            return None;
        };

        let close = rest.find(']')?;
        let section = Section::parse(&rest[..close])?;
        let tail = &rest[close + 1..];

        let partial = if tail.is_empty() {
            None
        } else {
            let inner = tail.strip_prefix('<')?.strip_suffix('>')?;
            let (origin, count) = inner.split_once('.')?;
            Some((origin.parse().ok()?, count.parse().ok()?))
        };

        Some(Self::BodySection {
            section,
            partial,
            peek,
        })
    }

    /// Parse a whitespace separated attribute list, optionally parenthesised,
    /// expanding the `ALL`, `FAST` and `FULL` macros. Unknown names are
    /// skipped.
    pub fn parse_list(input: &str) -> Vec<Self> {
        let input = input.trim();
        let input = input
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(input);

        let mut attrs = Vec::new();
        for token in tokenize(input) {
            match token.to_ascii_uppercase().as_str() {
                "ALL" => attrs.extend([
                    Self::Flags,
                    Self::InternalDate,
                    Self::Rfc822Size,
                    Self::Envelope,
                ]),
                "FAST" => attrs.extend([Self::Flags, Self::InternalDate, Self::Rfc822Size]),
                "FULL" => attrs.extend([
                    Self::Flags,
                    Self::InternalDate,
                    Self::Rfc822Size,
                    Self::Envelope,
                    Self::Body,
                ]),
                _ => {
                    if let Some(attr) = Self::parse(&token) {
                        attrs.push(attr);
                    }
                }
            }
        }
        attrs
    }
}

/// Split on whitespace that is not inside `[...]` or `(...)`.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for ch in input.chars() {
        match ch {
            '[' | '(' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// The IMAP envelope of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<EnvelopeAddress>,
    pub sender: Vec<EnvelopeAddress>,
    pub reply_to: Vec<EnvelopeAddress>,
    pub to: Vec<EnvelopeAddress>,
    pub cc: Vec<EnvelopeAddress>,
    pub bcc: Vec<EnvelopeAddress>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// `Content-Disposition` of a part.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Disposition {
    pub kind: String,
    pub params: Vec<(String, String)>,
}

/// Fields shared by every non-multipart body.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BodyFields {
    pub params: Vec<(String, String)>,
    pub id: Option<String>,
    pub description: Option<String>,
    pub encoding: String,
    /// Encoded size of the part body in bytes.
    pub size: u32,
}

/// The MIME structure of a message, as reported by `BODYSTRUCTURE`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum BodyStructure {
    Text {
        subtype: String,
        fields: BodyFields,
        lines: u32,
        disposition: Option<Disposition>,
    },
    Message {
        fields: BodyFields,
        envelope: Box<Envelope>,
        body: Box<BodyStructure>,
        lines: u32,
        disposition: Option<Disposition>,
    },
    Basic {
        media_type: String,
        subtype: String,
        fields: BodyFields,
        disposition: Option<Disposition>,
    },
    Multipart {
        parts: Vec<BodyStructure>,
        subtype: String,
        params: Vec<(String, String)>,
        disposition: Option<Disposition>,
    },
}

/// One piece of projected message data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Flags(Vec<String>),
    Uid(u32),
    InternalDate(DateTime<Utc>),
    Rfc822Size(u64),
    Envelope(Envelope),
    BodyStructure(BodyStructure),
    Body(BodyStructure),
    Rfc822(Vec<u8>),
    Rfc822Header(Vec<u8>),
    Rfc822Text(Vec<u8>),
    BodySection {
        section: Section,
        origin: Option<u32>,
        /// `None` when the section does not exist in this message.
        data: Option<Vec<u8>>,
    },
}

/// A message as seen by one listing: its transient sequence number, its UID,
/// and the requested attributes in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: u32,
    pub items: Vec<FetchItem>,
}

impl FetchedMessage {
    pub fn flags(&self) -> Option<&[String]> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Flags(flags) => Some(flags.as_slice()),
            _ => None,
        })
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Envelope(env) => Some(env),
            _ => None,
        })
    }

    pub fn size(&self) -> Option<u64> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Rfc822Size(size) => Some(*size),
            _ => None,
        })
    }

    /// Data of the first `BODY[...]` item for `section`.
    pub fn section(&self, section: &Section) -> Option<&[u8]> {
        self.items.iter().find_map(|item| match item {
            FetchItem::BodySection {
                section: s,
                data: Some(data),
                ..
            } if s == section => Some(data.as_slice()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_attributes() {
        assert_eq!(FetchAttribute::parse("flags"), Some(FetchAttribute::Flags));
        assert_eq!(
            FetchAttribute::parse("RFC822.SIZE"),
            Some(FetchAttribute::Rfc822Size)
        );
        assert_eq!(FetchAttribute::parse("X-GM-LABELS"), None);
    }

    #[test]
    fn test_parse_body_sections() {
        let attr = FetchAttribute::parse("BODY.PEEK[1.2.HEADER.FIELDS (From To)]<0.100>").unwrap();
        assert_eq!(
            attr,
            FetchAttribute::BodySection {
                section: Section {
                    part: vec![1, 2],
                    text: Some(SectionText::HeaderFields(vec![
                        "From".to_string(),
                        "To".to_string()
                    ])),
                },
                partial: Some((0, 100)),
                peek: true,
            }
        );

        let whole = FetchAttribute::parse("BODY[]").unwrap();
        assert_eq!(
            whole,
            FetchAttribute::BodySection {
                section: Section::default(),
                partial: None,
                peek: false,
            }
        );

        assert!(FetchAttribute::parse("BODY[MIME]").is_none());
        assert!(FetchAttribute::parse("BODY[0]").is_none());
        assert!(FetchAttribute::parse("BODY[TEXT").is_none());
    }

    #[test]
    fn test_parse_list_with_macros_and_unknowns() {
        let attrs = FetchAttribute::parse_list("(FAST UID BODY[HEADER.FIELDS (SUBJECT)] X-BOGUS)");
        assert_eq!(attrs.len(), 5);
        assert_eq!(attrs[0], FetchAttribute::Flags);
        assert_eq!(attrs[3], FetchAttribute::Uid);
        assert!(matches!(attrs[4], FetchAttribute::BodySection { .. }));
    }

    #[test]
    fn test_section_display() {
        let section = Section::parse("2.header.fields.not (X-Spam)").unwrap();
        assert_eq!(section.to_string(), "2.HEADER.FIELDS.NOT (X-Spam)");
        assert_eq!(Section::parse("3.MIME").unwrap().to_string(), "3.MIME");
    }
}
