//! Attribute projection: turns an index record plus a requested attribute
//! list into a [`FetchedMessage`].

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, StoreError};
use crate::model::fetch::{FetchAttribute, FetchItem, FetchedMessage};
use crate::model::record::MessageRecord;
use crate::parser::{MessageParser, ParsedMessage};

use super::body::BodyStore;

/// Projects records of one mailbox.
pub struct Projector<'a> {
    bodies: &'a BodyStore,
    parser: &'a dyn MessageParser,
}

impl<'a> Projector<'a> {
    pub fn new(bodies: &'a BodyStore, parser: &'a dyn MessageParser) -> Self {
        Self { bodies, parser }
    }

    /// Build the requested attributes for one message, in request order.
    ///
    /// Metadata attributes never touch the body file. The file is opened at
    /// most once for the whole call and parsed at most once.
    pub fn project(
        &self,
        seq: u32,
        record: &MessageRecord,
        attrs: &[FetchAttribute],
    ) -> Result<FetchedMessage> {
        let mut body = LazyBody::new(self.bodies, self.parser, record.uid);
        let mut items = Vec::with_capacity(attrs.len());

        for attr in attrs {
            let item = match attr {
                FetchAttribute::Flags => FetchItem::Flags(record.flag_list()),
                FetchAttribute::Uid => FetchItem::Uid(record.uid),
                FetchAttribute::InternalDate => FetchItem::InternalDate(record.internal_date),
                FetchAttribute::Rfc822Size => FetchItem::Rfc822Size(body.size()?),
                FetchAttribute::Envelope => FetchItem::Envelope(body.parsed()?.envelope()),
                FetchAttribute::BodyStructure => {
                    FetchItem::BodyStructure(body.parsed()?.body_structure(true))
                }
                FetchAttribute::Body => FetchItem::Body(body.parsed()?.body_structure(false)),
                FetchAttribute::Rfc822 => FetchItem::Rfc822(body.parsed()?.raw().to_vec()),
                FetchAttribute::Rfc822Header => {
                    FetchItem::Rfc822Header(body.parsed()?.header_bytes().to_vec())
                }
                FetchAttribute::Rfc822Text => {
                    FetchItem::Rfc822Text(body.parsed()?.text_bytes().to_vec())
                }
                FetchAttribute::BodySection {
                    section, partial, ..
                } => {
                    let data = body.parsed()?.section(section).map(|bytes| match partial {
                        Some((origin, count)) => slice_partial(&bytes, *origin, *count),
                        None => bytes,
                    });
                    FetchItem::BodySection {
                        section: section.clone(),
                        origin: partial.map(|(origin, _)| origin),
                        data,
                    }
                }
            };
            items.push(item);
        }

        Ok(FetchedMessage {
            seq,
            uid: record.uid,
            items,
        })
    }
}

/// `<origin.count>` applied to section data.
fn slice_partial(bytes: &[u8], origin: u32, count: u32) -> Vec<u8> {
    let start = (origin as usize).min(bytes.len());
    let end = start.saturating_add(count as usize).min(bytes.len());
    bytes[start..end].to_vec()
}

/// The body file of one message, opened and parsed on first use.
struct LazyBody<'a> {
    bodies: &'a BodyStore,
    parser: &'a dyn MessageParser,
    uid: u32,
    file: Option<File>,
    parsed: Option<ParsedMessage>,
}

impl<'a> LazyBody<'a> {
    fn new(bodies: &'a BodyStore, parser: &'a dyn MessageParser, uid: u32) -> Self {
        Self {
            bodies,
            parser,
            uid,
            file: None,
            parsed: None,
        }
    }

    fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(self.bodies.open(self.uid)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| StoreError::Corrupt("body file handle missing".into()))
    }

    fn size(&mut self) -> Result<u64> {
        if let Some(parsed) = &self.parsed {
            return Ok(parsed.size() as u64);
        }
        let path = self.bodies.path_for(self.uid);
        let meta = self
            .file()?
            .metadata()
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(meta.len())
    }

    fn parsed(&mut self) -> Result<&ParsedMessage> {
        if self.parsed.is_none() {
            let path = self.bodies.path_for(self.uid);
            let file = self.file()?;
            file.seek(SeekFrom::Start(0))
                .map_err(|e| StoreError::io(&path, e))?;
            let mut raw = Vec::new();
            file.read_to_end(&mut raw)
                .map_err(|e| StoreError::io(&path, e))?;
            self.parsed = Some(self.parser.parse(raw)?);
        }
        self.parsed
            .as_ref()
            .ok_or_else(|| StoreError::Corrupt("parsed body missing".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use crate::model::fetch::Section;
    use crate::parser::MimeParser;

    const RAW: &[u8] = b"Subject: projected\r\nFrom: a@example.com\r\n\r\nHello, world\r\n";

    #[derive(Default)]
    struct CountingParser(AtomicUsize);

    impl MessageParser for CountingParser {
        fn parse(&self, raw: Vec<u8>) -> Result<ParsedMessage> {
            self.0.fetch_add(1, Ordering::SeqCst);
            MimeParser.parse(raw)
        }
    }

    fn setup() -> (tempfile::TempDir, BodyStore, MessageRecord) {
        let dir = tempfile::tempdir().unwrap();
        let bodies = BodyStore::new(dir.path(), "eml", false);
        bodies.write(9, &mut &RAW[..]).unwrap();
        let record = MessageRecord::new(9, ["\\Seen"], Utc::now());
        (dir, bodies, record)
    }

    // ─── Test 1: Metadata only ───

    #[test]
    fn test_metadata_attributes_need_no_file() {
        let (_dir, bodies, record) = setup();
        bodies.remove(9).unwrap();
        let parser = CountingParser::default();
        let projector = Projector::new(&bodies, &parser);

        let attrs = FetchAttribute::parse_list("(FLAGS UID INTERNALDATE X-UNKNOWN)");
        let fetched = projector.project(4, &record, &attrs).unwrap();
        assert_eq!(fetched.seq, 4);
        assert_eq!(fetched.uid, 9);
        assert_eq!(fetched.items.len(), 3);
        assert_eq!(fetched.flags(), Some(&["\\Seen".to_string()][..]));
        assert_eq!(parser.0.load(Ordering::SeqCst), 0);
    }

    // ─── Test 2: Content attributes share one parse ───

    #[test]
    fn test_content_attributes_parse_once() {
        let (_dir, bodies, record) = setup();
        let parser = CountingParser::default();
        let projector = Projector::new(&bodies, &parser);

        let attrs = FetchAttribute::parse_list(
            "(RFC822.SIZE ENVELOPE BODYSTRUCTURE BODY.PEEK[TEXT] BODY[HEADER.FIELDS (SUBJECT)])",
        );
        let fetched = projector.project(1, &record, &attrs).unwrap();
        assert_eq!(parser.0.load(Ordering::SeqCst), 1);
        assert_eq!(fetched.size(), Some(RAW.len() as u64));
        assert_eq!(
            fetched.envelope().unwrap().subject.as_deref(),
            Some("projected")
        );
        assert_eq!(
            fetched.section(&Section::parse("TEXT").unwrap()),
            Some(&b"Hello, world\r\n"[..])
        );
        assert_eq!(
            fetched.section(&Section::parse("HEADER.FIELDS (SUBJECT)").unwrap()),
            Some(&b"Subject: projected\r\n\r\n"[..])
        );
    }

    #[test]
    fn test_partial_and_missing_sections() {
        let (_dir, bodies, record) = setup();
        let projector = Projector::new(&bodies, &MimeParser);

        let attrs = FetchAttribute::parse_list("(BODY[TEXT]<7.100> BODY[TEXT]<500.5> BODY[2])");
        let fetched = projector.project(1, &record, &attrs).unwrap();
        match &fetched.items[0] {
            FetchItem::BodySection { origin, data, .. } => {
                assert_eq!(*origin, Some(7));
                assert_eq!(data.as_deref(), Some(&b"world\r\n"[..]));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &fetched.items[1] {
            FetchItem::BodySection { data, .. } => assert_eq!(data.as_deref(), Some(&b""[..])),
            other => panic!("unexpected {other:?}"),
        }
        match &fetched.items[2] {
            FetchItem::BodySection { data, .. } => assert!(data.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    // ─── Test 3: Missing body ───

    #[test]
    fn test_missing_body_fails_content_projection() {
        let (_dir, bodies, record) = setup();
        bodies.remove(9).unwrap();
        let projector = Projector::new(&bodies, &MimeParser);
        let err = projector
            .project(1, &record, &[FetchAttribute::Envelope])
            .unwrap_err();
        assert!(err.is_body_error());
    }
}
