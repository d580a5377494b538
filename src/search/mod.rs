//! Search engine: predicate parsing, metadata evaluation, and content
//! matching.
//!
//! Evaluation of one record happens in two phases. [`metadata::eval_metadata`]
//! decides whatever it can from the index record. Only when it returns
//! "unknown" is the body parsed and [`evaluate`] run with a content matcher.

pub mod fulltext;
pub mod metadata;
pub mod query;

use crate::parser::ParsedMessage;

use self::fulltext::ContentMatcher;
use self::metadata::{eval_metadata, Candidate};
use self::query::SearchKey;

/// Fully evaluate `key` for a record whose content has been parsed.
pub fn evaluate(
    key: &SearchKey,
    candidate: &Candidate<'_>,
    message: &ParsedMessage,
    matcher: &dyn ContentMatcher,
) -> bool {
    match key {
        SearchKey::Not(inner) => !evaluate(inner, candidate, message, matcher),
        SearchKey::Or(left, right) => {
            evaluate(left, candidate, message, matcher)
                || evaluate(right, candidate, message, matcher)
        }
        SearchKey::And(keys) => keys
            .iter()
            .all(|k| evaluate(k, candidate, message, matcher)),
        k if k.is_content_key() => matcher.matches(k, message),
        k => eval_metadata(k, candidate).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::record::MessageRecord;
    use crate::model::seqset::MailboxBounds;
    use crate::parser::{MessageParser, MimeParser};

    struct CountingMatcher(AtomicUsize);

    impl ContentMatcher for CountingMatcher {
        fn matches(&self, key: &SearchKey, message: &ParsedMessage) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            fulltext::TextMatcher.matches(key, message)
        }
    }

    #[test]
    fn test_evaluate_mixes_metadata_and_content() {
        let record = MessageRecord::new(
            3,
            ["\\Seen"],
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        );
        let bounds = MailboxBounds {
            count: 3,
            max_uid: 3,
        };
        let candidate = Candidate {
            seq: 3,
            record: &record,
            bounds: &bounds,
        };
        let message = MimeParser
            .parse(b"Subject: lunch plans\r\n\r\nPizza?\r\n".to_vec())
            .unwrap();
        let matcher = CountingMatcher(AtomicUsize::new(0));

        let key = SearchKey::parse("SEEN OR SUBJECT lunch BODY sushi").unwrap();
        assert!(evaluate(&key, &candidate, &message, &matcher));

        let key = SearchKey::parse("NOT (UID 3 BODY pizza)").unwrap();
        assert!(!evaluate(&key, &candidate, &message, &matcher));

        let key = SearchKey::parse("UNSEEN BODY pizza").unwrap();
        let before = matcher.0.load(Ordering::SeqCst);
        assert!(!evaluate(&key, &candidate, &message, &matcher));
        assert_eq!(matcher.0.load(Ordering::SeqCst), before);
    }
}
