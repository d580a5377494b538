//! Metadata evaluation of search keys against an index record.
//!
//! Runs with no I/O: sequence/UID membership, internal date and flags are all
//! in the record. Keys that need the message content evaluate to "unknown",
//! and unknowns propagate through `NOT`/`OR`/`AND` with three-valued logic so
//! that a record is only opened when the metadata cannot decide it.

use crate::model::record::MessageRecord;
use crate::model::seqset::MailboxBounds;

use super::query::SearchKey;

/// The record being tested and where it sits in the current transaction.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub seq: u32,
    pub record: &'a MessageRecord,
    pub bounds: &'a MailboxBounds,
}

/// Evaluate `key` from metadata alone.
///
/// `Some(b)` is a decided result; `None` means the outcome depends on a
/// content key.
pub fn eval_metadata(key: &SearchKey, candidate: &Candidate<'_>) -> Option<bool> {
    let record = candidate.record;
    let day = record.internal_date.date_naive();

    match key {
        SearchKey::All => Some(true),
        SearchKey::SequenceSet(set) => Some(set.contains(candidate.seq, candidate.bounds.count)),
        SearchKey::Uid(set) => Some(set.contains(record.uid, candidate.bounds.max_uid)),
        SearchKey::Flag(flag) => Some(record.has_flag(flag)),
        SearchKey::Unflagged(flag) => Some(!record.has_flag(flag)),
        SearchKey::Before(date) => Some(day < *date),
        SearchKey::On(date) => Some(day == *date),
        SearchKey::Since(date) => Some(day >= *date),
        SearchKey::Not(inner) => eval_metadata(inner, candidate).map(|b| !b),
        SearchKey::Or(left, right) => {
            match (eval_metadata(left, candidate), eval_metadata(right, candidate)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
        SearchKey::And(keys) => {
            let mut decided = true;
            for key in keys {
                match eval_metadata(key, candidate) {
                    Some(false) => return Some(false),
                    Some(true) => {}
                    None => decided = false,
                }
            }
            decided.then_some(true)
        }
        _ => None,
    }
}
