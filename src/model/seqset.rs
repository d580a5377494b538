//! Sequence sets (`1:3,5,7:*`) and message selectors.

use std::fmt;

use crate::error::{Result, StoreError};

/// One endpoint of a sequence-set range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqBound {
    Value(u32),
    /// `*`: the largest number in use when the set is evaluated.
    Largest,
}

impl SeqBound {
    fn resolve(self, largest: u32) -> u32 {
        match self {
            SeqBound::Value(v) => v,
            SeqBound::Largest => largest,
        }
    }
}

/// A set of sequence numbers or UIDs in IMAP syntax.
///
/// `*` is kept symbolic and resolved against the mailbox's current maximum
/// at evaluation time, inside the transaction doing the evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeqSet {
    ranges: Vec<(SeqBound, SeqBound)>,
}

impl SeqSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding a single value.
    pub fn single(value: u32) -> Self {
        Self::range(value, value)
    }

    /// A set holding the inclusive range `start..=end` (either order).
    pub fn range(start: u32, end: u32) -> Self {
        let mut set = Self::new();
        set.push(SeqBound::Value(start), SeqBound::Value(end));
        set
    }

    /// `1:*`, every message.
    pub fn all() -> Self {
        let mut set = Self::new();
        set.push(SeqBound::Value(1), SeqBound::Largest);
        set
    }

    /// Add a range; endpoints may come in either order.
    pub fn push(&mut self, start: SeqBound, end: SeqBound) {
        self.ranges.push((start, end));
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Parse the IMAP representation. Zero is not a valid member.
    pub fn parse(raw: &str) -> Result<Self> {
        fn bound(raw: &str, whole: &str) -> Result<SeqBound> {
            if raw == "*" {
                return Ok(SeqBound::Largest);
            }
            match raw.parse::<u32>() {
                Ok(0) | Err(_) => Err(StoreError::InvalidArgument(format!(
                    "invalid sequence set '{whole}'"
                ))),
                Ok(v) => Ok(SeqBound::Value(v)),
            }
        }

        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StoreError::InvalidArgument("empty sequence set".into()));
        }

        let mut set = Self::new();
        for part in raw.split(',') {
            let mut subs = part.split(':');
            match (subs.next(), subs.next(), subs.next()) {
                (Some(only), None, None) => {
                    let only = bound(only, raw)?;
                    set.push(only, only);
                }
                (Some(start), Some(end), None) => {
                    set.push(bound(start, raw)?, bound(end, raw)?);
                }
                _ => {
                    return Err(StoreError::InvalidArgument(format!(
                        "invalid sequence set '{raw}'"
                    )))
                }
            }
        }
        Ok(set)
    }

    /// Whether `value` is in the set, with `*` standing for `largest`.
    ///
    /// When the mailbox is empty (`largest == 0`) nothing matches.
    pub fn contains(&self, value: u32, largest: u32) -> bool {
        if value == 0 || largest == 0 {
            return false;
        }
        self.ranges.iter().any(|&(a, b)| {
            let a = a.resolve(largest);
            let b = b.resolve(largest);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            lo <= value && value <= hi
        })
    }
}

impl fmt::Display for SeqSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_bound(f: &mut fmt::Formatter<'_>, b: SeqBound) -> fmt::Result {
            match b {
                SeqBound::Value(v) => write!(f, "{v}"),
                SeqBound::Largest => write!(f, "*"),
            }
        }

        for (i, &(a, b)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write_bound(f, a)?;
            if a != b {
                write!(f, ":")?;
                write_bound(f, b)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for SeqSet {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether identifiers are sequence numbers or UIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    Sequence,
    Uid,
}

impl IdMode {
    /// Pick the identifier this mode reports.
    pub fn pick(self, seq: u32, uid: u32) -> u32 {
        match self {
            IdMode::Sequence => seq,
            IdMode::Uid => uid,
        }
    }
}

/// A set of target messages, by sequence number or by UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub mode: IdMode,
    pub set: SeqSet,
}

impl Selector {
    pub fn sequence(set: SeqSet) -> Self {
        Self {
            mode: IdMode::Sequence,
            set,
        }
    }

    pub fn uid(set: SeqSet) -> Self {
        Self {
            mode: IdMode::Uid,
            set,
        }
    }

    /// Test a message given the mailbox's current message count and max UID.
    pub fn matches(&self, seq: u32, uid: u32, bounds: &MailboxBounds) -> bool {
        match self.mode {
            IdMode::Sequence => self.set.contains(seq, bounds.count),
            IdMode::Uid => self.set.contains(uid, bounds.max_uid),
        }
    }
}

/// Values `*` resolves to, captured at the start of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxBounds {
    pub count: u32,
    pub max_uid: u32,
}
