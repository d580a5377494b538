//! Mailbox-level metadata: listing info and `STATUS` results.

use super::flags::{self, ANY_KEYWORD};

/// Static description of a mailbox, supplied by whoever owns the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MailboxInfo {
    pub name: String,
    /// Hierarchy delimiter, if the mailbox lives in a hierarchy.
    pub delimiter: Option<char>,
    /// Name attributes such as `\Noinferiors`.
    pub attributes: Vec<String>,
}

impl MailboxInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: Some('/'),
            attributes: Vec::new(),
        }
    }
}

/// A status attribute the caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl StatusItem {
    pub const ALL: [StatusItem; 5] = [
        StatusItem::Messages,
        StatusItem::Recent,
        StatusItem::UidNext,
        StatusItem::UidValidity,
        StatusItem::Unseen,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MESSAGES" => Some(Self::Messages),
            "RECENT" => Some(Self::Recent),
            "UIDNEXT" => Some(Self::UidNext),
            "UIDVALIDITY" => Some(Self::UidValidity),
            "UNSEEN" => Some(Self::Unseen),
            _ => None,
        }
    }
}

/// Counters and markers reported by `status`.
///
/// Every counter is always computed; `items` records which ones the caller
/// asked for so the protocol layer can echo exactly those.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MailboxStatus {
    pub name: String,
    pub items: Vec<StatusItem>,
    pub messages: u32,
    pub recent: u32,
    pub unseen: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    /// Flags defined in the mailbox.
    pub flags: Vec<String>,
    /// Flags clients may change permanently; `\*` allows new keywords.
    pub permanent_flags: Vec<String>,
}

impl MailboxStatus {
    pub(crate) fn empty(name: &str, items: &[StatusItem]) -> Self {
        Self {
            name: name.to_string(),
            items: items.to_vec(),
            messages: 0,
            recent: 0,
            unseen: 0,
            uid_next: 1,
            uid_validity: 0,
            flags: vec![
                flags::ANSWERED.to_string(),
                flags::FLAGGED.to_string(),
                flags::DELETED.to_string(),
                flags::SEEN.to_string(),
                flags::DRAFT.to_string(),
            ],
            permanent_flags: vec![ANY_KEYWORD.to_string()],
        }
    }

    pub fn wants(&self, item: StatusItem) -> bool {
        self.items.contains(&item)
    }
}
