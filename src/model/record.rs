//! The persisted metadata unit for one message.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::flags::{self, DELETED, RECENT, SEEN};

/// Metadata for a single message, stored in the mailbox index.
///
/// The UID is the index key, so it is not repeated in the serialized value.
/// The sequence number is never stored; it is the record's rank in the
/// current transaction's ascending-UID iteration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageRecord {
    /// Permanent identifier, taken from the index key on load.
    #[serde(skip)]
    pub uid: u32,

    /// Canonical flag names.
    pub flags: BTreeSet<String>,

    /// Time the message was appended. Immutable.
    #[serde(rename = "date")]
    pub internal_date: DateTime<Utc>,
}

impl MessageRecord {
    /// Create a record for a freshly allocated UID.
    pub fn new<I, S>(uid: u32, flag_names: I, internal_date: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            uid,
            flags: flags::flag_set(flag_names),
            internal_date,
        }
    }

    /// Decode a record value stored under `uid`.
    pub fn from_bytes(uid: u32, value: &[u8]) -> crate::error::Result<Self> {
        let mut record: MessageRecord = serde_json::from_slice(value)?;
        record.uid = uid;
        Ok(record)
    }

    /// Encode the record value (everything but the UID).
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    pub fn is_seen(&self) -> bool {
        self.has_flag(SEEN)
    }

    pub fn is_recent(&self) -> bool {
        self.has_flag(RECENT)
    }

    pub fn is_deleted(&self) -> bool {
        self.has_flag(DELETED)
    }

    /// Flags as an ordered list, as the protocol layer reports them.
    pub fn flag_list(&self) -> Vec<String> {
        self.flags.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_does_not_carry_uid() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = MessageRecord::new(42, ["\\seen", "project-x"], date);
        let bytes = record.to_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(!text.contains("42"));
        assert!(text.contains("\\\\Seen"));

        let loaded = MessageRecord::from_bytes(7, &bytes).unwrap();
        assert_eq!(loaded.uid, 7);
        assert_eq!(loaded.internal_date, date);
        assert!(loaded.is_seen());
        assert!(loaded.has_flag("project-x"));
    }

    #[test]
    fn test_corrupt_value_is_rejected() {
        let err = MessageRecord::from_bytes(1, b"{not json").unwrap_err();
        assert!(matches!(err, crate::error::StoreError::Corrupt(_)));
    }
}
