//! Mailbox index: UID codec and the transactional record store.

pub mod codec;
pub mod db;

use std::ops::ControlFlow;

use crate::error::Result;
use crate::model::record::MessageRecord;
use crate::model::seqset::MailboxBounds;

pub use db::{IndexOptions, MailboxIndex, ReadTxn, WriteTxn};

impl ReadTxn<'_> {
    /// Visit every record in ascending UID order with its sequence number.
    ///
    /// Sequence numbers are the 1-based rank in this iteration and are only
    /// meaningful inside the current transaction.
    pub fn scan_records(
        &self,
        mut visit: impl FnMut(u32, MessageRecord) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut seq = 0u32;
        self.scan(|key, value| {
            let uid = codec::decode(key)?;
            seq += 1;
            visit(seq, MessageRecord::from_bytes(uid, value)?)
        })
    }

    /// Load the record stored for `uid`.
    pub fn record(&self, uid: u32) -> Result<Option<MessageRecord>> {
        self.get(&codec::encode(uid))?
            .map(|value| MessageRecord::from_bytes(uid, &value))
            .transpose()
    }

    /// Message count and largest UID, which is what `*` resolves to.
    pub fn bounds(&self) -> Result<MailboxBounds> {
        let max_uid = match self.last_key()? {
            Some(key) => codec::decode(&key)?,
            None => 0,
        };
        Ok(MailboxBounds {
            count: self.count()?,
            max_uid,
        })
    }
}

impl WriteTxn<'_> {
    /// Allocate the next UID from the durable counter.
    pub fn next_uid(&self) -> Result<u32> {
        codec::uid_from_sequence(self.next_sequence(codec::MESSAGES_BUCKET)?)
    }

    /// Store `record` under its UID.
    pub fn put_record(&self, record: &MessageRecord) -> Result<()> {
        self.put(&codec::encode(record.uid), &record.to_bytes()?)
    }
}
