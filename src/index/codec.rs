//! UID key codec and on-disk naming.
//!
//! ```text
//! mailbox dir/
//! ├── index.db            SQLite store (WAL side files next to it)
//! │    messages:  key BLOB (4 bytes, big-endian UID) → record JSON
//! │    sequences: "messages" → last allocated UID
//! │    meta:      format_version, uid_validity
//! ├── 00000001.eml        body of UID 1
//! ├── 00000002.eml        body of UID 2
//! └── …
//! ```
//!
//! Big-endian fixed-width keys sort bytewise in numeric order, so the index's
//! key order is ascending UID order.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, StoreError};

/// Width of an encoded UID key in bytes.
pub const KEY_LEN: usize = 4;

/// Current index schema version, stored in the `meta` table.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the single message bucket.
pub const MESSAGES_BUCKET: &str = "messages";

/// An encoded UID.
pub type UidKey = [u8; KEY_LEN];

/// Encode a UID as its fixed-width sortable key.
pub fn encode(uid: u32) -> UidKey {
    let mut key = [0u8; KEY_LEN];
    BigEndian::write_u32(&mut key, uid);
    key
}

/// Decode a key produced by [`encode`]. Any other length is corruption.
pub fn decode(key: &[u8]) -> Result<u32> {
    if key.len() != KEY_LEN {
        return Err(StoreError::Corrupt(format!(
            "index key has {} bytes, expected {KEY_LEN}",
            key.len()
        )));
    }
    Ok(BigEndian::read_u32(key))
}

/// Body file name for a key: lowercase hex of the key plus `extension`.
///
/// Example: UID 42 with extension `eml` → `0000002a.eml`.
pub fn body_file_name(key: &UidKey, extension: &str) -> String {
    let mut name = String::with_capacity(KEY_LEN * 2 + 1 + extension.len());
    for byte in key {
        name.push_str(&format!("{byte:02x}"));
    }
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    name
}

/// Inverse of [`body_file_name`]; `None` for names this store never writes.
pub fn uid_from_file_name(name: &str, extension: &str) -> Option<u32> {
    let stem = if extension.is_empty() {
        name
    } else {
        name.strip_suffix(extension)?.strip_suffix('.')?
    };
    if stem.len() != KEY_LEN * 2 || !stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u32::from_str_radix(stem, 16).ok()
}

/// Convert a raw counter value to the next UID, refusing to wrap.
pub fn uid_from_sequence(value: i64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|&uid| uid != 0)
        .ok_or(StoreError::UidExhausted)
}
