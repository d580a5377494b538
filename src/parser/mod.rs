//! Message parsing: header decoding, MIME structure, and the parser
//! collaborator used by the mailbox store.

pub mod header;
pub mod mime;

pub use mime::{MimeParser, ParsedMessage};

use crate::error::Result;

/// Turns raw message bytes into a structured content tree.
///
/// The store calls this only when a listing or search needs content. Errors
/// are propagated to the caller and never retried.
pub trait MessageParser: Send + Sync {
    fn parse(&self, raw: Vec<u8>) -> Result<ParsedMessage>;
}
