//! `diskmail`: the on-disk storage engine behind one mailbox of a mail
//! server.
//!
//! Each mailbox is a directory holding a transactional index of message
//! records (keyed by UID) and one raw body file per message. The
//! [`store::MailboxStore`] type implements the mailbox operations (status,
//! listing, search, append, flag updates, expunge) on top of the two.

pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod parser;
pub mod search;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{CancelToken, MailboxStore};
