//! Mailbox storage: the index plus one body file per message, and the
//! operations built on the two.

pub mod body;
pub mod cancel;
pub mod mailbox;
pub mod projector;
pub mod reconcile;

pub use body::BodyStore;
pub use cancel::CancelToken;
pub use mailbox::{FlagUpdate, MailboxStore};
pub use reconcile::{ConsistencyReport, ReconcilePolicy};
