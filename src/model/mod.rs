//! Core data model: message records, flags, sequence sets, fetch data.

pub mod address;
pub mod fetch;
pub mod flags;
pub mod mailbox;
pub mod record;
pub mod seqset;
