//! Consistency pass between the index and the body files.
//!
//! Appends and expunges span two failure domains, so two kinds of drift can
//! be left behind: records whose body was never written (orphan records) and
//! body files whose record is gone (dangling bodies). This pass reports both
//! and can delete dangling bodies. It never creates records and never deletes
//! orphan records, which may belong to an append that is still running.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use tracing::{info, warn};

use crate::error::Result;
use crate::index::MailboxIndex;

use super::body::BodyStore;

/// What [`run`] may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilePolicy {
    /// Only report.
    #[default]
    ReportOnly,
    /// Delete body files that have no record.
    RemoveDanglingBodies,
}

/// Findings of one consistency pass. All lists are ascending UIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsistencyReport {
    /// Records without a body file.
    pub orphan_records: Vec<u32>,
    /// Body files without a record.
    pub dangling_bodies: Vec<u32>,
    /// Dangling bodies deleted by this pass.
    pub removed_bodies: Vec<u32>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_records.is_empty() && self.dangling_bodies.is_empty()
    }
}

/// Compare the index with the body directory.
pub fn run(
    index: &MailboxIndex,
    bodies: &BodyStore,
    policy: ReconcilePolicy,
) -> Result<ConsistencyReport> {
    // Directory first: a body file is only written after its record has
    // committed, so every file seen here already has its record in the
    // snapshot taken below, unless it was expunged.
    let files: BTreeSet<u32> = bodies.uids()?.into_iter().collect();

    let records = index.view(|txn| {
        let mut uids = BTreeSet::new();
        txn.scan_records(|_, record| {
            uids.insert(record.uid);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(uids)
    })?;

    let mut report = ConsistencyReport {
        orphan_records: records.difference(&files).copied().collect(),
        dangling_bodies: files.difference(&records).copied().collect(),
        removed_bodies: Vec::new(),
    };

    for &uid in &report.orphan_records {
        warn!(uid, "Record has no body file");
    }

    if policy == ReconcilePolicy::RemoveDanglingBodies {
        for &uid in &report.dangling_bodies {
            match bodies.remove(uid) {
                Ok(_) => report.removed_bodies.push(uid),
                Err(e) => warn!(uid, error = %e, "Failed to remove dangling body"),
            }
        }
    }

    info!(
        orphans = report.orphan_records.len(),
        dangling = report.dangling_bodies.len(),
        removed = report.removed_bodies.len(),
        "Reconciled mailbox"
    );
    Ok(report)
}
