//! The mailbox operation contract: one directory, one index, one body store.
//!
//! Append and expunge cross two failure domains. The index transaction
//! commits first and the body file step runs afterwards, outside any
//! transaction; a failure in the second step is reported, never rolled back.
//! See [`StoreError::OrphanRecord`] and [`StoreError::DanglingBodies`].

use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::index::{codec, MailboxIndex};
use crate::model::fetch::{FetchAttribute, FetchedMessage};
use crate::model::flags::{self, FlagOperation, RECENT};
use crate::model::mailbox::{MailboxInfo, MailboxStatus, StatusItem};
use crate::model::record::MessageRecord;
use crate::model::seqset::{IdMode, Selector};
use crate::parser::{MessageParser, MimeParser, ParsedMessage};
use crate::search::fulltext::{ContentMatcher, TextMatcher};
use crate::search::metadata::{eval_metadata, Candidate};
use crate::search::query::SearchKey;
use crate::search::evaluate;

use super::body::BodyStore;
use super::cancel::CancelToken;
use super::projector::Projector;
use super::reconcile::{self, ConsistencyReport, ReconcilePolicy};

/// Lifecycle of the index handle.
enum IndexState {
    Unopened,
    Open(Arc<MailboxIndex>),
    Closed,
}

/// New flags of one message touched by [`MailboxStore::update_flags`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FlagUpdate {
    pub seq: u32,
    pub uid: u32,
    pub flags: Vec<String>,
}

/// Persistent storage for one mailbox.
///
/// Safe to share between connections (`Arc<MailboxStore>`). The index is
/// opened on first use and stays open until [`close`](Self::close); a closed
/// store fails every later operation with [`StoreError::Closed`].
pub struct MailboxStore {
    dir: PathBuf,
    info: MailboxInfo,
    config: Config,
    bodies: BodyStore,
    parser: Arc<dyn MessageParser>,
    matcher: Arc<dyn ContentMatcher>,
    state: Mutex<IndexState>,
    subscribed: AtomicBool,
}

impl MailboxStore {
    /// A store for the mailbox directory `dir` with default settings.
    pub fn new(dir: impl Into<PathBuf>, info: MailboxInfo) -> Self {
        Self::with_config(dir, info, Config::default())
    }

    pub fn with_config(dir: impl Into<PathBuf>, info: MailboxInfo, config: Config) -> Self {
        let dir = dir.into();
        let bodies = BodyStore::new(
            &dir,
            config.storage.body_extension.clone(),
            config.storage.sync_bodies,
        );
        Self {
            dir,
            info,
            config,
            bodies,
            parser: Arc::new(MimeParser),
            matcher: Arc::new(TextMatcher),
            state: Mutex::new(IndexState::Unopened),
            subscribed: AtomicBool::new(true),
        }
    }

    /// Replace the message parser collaborator.
    pub fn with_parser(mut self, parser: Arc<dyn MessageParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Replace the content matcher collaborator.
    pub fn with_matcher(mut self, matcher: Arc<dyn ContentMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &MailboxInfo {
        &self.info
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the body file for `uid`.
    pub fn body_path(&self, uid: u32) -> PathBuf {
        self.bodies.path_for(uid)
    }

    /// The open index, opening it on first use.
    fn index(&self) -> Result<Arc<MailboxIndex>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            IndexState::Open(index) => return Ok(Arc::clone(index)),
            IndexState::Closed => return Err(StoreError::Closed),
            IndexState::Unopened => {}
        }

        let index = Arc::new(MailboxIndex::open(
            &self.dir,
            self.config.storage.index_options(),
        )?);
        *state = IndexState::Open(Arc::clone(&index));
        Ok(index)
    }

    /// Counters and markers for `STATUS` / `SELECT`.
    pub fn status(&self, items: &[StatusItem]) -> Result<MailboxStatus> {
        let index = self.index()?;
        let mut status = MailboxStatus::empty(self.name(), items);
        status.uid_validity = index.uid_validity();

        let mut keywords = std::collections::BTreeSet::new();
        let (max_uid, counter) = index.view(|txn| {
            let mut max_uid = 0u32;
            txn.scan_records(|_, record| {
                status.messages += 1;
                if record.is_recent() {
                    status.recent += 1;
                }
                if !record.is_seen() {
                    status.unseen += 1;
                }
                max_uid = max_uid.max(record.uid);
                keywords.extend(record.flags.into_iter().filter(|f| !f.starts_with('\\')));
                Ok(ControlFlow::Continue(()))
            })?;
            Ok((max_uid, txn.sequence(codec::MESSAGES_BUCKET)?))
        })?;

        // The counter covers UIDs whose records were expunged since.
        let last = i64::from(max_uid).max(counter);
        status.uid_next = u32::try_from(last + 1).unwrap_or(u32::MAX);
        status.flags.extend(keywords);
        Ok(status)
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Relaxed);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    /// Checkpoint request. Every write is already durable at commit, so this
    /// only makes sure the index can be opened.
    pub fn check(&self) -> Result<()> {
        self.index()?;
        debug!(mailbox = self.name(), "Check");
        Ok(())
    }

    /// Stream the messages matching `selector` to `sink`, in ascending UID
    /// order, each projected to `attrs`.
    ///
    /// The read transaction stays open while `sink` runs. The listing ends
    /// early, successfully, when `sink` returns `Break`, and with
    /// [`StoreError::Cancelled`] once `cancel` fires or the configured
    /// listing deadline passes. A message whose projection fails is skipped.
    pub fn list_messages(
        &self,
        selector: &Selector,
        attrs: &[FetchAttribute],
        cancel: &CancelToken,
        mut sink: impl FnMut(FetchedMessage) -> ControlFlow<()>,
    ) -> Result<()> {
        let index = self.index()?;
        let cancel = cancel.bounded(self.config.listing.max_duration());
        let projector = Projector::new(&self.bodies, self.parser.as_ref());

        index.view(|txn| {
            let bounds = txn.bounds()?;
            txn.scan_records(|seq, record| {
                cancel.check()?;
                if !selector.matches(seq, record.uid, &bounds) {
                    return Ok(ControlFlow::Continue(()));
                }
                match projector.project(seq, &record, attrs) {
                    Ok(message) => Ok(sink(message)),
                    Err(e) => {
                        warn!(uid = record.uid, error = %e, "Skipping message in listing");
                        Ok(ControlFlow::Continue(()))
                    }
                }
            })
        })
    }

    /// [`list_messages`](Self::list_messages) collected into a `Vec`.
    pub fn fetch_messages(
        &self,
        selector: &Selector,
        attrs: &[FetchAttribute],
        cancel: &CancelToken,
    ) -> Result<Vec<FetchedMessage>> {
        let mut messages = Vec::new();
        self.list_messages(selector, attrs, cancel, |message| {
            messages.push(message);
            ControlFlow::Continue(())
        })?;
        Ok(messages)
    }

    /// Identifiers (per `mode`) of the messages matching `key`, ascending.
    ///
    /// Each record is first tested on its metadata; the body is read and
    /// parsed only when the metadata leaves the result open. Any failure to
    /// read or parse a body aborts the search.
    pub fn search_messages(
        &self,
        mode: IdMode,
        key: &SearchKey,
        cancel: &CancelToken,
    ) -> Result<Vec<u32>> {
        let index = self.index()?;
        let cancel = cancel.bounded(self.config.listing.max_duration());

        let hits = index.view(|txn| {
            let bounds = txn.bounds()?;
            let mut hits = Vec::new();
            txn.scan_records(|seq, record| {
                cancel.check()?;
                let candidate = Candidate {
                    seq,
                    record: &record,
                    bounds: &bounds,
                };
                let matched = match eval_metadata(key, &candidate) {
                    Some(decided) => decided,
                    None => {
                        let message = self.load_message(record.uid)?;
                        evaluate(key, &candidate, &message, self.matcher.as_ref())
                    }
                };
                if matched {
                    hits.push(mode.pick(seq, record.uid));
                }
                Ok(ControlFlow::Continue(()))
            })?;
            Ok(hits)
        })?;

        debug!(mailbox = self.name(), hits = hits.len(), "Search finished");
        Ok(hits)
    }

    fn load_message(&self, uid: u32) -> Result<ParsedMessage> {
        let path = self.bodies.path_for(uid);
        let mut raw = Vec::new();
        File::open(&path)
            .and_then(|mut file| file.read_to_end(&mut raw))
            .map_err(|e| StoreError::io(&path, e))?;
        self.parser.parse(raw)
    }

    /// Append a message and return its UID.
    ///
    /// The record is committed first, which reserves the UID for good. If
    /// the body cannot be written afterwards the record stays behind without
    /// a body and [`StoreError::OrphanRecord`] names its UID.
    pub fn create_message<I, S>(
        &self,
        flag_names: I,
        internal_date: DateTime<Utc>,
        mut body: impl Read,
    ) -> Result<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = self.index()?;
        let uid = index.update(|txn| {
            let record = MessageRecord::new(txn.next_uid()?, flag_names, internal_date);
            txn.put_record(&record)?;
            Ok(record.uid)
        })?;
        debug!(mailbox = self.name(), uid, "Committed record");

        if let Err(e) = self.bodies.write(uid, &mut body) {
            warn!(mailbox = self.name(), uid, error = %e, "Body write failed; record has no body");
            return Err(StoreError::OrphanRecord {
                uid,
                source: Box::new(e),
            });
        }
        Ok(uid)
    }

    /// Apply `op` with `flag_names` to every message matching `selector`, in
    /// one write transaction. Returns the resulting flags of every matching
    /// message.
    pub fn update_flags<I, S>(
        &self,
        selector: &Selector,
        op: FlagOperation,
        flag_names: I,
    ) -> Result<Vec<FlagUpdate>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted = flags::flag_set(flag_names);
        let index = self.index()?;

        let updates = index.update(|txn| {
            let bounds = txn.bounds()?;
            let mut matched = Vec::new();
            txn.scan_records(|seq, record| {
                if selector.matches(seq, record.uid, &bounds) {
                    matched.push((seq, record));
                }
                Ok(ControlFlow::Continue(()))
            })?;

            let mut updates = Vec::with_capacity(matched.len());
            for (seq, mut record) in matched {
                if op.apply(&mut record.flags, &wanted) {
                    txn.put_record(&record)?;
                }
                updates.push(FlagUpdate {
                    seq,
                    uid: record.uid,
                    flags: record.flag_list(),
                });
            }
            Ok(updates)
        })?;

        debug!(mailbox = self.name(), ?op, count = updates.len(), "Updated flags");
        Ok(updates)
    }

    /// Cross-mailbox copy is not supported by this store.
    pub fn copy_messages(&self, _selector: &Selector, _destination: &str) -> Result<()> {
        Err(StoreError::Unsupported("COPY"))
    }

    /// Permanently remove every message flagged `\Deleted` and return their
    /// UIDs, ascending.
    ///
    /// Index entries are deleted in one transaction; body files are removed
    /// after it commits. A missing file counts as removed. Files that could
    /// not be removed are reported together as
    /// [`StoreError::DanglingBodies`]; their records stay deleted.
    pub fn expunge(&self) -> Result<Vec<u32>> {
        let index = self.index()?;
        let removed = index.update(|txn| {
            let mut doomed = Vec::new();
            txn.scan_records(|_, record| {
                if record.is_deleted() {
                    doomed.push(record.uid);
                }
                Ok(ControlFlow::Continue(()))
            })?;
            for &uid in &doomed {
                txn.delete(&codec::encode(uid))?;
            }
            Ok(doomed)
        })?;

        let mut dangling = Vec::new();
        for &uid in &removed {
            match self.bodies.remove(uid) {
                Ok(true) => {}
                Ok(false) => debug!(uid, "Body already gone"),
                Err(e) => {
                    warn!(mailbox = self.name(), uid, error = %e, "Failed to remove body file");
                    dangling.push(uid);
                }
            }
        }

        info!(mailbox = self.name(), count = removed.len(), "Expunged messages");
        if !dangling.is_empty() {
            return Err(StoreError::DanglingBodies { uids: dangling });
        }
        Ok(removed)
    }

    /// Report (and per `policy`, repair) drift between index and bodies.
    pub fn reconcile(&self, policy: ReconcilePolicy) -> Result<ConsistencyReport> {
        let index = self.index()?;
        reconcile::run(&index, &self.bodies, policy)
    }

    /// Release the index. Idempotent; the store cannot be reopened.
    ///
    /// If another thread is still inside an operation, its connections are
    /// released when that operation finishes.
    pub fn close(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, IndexState::Closed)
        };

        match previous {
            IndexState::Open(index) => match Arc::try_unwrap(index) {
                Ok(index) => index.close(),
                Err(_) => {
                    debug!(mailbox = self.name(), "Index still in use; released after last operation");
                    Ok(())
                }
            },
            IndexState::Unopened | IndexState::Closed => Ok(()),
        }
    }
}

impl std::fmt::Debug for MailboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxStore")
            .field("dir", &self.dir)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Flags a freshly delivered message gets when the caller has no opinion.
pub fn delivery_flags() -> Vec<String> {
    vec![RECENT.to_string()]
}
