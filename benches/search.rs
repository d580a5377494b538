use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};

use diskmail::config::Config;
use diskmail::model::mailbox::MailboxInfo;
use diskmail::model::seqset::IdMode;
use diskmail::search::query::SearchKey;
use diskmail::store::{CancelToken, MailboxStore};

const MESSAGES: u32 = 500;

fn populated(dir: &std::path::Path) -> MailboxStore {
    let mut config = Config::default();
    config.storage.sync_bodies = false;
    let store = MailboxStore::with_config(dir, MailboxInfo::new("INBOX"), config);
    for i in 0..MESSAGES {
        let date = Utc.with_ymd_and_hms(2024, 1, 1 + i % 28, 8, 0, 0).unwrap();
        let flags: &[&str] = if i % 3 == 0 { &["\\Seen"] } else { &[] };
        let body = format!(
            "From: bench{i}@example.com\r\nSubject: message {i}\r\n\r\nbody of message {i}\r\n"
        );
        store.create_message(flags, date, body.as_bytes()).unwrap();
    }
    store
}

fn bench_metadata_search(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = populated(dir.path());
    let key = SearchKey::parse("SEEN SINCE 10-Jan-2024").unwrap();

    c.bench_function("search_metadata_500", |b| {
        b.iter(|| {
            store
                .search_messages(IdMode::Uid, &key, &CancelToken::new())
                .unwrap()
        })
    });
}

fn bench_content_search(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = populated(dir.path());
    let key = SearchKey::parse("SEEN BODY \"message 42\"").unwrap();

    c.bench_function("search_content_500", |b| {
        b.iter(|| {
            store
                .search_messages(IdMode::Uid, &key, &CancelToken::new())
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_metadata_search, bench_content_search);
criterion_main!(benches);
