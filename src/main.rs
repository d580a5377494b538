//! CLI entry point for `diskmail`: inspect and maintain one mailbox directory.

use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use diskmail::config::{self, Config};
use diskmail::model::fetch::{FetchAttribute, FetchItem, FetchedMessage};
use diskmail::model::flags::FlagOperation;
use diskmail::model::mailbox::{MailboxInfo, StatusItem};
use diskmail::model::seqset::{IdMode, SeqSet, Selector};
use diskmail::parser::header;
use diskmail::search::query::SearchKey;
use diskmail::store::mailbox::delivery_flags;
use diskmail::store::{CancelToken, MailboxStore, ReconcilePolicy};

#[derive(Parser)]
#[command(name = "diskmail", version, about = "Inspect and maintain a diskmail mailbox directory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Mailbox directory
    #[arg(short, long, global = true, value_name = "DIR", default_value = ".")]
    mailbox: PathBuf,

    /// Configuration file (overrides $DISKMAIL_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show message counts and UID markers
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List messages with their attributes
    List {
        /// Interpret SET as UIDs instead of sequence numbers
        #[arg(long)]
        uid: bool,
        /// Message set, e.g. `1:10,20:*`
        #[arg(default_value = "1:*")]
        set: String,
        /// Fetch attributes, e.g. `(FLAGS ENVELOPE BODY.PEEK[HEADER])`
        #[arg(default_value = "FAST")]
        attrs: String,
        #[arg(long)]
        json: bool,
    },
    /// Search messages (IMAP SEARCH syntax)
    Search {
        /// Print UIDs instead of sequence numbers
        #[arg(long)]
        uid: bool,
        /// Search keys, e.g. `SEEN SINCE 1-Jan-2024 BODY invoice`
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Append one message file
    Append {
        file: PathBuf,
        /// Initial flags, comma separated
        #[arg(long, value_delimiter = ',')]
        flags: Vec<String>,
        /// Internal date (defaults to now)
        #[arg(long)]
        date: Option<String>,
    },
    /// Append every .eml file of a directory, dated by file modification time
    Import {
        dir: PathBuf,
        /// Initial flags, comma separated (defaults to \Recent)
        #[arg(long, value_delimiter = ',')]
        flags: Vec<String>,
    },
    /// Change flags of a message set
    Flags {
        #[arg(long)]
        uid: bool,
        set: String,
        /// replace, add or remove
        op: FlagOperation,
        #[arg(required = true)]
        flags: Vec<String>,
    },
    /// Remove every message flagged \Deleted
    Expunge,
    /// Report records without bodies and bodies without records
    Check {
        /// Delete bodies that have no record
        #[arg(long)]
        fix: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    if let Commands::Config { save } = cli.command {
        return cmd_config(&config, save);
    }

    if matches!(cli.command, Commands::Append { .. } | Commands::Import { .. }) {
        std::fs::create_dir_all(&cli.mailbox)
            .with_context(|| format!("creating {}", cli.mailbox.display()))?;
    }

    let store = open_store(&cli.mailbox, config);
    let result = match cli.command {
        Commands::Status { json } => cmd_status(&store, json),
        Commands::List {
            uid,
            set,
            attrs,
            json,
        } => cmd_list(&store, uid, &set, &attrs, json),
        Commands::Search { uid, query, json } => cmd_search(&store, uid, &query.join(" "), json),
        Commands::Append { file, flags, date } => cmd_append(&store, &file, &flags, date.as_deref()),
        Commands::Import { dir, flags } => cmd_import(&store, &dir, &flags),
        Commands::Flags {
            uid,
            set,
            op,
            flags,
        } => cmd_flags(&store, uid, &set, op, &flags),
        Commands::Expunge => cmd_expunge(&store),
        Commands::Check { fix, json } => cmd_check(&store, fix, json),
        Commands::Config { .. } => Ok(()),
    };

    store.close()?;
    result
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_file = config::log_file_path(config);
    let log_target = log_file.as_ref().and_then(|path| {
        let dir = path.parent()?;
        let name = path.file_name()?;
        std::fs::create_dir_all(dir).ok()?;
        Some((dir.to_path_buf(), name.to_os_string()))
    });

    match log_target {
        Some((dir, name)) => {
            let file_appender = tracing_appender::rolling::never(dir, name);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            // Fall back to stderr only
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn open_store(dir: &Path, config: Config) -> MailboxStore {
    let name = dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "INBOX".to_string());
    MailboxStore::with_config(dir, MailboxInfo::new(name), config)
}

fn selector(uid: bool, set: &str) -> anyhow::Result<Selector> {
    let set = SeqSet::parse(set)?;
    Ok(if uid {
        Selector::uid(set)
    } else {
        Selector::sequence(set)
    })
}

/// Show mailbox counters.
fn cmd_status(store: &MailboxStore, json: bool) -> anyhow::Result<()> {
    let status = store.status(&StatusItem::ALL)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {:<14} {}", "Mailbox", status.name);
    println!("  {:<14} {}", "Messages", status.messages);
    println!("  {:<14} {}", "Recent", status.recent);
    println!("  {:<14} {}", "Unseen", status.unseen);
    println!("  {:<14} {}", "UID next", status.uid_next);
    println!("  {:<14} {}", "UID validity", status.uid_validity);
    println!("  {:<14} {}", "Flags", status.flags.join(" "));
    println!();
    Ok(())
}

/// Stream a listing to stdout.
fn cmd_list(
    store: &MailboxStore,
    uid: bool,
    set: &str,
    attr_list: &str,
    json: bool,
) -> anyhow::Result<()> {
    let selector = selector(uid, set)?;
    let mut attrs = FetchAttribute::parse_list(attr_list);
    if attrs.is_empty() {
        anyhow::bail!("no known fetch attributes in '{attr_list}'");
    }
    if !attrs.contains(&FetchAttribute::Uid) {
        attrs.insert(0, FetchAttribute::Uid);
    }

    let mut rows = Vec::new();
    store.list_messages(&selector, &attrs, &CancelToken::new(), |message| {
        if json {
            rows.push(fetched_to_json(&message));
        } else {
            print_fetched(&message);
        }
        ControlFlow::Continue(())
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}

/// Run a search and print the matching identifiers.
fn cmd_search(store: &MailboxStore, uid: bool, query: &str, json: bool) -> anyhow::Result<()> {
    let key = SearchKey::parse(query)?;
    let mode = if uid { IdMode::Uid } else { IdMode::Sequence };

    let start = Instant::now();
    let hits = store.search_messages(mode, &key, &CancelToken::new())?;
    let elapsed = start.elapsed();

    if json {
        let output = serde_json::json!({
            "mode": if uid { "uid" } else { "sequence" },
            "result_count": hits.len(),
            "results": hits,
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let ids: Vec<String> = hits.iter().map(u32::to_string).collect();
        println!("* SEARCH {}", ids.join(" "));
        eprintln!("  {} result(s) in {:.2?}", hits.len(), elapsed);
    }
    Ok(())
}

/// Append a single message file.
fn cmd_append(
    store: &MailboxStore,
    file: &Path,
    flags: &[String],
    date: Option<&str>,
) -> anyhow::Result<()> {
    let internal_date = match date {
        Some(raw) => header::parse_date(raw).with_context(|| format!("bad date '{raw}'"))?,
        None => Utc::now(),
    };
    let body = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let uid = store.create_message(flags, internal_date, BufReader::new(body))?;
    println!("Appended {} as UID {uid}", file.display());
    Ok(())
}

/// Append every `.eml` file of `dir`, in name order, with a progress bar.
fn cmd_import(store: &MailboxStore, dir: &Path, flags: &[String]) -> anyhow::Result<()> {
    let flags = if flags.is_empty() {
        delivery_flags()
    } else {
        flags.to_vec()
    };

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
        })
        .collect();
    files.sort();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Importing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut imported = 0usize;
    let mut failed = 0usize;

    for path in &files {
        let internal_date = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let outcome = File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|body| {
                Ok(store.create_message(&flags, internal_date, BufReader::new(body))?)
            });
        match outcome {
            Ok(_) => imported += 1,
            Err(e) => {
                failed += 1;
                pb.println(format!("  skipped {}: {e}", path.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Imported {imported} message(s) in {:.2?}{}",
        start.elapsed(),
        if failed > 0 {
            format!(", {failed} failed")
        } else {
            String::new()
        }
    );
    Ok(())
}

/// Update flags and print the resulting flag sets.
fn cmd_flags(
    store: &MailboxStore,
    uid: bool,
    set: &str,
    op: FlagOperation,
    flags: &[String],
) -> anyhow::Result<()> {
    let selector = selector(uid, set)?;
    let updates = store.update_flags(&selector, op, flags)?;
    for update in &updates {
        println!(
            "* {} FETCH (UID {} FLAGS ({}))",
            update.seq,
            update.uid,
            update.flags.join(" ")
        );
    }
    eprintln!("  {} message(s) updated", updates.len());
    Ok(())
}

fn cmd_expunge(store: &MailboxStore) -> anyhow::Result<()> {
    let removed = store.expunge()?;
    let ids: Vec<String> = removed.iter().map(u32::to_string).collect();
    println!("Expunged {} message(s): {}", removed.len(), ids.join(" "));
    Ok(())
}

/// Report consistency between index and body files.
fn cmd_check(store: &MailboxStore, fix: bool, json: bool) -> anyhow::Result<()> {
    let policy = if fix {
        ReconcilePolicy::RemoveDanglingBodies
    } else {
        ReconcilePolicy::ReportOnly
    };
    let report = store.reconcile(policy)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let join = |uids: &[u32]| uids.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
    println!();
    println!("  {:<18} {}", "Orphan records", join(&report.orphan_records));
    println!("  {:<18} {}", "Dangling bodies", join(&report.dangling_bodies));
    if fix {
        println!("  {:<18} {}", "Removed bodies", join(&report.removed_bodies));
    }
    println!(
        "  {:<18} {}",
        "Status",
        if report.is_consistent() { "consistent" } else { "inconsistent" }
    );
    println!();
    Ok(())
}

/// Show the effective configuration, optionally persisting it.
fn cmd_config(config: &Config, save: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if save {
        config::save_config(config)?;
        if let Some(path) = config::config_file_path() {
            eprintln!("  saved to {}", path.display());
        }
    }
    Ok(())
}

/// Print one listed message as an untagged FETCH-like line.
fn print_fetched(message: &FetchedMessage) {
    let mut parts = Vec::new();
    for item in &message.items {
        let text = match item {
            FetchItem::Flags(flags) => format!("FLAGS ({})", flags.join(" ")),
            FetchItem::Uid(uid) => format!("UID {uid}"),
            FetchItem::InternalDate(date) => {
                format!("INTERNALDATE \"{}\"", date.format("%d-%b-%Y %H:%M:%S %z"))
            }
            FetchItem::Rfc822Size(size) => format!("RFC822.SIZE {size}"),
            FetchItem::Envelope(env) => format!(
                "ENVELOPE (subject {:?} from {:?})",
                env.subject.as_deref().map(header::decode_encoded_words).unwrap_or_default(),
                env.from.first().map(|a| a.addr_spec()).unwrap_or_default()
            ),
            FetchItem::BodyStructure(_) => "BODYSTRUCTURE (...)".to_string(),
            FetchItem::Body(_) => "BODY (...)".to_string(),
            FetchItem::Rfc822(data) => format!("RFC822 {{{}}}", data.len()),
            FetchItem::Rfc822Header(data) => format!("RFC822.HEADER {{{}}}", data.len()),
            FetchItem::Rfc822Text(data) => format!("RFC822.TEXT {{{}}}", data.len()),
            FetchItem::BodySection { section, data, .. } => match data {
                Some(data) => format!("BODY[{section}] {{{}}}", data.len()),
                None => format!("BODY[{section}] NIL"),
            },
        };
        parts.push(text);
    }
    println!("* {} FETCH ({})", message.seq, parts.join(" "));
}

/// Convert a listed message to JSON.
fn fetched_to_json(message: &FetchedMessage) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert("seq".into(), message.seq.into());
    object.insert("uid".into(), message.uid.into());

    for item in &message.items {
        let (key, value) = match item {
            FetchItem::Flags(flags) => ("flags".to_string(), serde_json::json!(flags)),
            FetchItem::Uid(_) => continue,
            FetchItem::InternalDate(date) => {
                ("internal_date".to_string(), date.to_rfc3339().into())
            }
            FetchItem::Rfc822Size(size) => ("size".to_string(), (*size).into()),
            FetchItem::Envelope(env) => ("envelope".to_string(), serde_json::json!(env)),
            FetchItem::BodyStructure(bs) => ("body_structure".to_string(), serde_json::json!(bs)),
            FetchItem::Body(bs) => ("body".to_string(), serde_json::json!(bs)),
            FetchItem::Rfc822(data) => ("rfc822".to_string(), lossy(data)),
            FetchItem::Rfc822Header(data) => ("rfc822_header".to_string(), lossy(data)),
            FetchItem::Rfc822Text(data) => ("rfc822_text".to_string(), lossy(data)),
            FetchItem::BodySection { section, data, .. } => (
                format!("body[{section}]"),
                data.as_deref().map(lossy).unwrap_or(serde_json::Value::Null),
            ),
        };
        object.insert(key, value);
    }
    serde_json::Value::Object(object)
}

fn lossy(data: &[u8]) -> serde_json::Value {
    String::from_utf8_lossy(data).into_owned().into()
}
