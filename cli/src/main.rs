use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use ledger_kernel::log::FileCommitStore;
use ledger_kernel::{Bucket, CommitFilter, Dispatcher, Event, Ledger, LedgerConfig, StreamId};

/// Ledger CLI
#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Event-sourcing commit ledger over a JSON data file", long_about = None)]
struct Cli {
    /// Path to the ledger data file
    #[arg(long, default_value = "ledger.json")]
    data: String,

    /// Path to ledger config JSON
    #[arg(long)]
    config: Option<String>,

    /// Bucket to operate on
    #[arg(long, default_value = "default")]
    bucket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append events to a stream; reads a JSON array of events from --events
    Write {
        #[arg(long)]
        stream: Option<StreamId>,

        /// Stream revision the write expects to follow
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        expected: i64,

        /// JSON array of events, or a single JSON event
        #[arg(long)]
        events: String,

        /// Skip the read-based revision check even if the config enables it
        #[arg(long)]
        no_pre_check: bool,
    },

    /// Current bucket revision, or stream revision with --stream
    Revision {
        #[arg(long)]
        stream: Option<StreamId>,
    },

    /// Streams with at least one commit
    Streams,

    /// Events of one stream in stream order
    Events {
        #[arg(long)]
        stream: StreamId,
    },

    /// Commits in bucket order
    Commits {
        #[arg(long)]
        from: Option<u64>,

        #[arg(long)]
        to: Option<u64>,

        #[arg(long)]
        stream: Option<StreamId>,

        #[arg(long)]
        undispatched: bool,
    },

    /// Whether the bucket has commits that were never dispatched
    Undispatched,

    /// Dispatch every undispatched commit again
    Redispatch,

    /// Delete commits above a bucket revision
    Rollback {
        #[arg(long)]
        to: u64,
    },

    /// Known buckets
    Buckets,

    /// Delete the bucket and its counter
    DeleteBucket,
}

/// Keeps every dispatched event so the command can report them in its output.
#[derive(Default)]
struct CollectingDispatcher {
    events: Mutex<Vec<Event>>,
}

impl CollectingDispatcher {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
impl Dispatcher for CollectingDispatcher {
    fn name(&self) -> &str {
        "cli"
    }

    async fn dispatch(&self, event: &Event) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ledger=info,ledger_kernel=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = if let Some(path) = &cli.config {
        let data = fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        LedgerConfig::from_json(&data)?
    } else {
        LedgerConfig::default_config()
    };

    // ----------------------------
    // Open store
    // ----------------------------
    let store = FileCommitStore::open(&cli.data)
        .await
        .with_context(|| format!("opening ledger data {}", cli.data))?;
    let ledger = Ledger::with_config(Arc::new(store), config);
    let collected = Arc::new(CollectingDispatcher::default());
    ledger.register_dispatcher(collected.clone());

    // ----------------------------
    // Run command
    // ----------------------------
    let output = run(&ledger, &cli.bucket, cli.command, &collected).await?;

    // ----------------------------
    // Output
    // ----------------------------
    println!("{}", serde_json::to_string_pretty(&output)?);

    if output.get("error").is_some() {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one command and build its output document.
///
/// Commands that dispatch report the delivered events under `dispatched`.
async fn run(
    ledger: &Ledger,
    bucket_name: &str,
    command: Command,
    collected: &CollectingDispatcher,
) -> Result<Value> {
    let bucket = ledger.bucket(bucket_name)?;

    let output = match command {
        Command::Write {
            stream,
            expected,
            events,
            no_pre_check,
        } => {
            let events = parse_events(&events)?;
            let mut output = write(bucket, stream.unwrap_or_default(), expected, events, no_pre_check).await?;
            output["dispatched"] = Value::Array(collected.take());
            output
        }

        Command::Revision { stream: Some(stream) } => json!({
            "stream_id": stream.to_string(),
            "stream_revision": bucket.stream_revision(&stream).await?,
        }),

        Command::Revision { stream: None } => json!({
            "bucket": bucket.name(),
            "bucket_revision": bucket.bucket_revision().await?,
        }),

        Command::Streams => {
            let ids: Vec<String> = bucket.stream_ids().await?.iter().map(ToString::to_string).collect();
            json!({ "streams": ids })
        }

        Command::Events { stream } => json!({
            "stream_id": stream.to_string(),
            "events": bucket.events(&stream).await?,
        }),

        Command::Commits {
            from,
            to,
            stream,
            undispatched,
        } => {
            let filter = CommitFilter {
                from_bucket_revision: from,
                to_bucket_revision: to,
                stream_id: stream,
                undispatched_only: undispatched,
            };
            serde_json::to_value(bucket.commits(&filter).await?)?
        }

        Command::Undispatched => json!({
            "bucket": bucket.name(),
            "has_undispatched_commits": bucket.has_undispatched_commits().await?,
        }),

        Command::Redispatch => match bucket.dispatch_undispatched().await {
            Ok(report) => json!({
                "attempted": report.attempted,
                "redispatched": report.dispatched,
                "failed": report.failed,
                "dispatched": collected.take(),
            }),
            Err(err) => {
                tracing::warn!(error = %err, "redispatch failed");
                json!({
                    "error": err.to_string(),
                    "dispatched": collected.take(),
                })
            }
        },

        Command::Rollback { to } => {
            let report = bucket.rollback(to).await?;
            json!({
                "removed": report.removed,
                "bucket_revision": report.bucket_revision,
            })
        }

        Command::Buckets => json!({ "buckets": ledger.bucket_names().await? }),

        Command::DeleteBucket => {
            ledger.delete_bucket(bucket_name).await?;
            json!({ "deleted": bucket_name })
        }
    };

    Ok(output)
}

/// Write and wait for dispatch so the process does not exit mid-delivery.
async fn write(
    mut bucket: Bucket,
    stream: StreamId,
    expected: i64,
    events: Vec<Event>,
    no_pre_check: bool,
) -> Result<Value> {
    if no_pre_check {
        bucket.set_check_stream_revision_before_writing(false);
    }

    let result = bucket.write(stream, expected, events).await?;
    let dispatch = match result.dispatch.wait().await {
        Ok(()) => json!({ "ok": true }),
        Err(err) => {
            tracing::warn!(error = %err, "dispatch failed");
            json!({ "ok": false, "error": err.to_string() })
        }
    };

    Ok(json!({
        "commit": result.commit,
        "dispatch": dispatch,
    }))
}

fn parse_events(raw: &str) -> Result<Vec<Event>> {
    let value: Value = serde_json::from_str(raw).context("events must be JSON")?;
    Ok(match value {
        Value::Array(events) => events,
        event => vec![event],
    })
}
