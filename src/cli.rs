use crate::output::{self, LineFormat};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::Duration;
use sumo_search::{
    ClientConfig, Credentials, ResultKind, ResultSequence, SearchSpec, SumoSearch,
};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            let res = match line {
                OutputLine::Stdout(msg) => writeln!(out, "{}", msg),
                OutputLine::Stderr(msg) => writeln!(err, "{}", msg),
            };
            // Reader went away (e.g. piped into `head`); stop writing.
            if res.is_err() {
                break;
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "sumo",
    version,
    about = "Search Sumo Logic",
    after_help = "Configuration:\n  SUMO_LOGIC_ACCESS_ID and SUMO_LOGIC_ACCESS_KEY must be set as environment variables.\n\nSpecifying times:\n  --from 1s = one second ago\n  --from 5m = five minutes ago\n  --from 2h = two hours ago\n  --from 1d = one day ago"
)]
pub struct Cli {
    /// The query string
    #[arg(short, long)]
    pub query: String,

    /// The starting time, as a duration before now
    #[arg(short, long, default_value = "15m")]
    pub from: humantime::Duration,

    /// The ending time, as a duration before now; defaults to now
    #[arg(short, long, conflicts_with = "duration")]
    pub to: Option<humantime::Duration>,

    /// The amount of time to search, starting at --from
    #[arg(short, long)]
    pub duration: Option<humantime::Duration>,

    /// Print aggregate search results, not raw log messages
    #[arg(short, long)]
    pub grouped: bool,

    /// Print raw log messages as JSON with every Sumo Logic field
    #[arg(short, long)]
    pub json: bool,

    /// Collect at most this many messages and records and print them as one JSON document
    #[arg(short, long)]
    pub limit: Option<u64>,

    /// Time zone the search window is interpreted in, e.g. UTC
    #[arg(long)]
    pub time_zone: Option<String>,

    /// Base URL of the Sumo Logic API
    #[arg(long, default_value = sumo_search::engine::DEFAULT_BASE_URL)]
    pub base_url: String,
}

/// Absolute search window derived from the relative CLI times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeWindow {
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
}

impl TimeWindow {
    pub(crate) fn resolve(
        now: OffsetDateTime,
        from: Duration,
        to: Option<Duration>,
        duration: Option<Duration>,
    ) -> Result<Self> {
        let from = now - from;
        let to = match (duration, to) {
            (Some(d), _) => from + d,
            (None, Some(t)) => now - t,
            (None, None) => now,
        };
        if to < from {
            bail!("the search window ends before it starts");
        }
        Ok(Self { from, to })
    }
}

/// Build the search from CLI arguments and environment credentials.
pub(crate) fn build_spec(args: &Cli, now: OffsetDateTime) -> Result<SearchSpec> {
    let Some(credentials) = Credentials::from_env() else {
        bail!("requires environment variables $SUMO_LOGIC_ACCESS_ID and $SUMO_LOGIC_ACCESS_KEY");
    };
    let window = TimeWindow::resolve(
        now,
        args.from.into(),
        args.to.map(Duration::from),
        args.duration.map(Duration::from),
    )?;

    let mut spec = SearchSpec::new(args.query.clone(), window.from, window.to)
        .with_credentials(credentials);
    if let Some(tz) = args.time_zone.as_deref() {
        spec = spec.with_time_zone(tz);
    }
    Ok(spec)
}

pub async fn run(args: Cli) -> Result<()> {
    if args.query.trim().is_empty() {
        bail!("--query must not be empty");
    }
    let spec = build_spec(&args, OffsetDateTime::now_utc())?;
    let search = SumoSearch::new(&ClientConfig::default().with_base_url(args.base_url.clone()))
        .context("failed to build HTTP client")?;
    debug!(from = %spec.from, to = %spec.to, query = %spec.query, "search window");

    if args.limit.is_some() {
        return run_limited(&search, &spec, args.limit).await;
    }

    let kind = if args.grouped {
        ResultKind::Record
    } else {
        ResultKind::Message
    };
    run_stream(search.stream(kind, spec), LineFormat::for_kind(kind, args.json)).await
}

/// Print every item of one kind as it arrives.
async fn run_stream(mut seq: ResultSequence, format: LineFormat) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let mut printed = 0u64;

    let res: Result<()> = loop {
        let next = tokio::select! {
            next = seq.next() => next,
            _ = tokio::signal::ctrl_c() => {
                if let Some(job) = seq.job() {
                    job.cancel();
                }
                let _ = out_tx.send(OutputLine::Stderr("Interrupted".into()));
                break Ok(());
            }
        };
        match next {
            Some(Ok(item)) => {
                let line = output::format_line(&item, format)?;
                if out_tx.send(OutputLine::Stdout(line)).is_err() {
                    break Ok(());
                }
                printed += 1;
            }
            Some(Err(e)) => {
                // The job itself is still alive; stop polling it before exiting.
                if !e.is_fatal_to_job() {
                    if let Some(job) = seq.job() {
                        job.cancel();
                    }
                }
                break Err(e).context("search failed");
            }
            None => break Ok(()),
        }
    };
    info!(kind = %seq.kind(), printed, "stream finished");

    drop(out_tx);
    let _ = out_handle.await;
    res
}

/// Collect both kinds up to the limit and print them as one JSON document.
async fn run_limited(search: &SumoSearch, spec: &SearchSpec, limit: Option<u64>) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();

    let results = tokio::select! {
        res = search.search(spec, limit) => res.context("search failed")?,
        _ = tokio::signal::ctrl_c() => {
            let _ = out_tx.send(OutputLine::Stderr("Interrupted".into()));
            drop(out_tx);
            let _ = out_handle.await;
            return Ok(());
        }
    };
    if results.limit_capped {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Limit capped at {}",
            results.limit
        )));
    }
    let _ = out_tx.send(OutputLine::Stdout(output::format_results(&results)?));

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
