//! `timetable`: inspect teaching timetables from the command line.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use timetable_engine::timeparse::{self, ParsedInterval};
use timetable_engine::view::{display_date, display_range};
use timetable_engine::{
    first_conflict, Clock, DateRange, EngineConfig, FixedClock, Interval, MemoryNotificationQueue,
    MemorySessionStore, PractitionerId, RecordingDispatcher, SchedulingService, SessionId,
    SessionIndex, SystemClock,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status when `check` finds a conflict.
const EXIT_CONFLICT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "timetable")]
#[command(version, about = "Teaching timetable parser, free-block finder and conflict checker", long_about = None)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse free-text session time on a date
    Parse {
        /// Date text, e.g. "18 March 2025" or "2025-03-18"
        #[arg(long)]
        date: String,
        /// Time text, e.g. "9 to 11" or "3:00PM-4:00PM"
        #[arg(long)]
        time: String,
    },
    /// List sessions and free blocks for a practitioner
    FreeBlocks {
        /// JSON array of sessions
        #[arg(long)]
        sessions: PathBuf,
        /// JSON array of blocked dates, e.g. [{"date": "2025-03-18", "remark": "CBL Week"}]
        #[arg(long)]
        blocked: Option<PathBuf>,
        #[arg(long)]
        practitioner: String,
        /// First date, inclusive
        #[arg(long)]
        from: String,
        /// Last date, inclusive
        #[arg(long)]
        to: String,
        /// Evaluation instant as local time, e.g. 2025-03-18T09:00:00
        #[arg(long)]
        now: Option<NaiveDateTime>,
    },
    /// Check a proposed time against existing bookings (exit 2 on conflict)
    Check {
        /// JSON array of sessions
        #[arg(long)]
        sessions: PathBuf,
        #[arg(long)]
        practitioner: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        time: String,
        /// Session to ignore, typically the one being moved
        #[arg(long)]
        exclude: Option<String>,
        /// Evaluation instant as local time, e.g. 2025-03-18T09:00:00
        #[arg(long)]
        now: Option<NaiveDateTime>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    debug!(?config, "engine config");

    match cli.command {
        Command::Parse { date, time } => {
            let parsed = timeparse::parse_to_interval_with(&date, &time, config.fallback);
            print_json(&ParseOutput::from(parsed))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::FreeBlocks {
            sessions,
            blocked,
            practitioner,
            from,
            to,
            now,
        } => {
            let range = DateRange::new(date_arg("--from", &from)?, date_arg("--to", &to)?)?;
            let store = load_sessions(&sessions)?;
            if let Some(path) = &blocked {
                store
                    .load_blocked_json(path)
                    .with_context(|| format!("loading blocked dates from {}", path.display()))?;
            }
            let store = Arc::new(store);
            let clock = clock_for(now, &config)?;
            let service = SchedulingService::new(
                store,
                Arc::new(MemoryNotificationQueue::new()),
                Arc::new(RecordingDispatcher::new()),
                config,
            )?
            .with_clock(clock);
            let view = service
                .query(&PractitionerId(practitioner), range)
                .await
                .context("querying schedule")?;
            print_json(&view)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            sessions,
            practitioner,
            date,
            time,
            exclude,
            now,
        } => {
            let date = date_arg("--date", &date)?;
            let parsed = timeparse::interval_on_with(date, &time, config.fallback);
            let store = load_sessions(&sessions)?;
            let now = clock_for(now, &config)?.now_local(config.tz()?);
            let index = SessionIndex::from_records_as_of(store.snapshot(), now)
                .context("existing sessions already overlap")?;
            let exclude = exclude.map(SessionId);

            let conflict = first_conflict(
                &index,
                &PractitionerId(practitioner),
                &parsed.interval,
                exclude.as_ref(),
                now,
            );
            if let Some(blocking) = &conflict {
                info!(blocking = %blocking.session_id, "proposed time conflicts");
            }
            let code = if conflict.is_some() {
                ExitCode::from(EXIT_CONFLICT)
            } else {
                ExitCode::SUCCESS
            };
            print_json(&json!({
                "candidate": ParseOutput::from(parsed),
                "conflict": conflict,
            }))?;
            Ok(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[derive(Serialize)]
struct ParseOutput {
    interval: Interval,
    fallback: Option<timeparse::Fallback>,
    date_display: String,
    time_display: String,
}

impl From<ParsedInterval> for ParseOutput {
    fn from(parsed: ParsedInterval) -> Self {
        let interval = parsed.interval;
        ParseOutput {
            interval,
            fallback: parsed.fallback,
            date_display: display_date(interval.date()),
            time_display: display_range(interval.start(), interval.end()),
        }
    }
}

fn date_arg(flag: &str, text: &str) -> Result<NaiveDate> {
    timeparse::parse_date(text).ok_or_else(|| anyhow!("{flag}: unrecognised date '{text}'"))
}

fn load_sessions(path: &Path) -> Result<MemorySessionStore> {
    let store = MemorySessionStore::load_json(path)
        .with_context(|| format!("loading sessions from {}", path.display()))?;
    debug!(path = %path.display(), count = store.len(), "sessions loaded");
    Ok(store)
}

fn clock_for(now: Option<NaiveDateTime>, config: &EngineConfig) -> Result<Arc<dyn Clock>> {
    let clock: Arc<dyn Clock> = match now {
        Some(local) => Arc::new(FixedClock::at_local(local, config.tz()?)?),
        None => Arc::new(SystemClock),
    };
    Ok(clock)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialising output")?;
    println!("{text}");
    Ok(())
}
