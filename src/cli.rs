use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use chrono::NaiveDate;
use structopt::StructOpt;

use booktime::config::{default_busy_timeout_ms, default_db_path};
use booktime::Settings;

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Add a book, or change the board of an existing one.
    Add {
        /// The book title.
        #[structopt()]
        book: String,

        /// Board or category the book belongs to.
        #[structopt(short, long)]
        board: Option<String>,
    },
    /// Assign a production stage of a book to a user, with an estimate.
    Assign {
        #[structopt()]
        book: String,

        #[structopt()]
        stage: String,

        /// Who works on the stage. Leave out to keep the current assignee.
        #[structopt(short, long)]
        user: Option<String>,

        /// Estimated time, in hours (1.5) or as a duration (1h 30m).
        /// Leave out to keep the current estimate.
        #[structopt(short, long)]
        estimate: Option<String>,

        /// Remove the assignee.
        #[structopt(long, conflicts_with = "user")]
        unassign: bool,

        /// Remove the estimate.
        #[structopt(long, conflicts_with = "estimate")]
        clear_estimate: bool,
    },
    /// Show progress for every active book.
    Books {
        /// Include archived books.
        #[structopt(short, long)]
        all: bool,

        /// Only books whose title contains this text.
        #[structopt(short, long)]
        search: Option<String>,
    },
    /// Show the stage by stage breakdown of a book.
    Show {
        #[structopt()]
        book: String,
    },
    /// Start the timer of a stage.
    Start {
        #[structopt()]
        book: String,

        #[structopt()]
        stage: String,
    },
    /// Stop the timer of a stage and record the session.
    Stop {
        #[structopt()]
        book: String,

        #[structopt()]
        stage: String,
    },
    /// Throw away the running timer of a stage without recording it.
    Discard {
        #[structopt()]
        book: String,

        #[structopt()]
        stage: String,
    },
    /// List running timers.
    Timers,
    /// Record time worked on a stage without a timer.
    Log {
        #[structopt()]
        book: String,

        #[structopt()]
        stage: String,

        /// Time worked, as hh:mm:ss or a duration (45m).
        #[structopt()]
        time: String,

        /// Day the work was done (YYYY-MM-DD). Defaults to today.
        #[structopt(short, long, parse(try_from_str = parse_date))]
        date: Option<NaiveDate>,
    },
    /// Mark a stage as completed.
    Complete {
        #[structopt()]
        book: String,

        #[structopt()]
        stage: String,

        /// Mark the stage as not completed instead.
        #[structopt(long)]
        undo: bool,
    },
    /// Archive a book. Its history is kept.
    Archive {
        #[structopt()]
        book: String,
    },
    /// Delete a book with all its stages and logged time.
    Rm {
        #[structopt()]
        book: String,
    },
    /// Time per user, book and stage.
    Report {
        #[structopt(short, long)]
        user: Option<String>,

        /// Only books whose title contains this text.
        #[structopt(short, long)]
        book: Option<String>,

        #[structopt(long)]
        board: Option<String>,

        /// First day to include (YYYY-MM-DD).
        #[structopt(long, parse(try_from_str = parse_date))]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD).
        #[structopt(long, parse(try_from_str = parse_date))]
        to: Option<NaiveDate>,
    },
    /// List the known production stages.
    Stages,
    /// List everyone who has logged time or been assigned a stage.
    Users,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "booktime",
    about = "Time tracking for book production stages."
)]
pub struct CommandLineArgs {
    #[structopt(subcommand)]
    pub action: Command,

    /// Use a different database file.
    #[structopt(parse(from_os_str), short, long, env = "BOOKTIME_DB")]
    pub db_file: Option<PathBuf>,

    /// Who is doing the work.
    #[structopt(short = "U", long, env = "BOOKTIME_USER")]
    pub user: Option<String>,

    /// Longest session a timer or manual entry may record.
    #[structopt(long, env = "BOOKTIME_MAX_SESSION_HOURS", default_value = "100")]
    pub max_session_hours: u32,

    /// Attempts for a database operation before giving up.
    #[structopt(long, env = "BOOKTIME_RETRIES", default_value = "3")]
    pub retries: u32,

    /// Pause between attempts, in milliseconds.
    #[structopt(long, env = "BOOKTIME_RETRY_BACKOFF_MS", default_value = "200")]
    pub retry_backoff_ms: u64,

    /// How long to wait on a locked database, in milliseconds.
    #[structopt(long, env = "BOOKTIME_BUSY_TIMEOUT_MS")]
    pub busy_timeout_ms: Option<u64>,
}

impl CommandLineArgs {
    /// Resolve the flags into settings, falling back to the platform data
    /// directory for the database.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let db_path = self
            .db_file
            .clone()
            .or_else(default_db_path)
            .ok_or_else(|| anyhow!("Failed to find a location for the database file."))?;
        if self.max_session_hours == 0 {
            return Err(anyhow!("--max-session-hours must be at least 1."));
        }
        Ok(Settings::new(db_path)
            .with_max_session_hours(self.max_session_hours)
            .with_retry(self.retries, Duration::from_millis(self.retry_backoff_ms))
            .with_busy_timeout(Duration::from_millis(
                self.busy_timeout_ms.unwrap_or_else(default_busy_timeout_ms),
            ))
            .with_user(self.user.clone()))
    }
}

fn parse_date(text: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
}
