#[macro_use]
extern crate prettytable;

use std::env;

use anyhow::Context;
use structopt::StructOpt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod interface;

use booktime::aggregate::ReportFilter;
use booktime::{Error, Settings, Store};
use cli::{Command::*, CommandLineArgs};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BOOKTIME_LOG")
        .unwrap_or_else(|_| EnvFilter::new("booktime=warn"));
    let format = env::var("BOOKTIME_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "full" => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

/// Open the tracking database, creating it and its directory if needed.
pub fn get_store(settings: &Settings) -> anyhow::Result<Store> {
    if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}.", parent.display()))?;
        }
    }
    let store = Store::open(&settings.db_path, settings.store)
        .with_context(|| format!("Failed to open database {}.", settings.db_path.display()))?;
    Ok(store)
}

fn run(args: CommandLineArgs) -> anyhow::Result<()> {
    let settings = args.settings()?;
    let mut store = get_store(&settings)?;
    tracing::debug!(db = %settings.db_path.display(), "using database");

    // Perform the action.
    match args.action {
        Add { book, board } => interface::add_book(&mut store, book, board),
        Assign {
            book,
            stage,
            user,
            estimate,
            unassign,
            clear_estimate,
        } => interface::assign(
            &mut store,
            book,
            stage,
            user,
            estimate,
            unassign,
            clear_estimate,
        ),
        Books { all, search } => interface::books(&store, all, search),
        Show { book } => interface::show(&store, book),
        Start { book, stage } => interface::start(&mut store, &settings, book, stage),
        Stop { book, stage } => interface::stop(&mut store, &settings, book, stage),
        Discard { book, stage } => interface::discard(&mut store, &settings, book, stage),
        Timers => interface::timers(&store, &settings),
        Log {
            book,
            stage,
            time,
            date,
        } => interface::log_time(&mut store, &settings, book, stage, time, date),
        Complete { book, stage, undo } => interface::complete(&mut store, book, stage, undo),
        Archive { book } => interface::archive(&mut store, book),
        Rm { book } => interface::remove_book(&mut store, book),
        Report {
            user,
            book,
            board,
            from,
            to,
        } => interface::report(
            &store,
            ReportFilter {
                user,
                book,
                board,
                from,
                to,
            },
        ),
        Stages => interface::stages(),
        Users => interface::users(&store),
    }
}

/// Print a failure the way the user should see it: notices as they are,
/// storage trouble as a request to try again, anything else logged in full.
fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_notice() => {
            eprintln!("{}", e);
            if let Some(hint) = e.code().hint() {
                eprintln!("hint: {}", hint);
            }
        }
        Some(e @ Error::Storage { .. }) => {
            tracing::warn!(error = %e, "storage unavailable");
            eprintln!("{}: {} Please try again.", e.code(), e.code().message());
        }
        _ => {
            tracing::error!(error = ?err, "unexpected failure");
            eprintln!("error: {:#}", err);
        }
    }
}

fn main() {
    init_tracing();

    // Get the command-line arguments.
    let args = CommandLineArgs::from_args();

    if let Err(err) = run(args) {
        report_failure(&err);
        std::process::exit(1);
    }
}
