use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use prettytable::{format, Table};

use booktime::aggregate::{self, BookSummary, ReportFilter};
use booktime::model::{self, Book, Task, TaskAssignment, PRODUCTION_STAGES};
use booktime::timefmt::{format_hms, format_human, parse_estimate, parse_time_spent};
use booktime::{Error, RequestContext, Settings, Store};

const TITLE_WIDTH: usize = 32;

fn wrap(text: &str) -> String {
    textwrap::fill(text, TITLE_WIDTH)
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table
}

fn find_book(store: &Store, name: &str) -> booktime::Result<Book> {
    store
        .read("find book", |db| model::book_by_name(db, name))?
        .ok_or_else(|| Error::not_found("book", name))
}

fn find_task(store: &Store, book: &str, stage: &str) -> booktime::Result<(Book, Task)> {
    let book = find_book(store, book)?;
    let task = store
        .read("find stage", |db| model::task_by_stage(db, book.id, stage))?
        .ok_or_else(|| Error::not_found("stage", format!("{} / {}", book.name, stage)))?;
    Ok((book, task))
}

/// The acting user: the configured one, else whoever the stage is assigned to.
fn acting_user(settings: &Settings, task: &Task) -> Result<String> {
    settings
        .user
        .clone()
        .or_else(|| task.user.clone())
        .ok_or_else(|| anyhow!("Stage '{}' is unassigned; pass --user or set BOOKTIME_USER.", task.stage))
}

fn summary(store: &Store, book: Book) -> booktime::Result<BookSummary> {
    let snapshot = store.read("load book", |db| model::book_snapshot(db, book.clone()))?;
    Ok(aggregate::summarize(
        &snapshot.book,
        &snapshot.tasks,
        &snapshot.entries,
    ))
}

pub fn add_book(store: &mut Store, name: String, board: Option<String>) -> Result<()> {
    let now = Utc::now();
    let book = store.write("save book", |db| {
        model::upsert_book(db, &name, board.as_deref(), now)
    })?;
    println!(
        "{} ({})",
        book.name,
        book.board.as_deref().unwrap_or("no board")
    );
    Ok(())
}

pub fn assign(
    store: &mut Store,
    book: String,
    stage: String,
    user: Option<String>,
    estimate: Option<String>,
    unassign: bool,
    clear_estimate: bool,
) -> Result<()> {
    let estimate_seconds = estimate.as_deref().map(parse_estimate).transpose()?;
    let book = find_book(store, &book)?;
    let task = store.write("assign stage", |db| {
        let task = model::upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: &stage,
                user: user.as_deref(),
                estimate_seconds,
            },
        )?;
        if unassign {
            model::unassign_task(db, task.id)?;
        }
        if clear_estimate {
            model::clear_task_estimate(db, task.id)?;
        }
        if unassign || clear_estimate {
            return model::task(db, task.id)?.ok_or_else(|| Error::not_found("task", task.id));
        }
        Ok(task)
    })?;
    println!(
        "{} / {}: {} ({})",
        book.name,
        task.stage,
        task.user.as_deref().unwrap_or("unassigned"),
        task.estimate_seconds
            .map(format_human)
            .unwrap_or_else(|| "no estimate".to_string())
    );
    Ok(())
}

pub fn books(store: &Store, all: bool, search: Option<String>) -> Result<()> {
    let books = store.read("list books", |db| model::books(db, all))?;
    let mut summaries = Vec::with_capacity(books.len());
    for book in books {
        summaries.push(summary(store, book)?);
    }
    let shown = aggregate::filter_books(&summaries, search.as_deref());

    if shown.is_empty() {
        match search {
            Some(search) => println!("No books found matching '{}'.", search),
            None => println!("No books yet. Use 'booktime add' to add one."),
        }
        return Ok(());
    }

    let mut table = new_table();
    table.set_titles(row![
        "book",
        "board",
        "time spent",
        "estimate",
        "progress",
        "done",
        "current stage"
    ]);
    for summary in shown {
        let mut title = wrap(&summary.book.name);
        if summary.book.archived {
            title.push_str(" [archived]");
        }
        table.add_row(row![
            title,
            summary.book.board.as_deref().unwrap_or("-"),
            format_hms(summary.total_seconds),
            format_hms(summary.total_estimate_seconds),
            summary.status(),
            if summary.complete { "yes" } else { "no" },
            summary
                .most_recent
                .as_ref()
                .map(|a| format!("{} ({})", a.stage, a.user))
                .unwrap_or_else(|| "-".to_string())
        ]);
    }
    table.printstd();
    Ok(())
}

pub fn show(store: &Store, name: String) -> Result<()> {
    let book = find_book(store, &name)?;
    let summary = summary(store, book)?;
    let running = store.read("list timers", model::active_timers)?;
    let now = Utc::now();

    println!("{}", summary.book.name);
    println!(
        "Overall progress: {}/{} ({})",
        format_hms(summary.total_seconds),
        format_hms(summary.total_estimate_seconds),
        summary.completion
    );
    if let Some(user) = &summary.main_user {
        println!("Main contributor: {}", user);
    }

    let mut table = new_table();
    table.set_titles(row!["stage", "assigned", "user", "time", "estimate", "status", "timer"]);
    for stage in &summary.stages {
        let status = if stage.completed {
            "completed".to_string()
        } else {
            aggregate::allocation_status(stage.seconds, stage.estimate_seconds.unwrap_or(0))
                .to_string()
        };
        let timer = running
            .iter()
            .find(|t| t.task_id == stage.task_id)
            .map(|t| {
                format!(
                    "recording {} ({})",
                    format_hms(booktime::timer::session_seconds(t, now)),
                    t.started_by
                )
            })
            .unwrap_or_default();
        table.add_row(row![
            stage.stage,
            stage.assigned.as_deref().unwrap_or("unassigned"),
            "",
            format_hms(stage.seconds),
            stage
                .estimate_seconds
                .map(format_hms)
                .unwrap_or_else(|| "-".to_string()),
            status,
            timer
        ]);
        for (user, seconds) in &stage.by_user {
            table.add_row(row!["", "", user, format_hms(*seconds), "", "", ""]);
        }
    }
    table.printstd();

    if summary.complete {
        println!("All stages completed.");
    }
    Ok(())
}

pub fn start(store: &mut Store, settings: &Settings, book: String, stage: String) -> Result<()> {
    let (book, task) = find_task(store, &book, &stage)?;
    let ctx = RequestContext::new(acting_user(settings, &task)?, Utc::now());
    settings.timer_engine().start(store, &ctx, task.id)?;
    println!("Recording {} / {} for {}.", book.name, task.stage, ctx.user);
    Ok(())
}

pub fn stop(store: &mut Store, settings: &Settings, book: String, stage: String) -> Result<()> {
    let (book, task) = find_task(store, &book, &stage)?;
    let outcome = settings.timer_engine().stop(store, task.id, Utc::now())?;
    match outcome.entry {
        Some(entry) => println!(
            "Recorded {} on {} / {} for {}.",
            format_hms(entry.seconds),
            book.name,
            task.stage,
            entry.user
        ),
        None => println!("Not running."),
    }
    Ok(())
}

pub fn discard(store: &mut Store, settings: &Settings, book: String, stage: String) -> Result<()> {
    let (book, task) = find_task(store, &book, &stage)?;
    match settings.timer_engine().discard(store, task.id)? {
        Some(timer) => println!(
            "Discarded {} on {} / {} started by {}.",
            format_hms(booktime::timer::session_seconds(&timer, Utc::now())),
            book.name,
            task.stage,
            timer.started_by
        ),
        None => println!("Not running."),
    }
    Ok(())
}

pub fn timers(store: &Store, settings: &Settings) -> Result<()> {
    let running = settings.timer_engine().running(store, Utc::now())?;
    if running.is_empty() {
        println!("No timers running.");
        return Ok(());
    }

    let mut table = new_table();
    table.set_titles(row!["book", "stage", "user", "started", "elapsed"]);
    for item in &running {
        let (book, stage) = store.read("find stage", |db| {
            let task = model::task(db, item.timer.task_id)?
                .ok_or_else(|| Error::not_found("task", item.timer.task_id))?;
            let book = model::book(db, task.book_id)?
                .ok_or_else(|| Error::not_found("book", task.book_id))?;
            Ok((book.name, task.stage))
        })?;
        table.add_row(row![
            wrap(&book),
            stage,
            item.timer.started_by,
            item.timer.started_at.format("%F %T"),
            format_hms(item.elapsed_seconds)
        ]);
    }
    table.printstd();
    println!("{} timer(s) running", running.len());
    Ok(())
}

pub fn log_time(
    store: &mut Store,
    settings: &Settings,
    book: String,
    stage: String,
    time: String,
    date: Option<NaiveDate>,
) -> Result<()> {
    let seconds = parse_time_spent(&time)?;
    let (book, task) = find_task(store, &book, &stage)?;
    let ctx = RequestContext::new(acting_user(settings, &task)?, Utc::now());
    let started = match date {
        Some(date) => {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .context("Failed to build the session start time.")?;
            Utc.from_utc_datetime(&midnight)
        }
        None => ctx.now,
    };
    let entry = settings
        .timer_engine()
        .record_manual(store, &ctx, task.id, seconds, started)?;
    println!(
        "Logged {} on {} / {} for {}.",
        format_hms(entry.seconds),
        book.name,
        task.stage,
        entry.user
    );
    Ok(())
}

pub fn complete(store: &mut Store, book: String, stage: String, undo: bool) -> Result<()> {
    let (book, task) = find_task(store, &book, &stage)?;
    store.write("complete stage", |db| {
        model::set_task_completed(db, task.id, !undo)
    })?;
    let word = if undo { "reopened" } else { "completed" };
    println!("{} / {} {}.", book.name, task.stage, word);
    Ok(())
}

pub fn archive(store: &mut Store, name: String) -> Result<()> {
    let book = find_book(store, &name)?;
    store.write("archive book", |db| model::archive_book(db, book.id))?;
    println!("Archived {}.", book.name);
    Ok(())
}

pub fn remove_book(store: &mut Store, name: String) -> Result<()> {
    let book = find_book(store, &name)?;
    store.write("delete book", |db| model::delete_book(db, book.id))?;
    println!("Deleted {} and all its logged time.", book.name);
    Ok(())
}

pub fn report(store: &Store, filter: ReportFilter) -> Result<()> {
    let rows = store.read("build report", model::entry_rows)?;
    let report = aggregate::user_report(&rows, &filter)?;
    if report.rows.is_empty() {
        println!("No tasks found for the given filters.");
        return Ok(());
    }

    let mut table = new_table();
    table.set_titles(row!["user", "book", "stage", "date", "time spent"]);
    for row in &report.rows {
        table.add_row(row![
            row.user,
            wrap(&row.book),
            row.stage,
            row.first_date.format("%d/%m/%Y"),
            format_hms(row.seconds)
        ]);
    }
    table.printstd();
    println!(
        "Books: {}  Tasks: {}  Hours: {:.1}",
        report.total_books,
        report.rows.len(),
        report.total_seconds as f64 / 3600.0
    );
    Ok(())
}

pub fn stages() -> Result<()> {
    let mut table = new_table();
    table.set_titles(row!["stage", "department"]);
    for (stage, department) in PRODUCTION_STAGES {
        table.add_row(row![stage, department.as_str()]);
    }
    table.printstd();
    Ok(())
}

pub fn users(store: &Store) -> Result<()> {
    for user in store.read("list users", model::users)? {
        println!("{}", user);
    }
    Ok(())
}
