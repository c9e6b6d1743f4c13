//! Derived, read-only views over books, tasks and time entries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::model::{Book, EntryRow, Task, TaskId, TimeEntry};

/// Recorded time relative to the estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// Percentage in `0.0..=100.0`.
    Percent(f64),
    NoEstimate,
}

impl Completion {
    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Percent(p) => Some(*p),
            Self::NoEstimate => None,
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{:.1}%", p),
            Self::NoEstimate => write!(f, "No estimate"),
        }
    }
}

/// `min(100, 100 * total / estimate)`, or `NoEstimate` when there is no
/// positive estimate to divide by.
pub fn completion(total_seconds: i64, estimate_seconds: i64) -> Completion {
    if estimate_seconds <= 0 {
        return Completion::NoEstimate;
    }
    let percent = 100.0 * total_seconds as f64 / estimate_seconds as f64;
    Completion::Percent(percent.clamp(0.0, 100.0))
}

/// Status label for a stage or book, as shown next to progress bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStatus {
    Within { percent: u32 },
    Over { percent: u32 },
    NoEstimate,
}

pub fn allocation_status(total_seconds: i64, estimate_seconds: i64) -> AllocationStatus {
    if estimate_seconds <= 0 {
        return AllocationStatus::NoEstimate;
    }
    let ratio = total_seconds.max(0) as f64 / estimate_seconds as f64;
    if ratio <= 1.0 {
        AllocationStatus::Within {
            percent: (ratio * 100.0) as u32,
        }
    } else {
        AllocationStatus::Over {
            percent: ((ratio - 1.0) * 100.0) as u32,
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Within { percent } => write!(f, "{}% complete", percent),
            Self::Over { percent } => write!(f, "{}% over allocation", percent),
            Self::NoEstimate => write!(f, "No estimate"),
        }
    }
}

/// The stage and user with the most recent time entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub stage: String,
    pub user: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub task_id: TaskId,
    pub stage: String,
    pub assigned: Option<String>,
    pub estimate_seconds: Option<i64>,
    pub completed: bool,
    pub seconds: i64,
    pub by_user: BTreeMap<String, i64>,
    pub completion: Completion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookSummary {
    pub book: Book,
    pub total_seconds: i64,
    pub total_estimate_seconds: i64,
    /// One per task, ordered by stage name.
    pub stages: Vec<StageSummary>,
    pub completion: Completion,
    pub complete: bool,
    pub most_recent: Option<Activity>,
    pub main_user: Option<String>,
}

impl BookSummary {
    pub fn status(&self) -> AllocationStatus {
        allocation_status(self.total_seconds, self.total_estimate_seconds)
    }
}

/// Group the entries of `book` by stage and user. Entries that do not
/// belong to one of `tasks` are ignored.
pub fn summarize(book: &Book, tasks: &[Task], entries: &[TimeEntry]) -> BookSummary {
    let mut by_task: HashMap<TaskId, BTreeMap<String, i64>> = HashMap::new();
    let owned = own_entries(tasks, entries);
    for (_, entry) in &owned {
        let seconds = by_task
            .entry(entry.task_id)
            .or_default()
            .entry(entry.user.clone())
            .or_insert(0);
        *seconds = seconds.saturating_add(entry.seconds);
    }

    let mut stages: Vec<StageSummary> = tasks
        .iter()
        .map(|task| {
            let by_user = by_task.remove(&task.id).unwrap_or_default();
            let seconds = by_user.values().fold(0i64, |acc, s| acc.saturating_add(*s));
            StageSummary {
                task_id: task.id,
                stage: task.stage.clone(),
                assigned: task.user.clone(),
                estimate_seconds: task.estimate_seconds,
                completed: task.completed,
                seconds,
                completion: completion(seconds, task.estimate_seconds.unwrap_or(0)),
                by_user,
            }
        })
        .collect();
    stages.sort_by(|a, b| a.stage.cmp(&b.stage));

    let total_seconds = stages
        .iter()
        .fold(0i64, |acc, s| acc.saturating_add(s.seconds));
    let total_estimate_seconds = tasks
        .iter()
        .filter_map(|t| t.estimate_seconds)
        .fold(0i64, |acc, e| acc.saturating_add(e));

    BookSummary {
        book: book.clone(),
        total_seconds,
        total_estimate_seconds,
        completion: completion(total_seconds, total_estimate_seconds),
        complete: is_complete(tasks),
        most_recent: most_recent_activity(tasks, entries),
        main_user: main_user(owned.iter().map(|(_, e)| *e)),
        stages,
    }
}

fn own_entries<'a>(tasks: &'a [Task], entries: &'a [TimeEntry]) -> Vec<(&'a Task, &'a TimeEntry)> {
    let tasks: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
    entries
        .iter()
        .filter_map(|entry| match tasks.get(&entry.task_id) {
            Some(task) => Some((*task, entry)),
            None => {
                tracing::debug!(
                    entry = entry.id,
                    task = entry.task_id,
                    "ignoring entry for a task outside this book"
                );
                None
            }
        })
        .collect()
}

/// A book is complete only when it has tasks and every one of them has
/// been explicitly marked completed. Recorded time plays no part.
pub fn is_complete(tasks: &[Task]) -> bool {
    !tasks.is_empty() && tasks.iter().all(|t| t.completed)
}

/// The (stage, user) of the latest entry by creation time. Ties go to the
/// stage name that sorts first, then the user name.
pub fn most_recent_activity(tasks: &[Task], entries: &[TimeEntry]) -> Option<Activity> {
    own_entries(tasks, entries)
        .into_iter()
        .map(|(task, entry)| Activity {
            stage: task.stage.clone(),
            user: entry.user.clone(),
            at: entry.created_at,
        })
        .min_by(|a, b| {
            b.at.cmp(&a.at)
                .then_with(|| a.stage.cmp(&b.stage))
                .then_with(|| a.user.cmp(&b.user))
        })
}

/// The user with the most recorded seconds; ties go to the name that sorts
/// first.
pub fn main_user<'a>(entries: impl IntoIterator<Item = &'a TimeEntry>) -> Option<String> {
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
    for entry in entries {
        let total = totals.entry(entry.user.as_str()).or_insert(0);
        *total = total.saturating_add(entry.seconds);
    }
    totals
        .into_iter()
        .fold(None, |best: Option<(&str, i64)>, (user, seconds)| match best {
            Some((_, top)) if top >= seconds => best,
            _ => Some((user, seconds)),
        })
        .map(|(user, _)| user.to_string())
}

/// Books whose name contains `search`, ignoring case. The search text is
/// matched literally.
pub fn filter_books<'a>(summaries: &'a [BookSummary], search: Option<&str>) -> Vec<&'a BookSummary> {
    let needle = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    summaries
        .iter()
        .filter(|summary| match &needle {
            Some(needle) => summary.book.name.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .collect()
}

/// Filters for the per-user task report. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub user: Option<String>,
    /// Substring of the book name, case insensitive.
    pub book: Option<String>,
    pub board: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub user: String,
    pub book: String,
    pub stage: String,
    /// Earliest session date of the grouped entries.
    pub first_date: NaiveDate,
    pub seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub total_books: usize,
    pub total_seconds: i64,
}

/// Time per (user, book, stage) for the entries matching `filter`, sorted
/// by user, book and stage. Dates are inclusive and compared against the
/// session start date.
pub fn user_report(entries: &[EntryRow], filter: &ReportFilter) -> Result<Report> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(Error::validation(
                "build report",
                None,
                "start date must be before end date",
            ));
        }
    }
    let book_needle = filter
        .book
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut groups: BTreeMap<(String, String, String), (NaiveDate, i64)> = BTreeMap::new();
    for entry in entries {
        let date = entry.started_at.date_naive();
        if filter.user.as_deref().map_or(false, |u| u != entry.user)
            || filter
                .board
                .as_deref()
                .map_or(false, |b| entry.board.as_deref() != Some(b))
            || book_needle
                .as_deref()
                .map_or(false, |n| !entry.book.to_lowercase().contains(n))
            || filter.from.map_or(false, |from| date < from)
            || filter.to.map_or(false, |to| date > to)
        {
            continue;
        }

        let key = (entry.user.clone(), entry.book.clone(), entry.stage.clone());
        let group = groups.entry(key).or_insert((date, 0));
        group.0 = group.0.min(date);
        group.1 = group.1.saturating_add(entry.seconds);
    }

    let books: BTreeSet<&str> = groups.keys().map(|(_, book, _)| book.as_str()).collect();
    let total_books = books.len();
    let rows: Vec<ReportRow> = groups
        .into_iter()
        .map(|((user, book, stage), (first_date, seconds))| ReportRow {
            user,
            book,
            stage,
            first_date,
            seconds,
        })
        .collect();
    let total_seconds = rows.iter().fold(0i64, |acc, r| acc.saturating_add(r.seconds));

    Ok(Report {
        rows,
        total_books,
        total_seconds,
    })
}
