use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};

pub type BookId = i64;
pub type TaskId = i64;

/// A book going through production, saved as an entry in the books table.
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: BookId,
    pub name: String,
    pub board: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// One production stage of a book. There is at most one task per
/// (book, stage); `user` is `None` while the stage is unassigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub book_id: BookId,
    pub stage: String,
    pub user: Option<String>,
    pub estimate_seconds: Option<i64>,
    pub completed: bool,
}

/// A finished work session. Entries are never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry {
    pub id: i64,
    pub task_id: TaskId,
    pub user: String,
    pub seconds: i64,
    pub started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A session that has been started but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTimer {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub accumulated_seconds: i64,
    pub started_by: String,
}

#[derive(Debug, Clone)]
pub struct NewTimeEntry<'a> {
    pub task_id: TaskId,
    pub user: &'a str,
    pub seconds: i64,
    pub started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Form input for assigning a stage of a book.
#[derive(Debug, Clone)]
pub struct TaskAssignment<'a> {
    pub book_id: BookId,
    pub stage: &'a str,
    pub user: Option<&'a str>,
    pub estimate_seconds: Option<i64>,
}

/// A time entry joined with the book and task it was logged against.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRow {
    pub book: String,
    pub board: Option<String>,
    pub stage: String,
    pub user: String,
    pub seconds: i64,
    pub started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Who is acting and when. The front end builds one per request; nothing
/// in the core keeps session state between calls.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: String,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(user: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Department {
    Editorial,
    Design,
}

impl Department {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Editorial => "editorial",
            Self::Design => "design",
        }
    }
}

/// The production stages offered by the data entry form, in workflow order.
pub const PRODUCTION_STAGES: &[(&str, Department)] = &[
    ("Editorial R&D", Department::Editorial),
    ("Editorial Writing", Department::Editorial),
    ("1st Proof", Department::Editorial),
    ("2nd Proof", Department::Editorial),
    ("3rd Proof", Department::Editorial),
    ("4th Proof", Department::Editorial),
    ("5th Proof", Department::Editorial),
    ("Editorial Sign Off", Department::Editorial),
    ("Cover Design", Department::Design),
    ("Design Time", Department::Design),
    ("Design Sign Off", Department::Design),
];

fn required<'a>(op: &'static str, field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(op, None, format!("{} is required", field)));
    }
    Ok(value)
}

fn optional(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Whether `err` is a UNIQUE/PRIMARY KEY/CHECK failure reported by SQLite.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

const BOOK_COLUMNS: &str = "id, name, board, archived, created_at";
const TASK_COLUMNS: &str = "id, book_id, stage, user_name, estimate_seconds, completed";
const ENTRY_COLUMNS: &str = "id, task_id, user_name, seconds, started_at, created_at";
const TIMER_COLUMNS: &str = "task_id, started_at, accumulated_seconds, started_by";

/// Create a book, or update the board of the active book with that name.
pub fn upsert_book(
    db: &Connection,
    name: &str,
    board: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Book> {
    let name = required("save book", "book name", name)?;
    let sql = format!(
        "INSERT INTO books (name, board, archived, created_at) VALUES (?1, ?2, 0, ?3)
         ON CONFLICT(name) WHERE archived = 0
         DO UPDATE SET board = COALESCE(excluded.board, books.board)
         RETURNING {}",
        BOOK_COLUMNS
    );
    let book = db.query_row(&sql, params![name, optional(board), now], book_from_row)?;
    Ok(book)
}

/// Returns the active (non archived) book with the given name, if any.
pub fn book_by_name(db: &Connection, name: &str) -> Result<Option<Book>> {
    let sql = format!(
        "SELECT {} FROM books WHERE name = ?1 AND archived = 0",
        BOOK_COLUMNS
    );
    let book = db
        .query_row(&sql, params![name.trim()], book_from_row)
        .optional()?;
    Ok(book)
}

pub fn book(db: &Connection, id: BookId) -> Result<Option<Book>> {
    let sql = format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS);
    let book = db.query_row(&sql, params![id], book_from_row).optional()?;
    Ok(book)
}

/// All books ordered by name. Archived books are only included on request.
pub fn books(db: &Connection, include_archived: bool) -> Result<Vec<Book>> {
    let sql = format!(
        "SELECT {} FROM books WHERE archived = 0 OR ?1 ORDER BY name, id",
        BOOK_COLUMNS
    );
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(params![include_archived], book_from_row)?;
    let mut books = Vec::new();
    for book in rows {
        books.push(book?);
    }
    Ok(books)
}

/// Soft delete. Returns false when the book was already archived or missing.
pub fn archive_book(db: &Connection, id: BookId) -> Result<bool> {
    let changed = db.execute(
        "UPDATE books SET archived = 1 WHERE id = ?1 AND archived = 0",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Hard delete, cascading to tasks, time entries and running timers.
pub fn delete_book(db: &Connection, id: BookId) -> Result<bool> {
    let changed = db.execute("DELETE FROM books WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Create the task for (book, stage), or update the one already there.
/// A missing user or estimate keeps the stored value; use [`unassign_task`]
/// or [`clear_task_estimate`] to remove one.
pub fn upsert_task(db: &Connection, assignment: &TaskAssignment<'_>) -> Result<Task> {
    let stage = required("assign stage", "stage name", assignment.stage)?;
    if let Some(estimate) = assignment.estimate_seconds {
        if estimate < 0 {
            return Err(Error::validation(
                "assign stage",
                None,
                "estimate must not be negative",
            ));
        }
    }
    let sql = format!(
        "INSERT INTO tasks (book_id, stage, user_name, estimate_seconds, completed)
         VALUES (?1, ?2, ?3, ?4, 0)
         ON CONFLICT(book_id, stage)
         DO UPDATE SET user_name = COALESCE(excluded.user_name, tasks.user_name),
                       estimate_seconds = COALESCE(excluded.estimate_seconds, tasks.estimate_seconds)
         RETURNING {}",
        TASK_COLUMNS
    );
    let task = db.query_row(
        &sql,
        params![
            assignment.book_id,
            stage,
            optional(assignment.user),
            assignment.estimate_seconds
        ],
        task_from_row,
    )?;
    Ok(task)
}

pub fn task(db: &Connection, id: TaskId) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    let task = db.query_row(&sql, params![id], task_from_row).optional()?;
    Ok(task)
}

pub fn task_by_stage(db: &Connection, book_id: BookId, stage: &str) -> Result<Option<Task>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE book_id = ?1 AND stage = ?2",
        TASK_COLUMNS
    );
    let task = db
        .query_row(&sql, params![book_id, stage.trim()], task_from_row)
        .optional()?;
    Ok(task)
}

pub fn tasks_for_book(db: &Connection, book_id: BookId) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE book_id = ?1 ORDER BY stage",
        TASK_COLUMNS
    );
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(params![book_id], task_from_row)?;
    let mut tasks = Vec::new();
    for task in rows {
        tasks.push(task?);
    }
    Ok(tasks)
}

/// Returns false if the task does not exist.
pub fn unassign_task(db: &Connection, id: TaskId) -> Result<bool> {
    let changed = db.execute(
        "UPDATE tasks SET user_name = NULL WHERE id = ?1",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Returns false if the task does not exist.
pub fn clear_task_estimate(db: &Connection, id: TaskId) -> Result<bool> {
    let changed = db.execute(
        "UPDATE tasks SET estimate_seconds = NULL WHERE id = ?1",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Set the explicit completed flag. Returns false if the task does not exist.
pub fn set_task_completed(db: &Connection, id: TaskId, completed: bool) -> Result<bool> {
    let changed = db.execute(
        "UPDATE tasks SET completed = ?2 WHERE id = ?1",
        params![id, completed],
    )?;
    Ok(changed > 0)
}

/// Append a time entry.
pub fn insert_time_entry(db: &Connection, entry: &NewTimeEntry<'_>) -> Result<TimeEntry> {
    let sql = format!(
        "INSERT INTO time_entries (task_id, user_name, seconds, started_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING {}",
        ENTRY_COLUMNS
    );
    let entry = db.query_row(
        &sql,
        params![
            entry.task_id,
            entry.user,
            entry.seconds,
            entry.started_at,
            entry.created_at
        ],
        entry_from_row,
    )?;
    Ok(entry)
}

pub fn entries_for_task(db: &Connection, task_id: TaskId) -> Result<Vec<TimeEntry>> {
    let sql = format!(
        "SELECT {} FROM time_entries WHERE task_id = ?1 ORDER BY id",
        ENTRY_COLUMNS
    );
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(params![task_id], entry_from_row)?;
    let mut entries = Vec::new();
    for entry in rows {
        entries.push(entry?);
    }
    Ok(entries)
}

pub fn entries_for_book(db: &Connection, book_id: BookId) -> Result<Vec<TimeEntry>> {
    let mut stmt = db.prepare(
        "SELECT e.id, e.task_id, e.user_name, e.seconds, e.started_at, e.created_at
         FROM time_entries e JOIN tasks t ON t.id = e.task_id
         WHERE t.book_id = ?1 ORDER BY e.id",
    )?;
    let rows = stmt.query_map(params![book_id], entry_from_row)?;
    let mut entries = Vec::new();
    for entry in rows {
        entries.push(entry?);
    }
    Ok(entries)
}

/// Every time entry joined with its book and stage, for reporting.
pub fn entry_rows(db: &Connection) -> Result<Vec<EntryRow>> {
    let mut stmt = db.prepare(
        "SELECT b.name, b.board, t.stage, e.user_name, e.seconds, e.started_at, e.created_at
         FROM time_entries e
         JOIN tasks t ON t.id = e.task_id
         JOIN books b ON b.id = t.book_id
         ORDER BY e.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(EntryRow {
            book: row.get(0)?,
            board: row.get(1)?,
            stage: row.get(2)?,
            user: row.get(3)?,
            seconds: row.get(4)?,
            started_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    let mut entries = Vec::new();
    for entry in rows {
        entries.push(entry?);
    }
    Ok(entries)
}

/// Names of everyone who logged time or has a stage assigned.
pub fn users(db: &Connection) -> Result<Vec<String>> {
    let mut stmt = db.prepare(
        "SELECT user_name FROM time_entries
         UNION
         SELECT user_name FROM tasks WHERE user_name IS NOT NULL
         ORDER BY 1",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut users = Vec::new();
    for user in rows {
        users.push(user?);
    }
    Ok(users)
}

/// Persist a running timer. The primary key on task_id makes a second
/// insert for the same task fail, which is reported as a conflict.
pub fn insert_active_timer(db: &Connection, timer: &ActiveTimer) -> Result<()> {
    db.execute(
        "INSERT INTO active_timers (task_id, started_at, accumulated_seconds, started_by)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            timer.task_id,
            timer.started_at,
            timer.accumulated_seconds,
            timer.started_by
        ],
    )
    .map_err(|err| {
        if is_constraint_violation(&err) {
            Error::conflict("start timer", Some(timer.task_id), "timer already running")
        } else {
            Error::from(err)
        }
    })?;
    Ok(())
}

pub fn active_timer(db: &Connection, task_id: TaskId) -> Result<Option<ActiveTimer>> {
    let sql = format!(
        "SELECT {} FROM active_timers WHERE task_id = ?1",
        TIMER_COLUMNS
    );
    let timer = db
        .query_row(&sql, params![task_id], timer_from_row)
        .optional()?;
    Ok(timer)
}

pub fn delete_active_timer(db: &Connection, task_id: TaskId) -> Result<bool> {
    let changed = db.execute(
        "DELETE FROM active_timers WHERE task_id = ?1",
        params![task_id],
    )?;
    Ok(changed > 0)
}

/// All running timers, oldest first.
pub fn active_timers(db: &Connection) -> Result<Vec<ActiveTimer>> {
    let sql = format!(
        "SELECT {} FROM active_timers ORDER BY started_at, task_id",
        TIMER_COLUMNS
    );
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map([], timer_from_row)?;
    let mut timers = Vec::new();
    for timer in rows {
        timers.push(timer?);
    }
    Ok(timers)
}

/// A book with everything logged against it, read in one go.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub book: Book,
    pub tasks: Vec<Task>,
    pub entries: Vec<TimeEntry>,
}

pub fn book_snapshot(db: &Connection, book: Book) -> Result<BookSnapshot> {
    let tasks = tasks_for_book(db, book.id)?;
    let entries = entries_for_book(db, book.id)?;
    Ok(BookSnapshot {
        book,
        tasks,
        entries,
    })
}

/// Return a book from a row in this order: [id, name, board, archived, created_at]
pub fn book_from_row(row: &Row) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        name: row.get(1)?,
        board: row.get(2)?,
        archived: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Return a task from a row in this order: [id, book_id, stage, user_name,
/// estimate_seconds, completed]
pub fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        book_id: row.get(1)?,
        stage: row.get(2)?,
        user: row.get(3)?,
        estimate_seconds: row.get(4)?,
        completed: row.get(5)?,
    })
}

pub fn entry_from_row(row: &Row) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user: row.get(2)?,
        seconds: row.get(3)?,
        started_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn timer_from_row(row: &Row) -> rusqlite::Result<ActiveTimer> {
    Ok(ActiveTimer {
        task_id: row.get(0)?,
        started_at: row.get(1)?,
        accumulated_seconds: row.get(2)?,
        started_by: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn upsert_book_reuses_active_row() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();

        let first = upsert_book(db, "The Moon", Some("Spring list"), at(9)).unwrap();
        let again = upsert_book(db, "  The Moon ", None, at(10)).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.board.as_deref(), Some("Spring list"));
        assert_eq!(again.created_at, at(9));
        assert_eq!(books(db, true).unwrap().len(), 1);
    }

    #[test]
    fn archived_name_can_be_reused() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();

        let old = upsert_book(db, "Rivers", None, at(9)).unwrap();
        assert!(archive_book(db, old.id).unwrap());
        assert!(!archive_book(db, old.id).unwrap());
        assert!(book_by_name(db, "Rivers").unwrap().is_none());

        let new = upsert_book(db, "Rivers", None, at(10)).unwrap();
        assert_ne!(old.id, new.id);
        assert_eq!(books(db, false).unwrap(), vec![new]);
        assert_eq!(books(db, true).unwrap().len(), 2);
    }

    #[test]
    fn blank_book_name_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = upsert_book(store.connection(), "   ", None, at(9)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn upsert_task_is_unique_per_stage() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();
        let book = upsert_book(db, "Volcanoes", None, at(9)).unwrap();

        let first = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "1st Proof",
                user: Some("Charis"),
                estimate_seconds: Some(7200),
            },
        )
        .unwrap();
        let second = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "1st Proof",
                user: None,
                estimate_seconds: None,
            },
        )
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.user.as_deref(), Some("Charis"));
        assert_eq!(second.estimate_seconds, Some(7200));
        assert_eq!(tasks_for_book(db, book.id).unwrap().len(), 1);

        let third = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "1st Proof",
                user: Some("Amy"),
                estimate_seconds: None,
            },
        )
        .unwrap();
        assert_eq!(third.user.as_deref(), Some("Amy"));
        assert_eq!(third.estimate_seconds, Some(7200));
    }

    #[test]
    fn estimate_and_assignee_are_cleared_explicitly() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();
        let book = upsert_book(db, "Volcanoes", None, at(9)).unwrap();
        let task = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "2nd Proof",
                user: Some("Charis"),
                estimate_seconds: Some(3600),
            },
        )
        .unwrap();

        assert!(clear_task_estimate(db, task.id).unwrap());
        assert!(unassign_task(db, task.id).unwrap());
        let task = task_by_stage(db, book.id, "2nd Proof").unwrap().unwrap();
        assert_eq!(task.user, None);
        assert_eq!(task.estimate_seconds, None);

        assert!(!clear_task_estimate(db, task.id + 100).unwrap());
        assert!(!unassign_task(db, task.id + 100).unwrap());
    }

    #[test]
    fn negative_estimate_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();
        let book = upsert_book(db, "Volcanoes", None, at(9)).unwrap();
        let err = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "Cover Design",
                user: None,
                estimate_seconds: Some(-1),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn second_timer_for_task_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();
        let book = upsert_book(db, "Bees", None, at(9)).unwrap();
        let task = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "Design Time",
                user: Some("Amy"),
                estimate_seconds: None,
            },
        )
        .unwrap();
        let timer = ActiveTimer {
            task_id: task.id,
            started_at: at(9),
            accumulated_seconds: 0,
            started_by: "Amy".to_string(),
        };

        insert_active_timer(db, &timer).unwrap();
        let err = insert_active_timer(db, &timer).unwrap_err();

        assert!(matches!(err, Error::Conflict { task: Some(id), .. } if id == task.id));
        assert_eq!(active_timers(db).unwrap(), vec![timer]);
    }

    #[test]
    fn delete_book_cascades() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();
        let book = upsert_book(db, "Bees", None, at(9)).unwrap();
        let task = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "Design Time",
                user: Some("Amy"),
                estimate_seconds: None,
            },
        )
        .unwrap();
        insert_time_entry(
            db,
            &NewTimeEntry {
                task_id: task.id,
                user: "Amy",
                seconds: 60,
                started_at: at(9),
                created_at: at(10),
            },
        )
        .unwrap();
        insert_active_timer(
            db,
            &ActiveTimer {
                task_id: task.id,
                started_at: at(11),
                accumulated_seconds: 0,
                started_by: "Amy".to_string(),
            },
        )
        .unwrap();

        assert!(delete_book(db, book.id).unwrap());

        assert!(task_by_stage(db, book.id, "Design Time").unwrap().is_none());
        assert!(entry_rows(db).unwrap().is_empty());
        assert!(active_timers(db).unwrap().is_empty());
    }

    #[test]
    fn users_merges_assignees_and_loggers() {
        let store = Store::open_in_memory().unwrap();
        let db = store.connection();
        let book = upsert_book(db, "Bees", None, at(9)).unwrap();
        let task = upsert_task(
            db,
            &TaskAssignment {
                book_id: book.id,
                stage: "Design Time",
                user: Some("Rob"),
                estimate_seconds: None,
            },
        )
        .unwrap();
        insert_time_entry(
            db,
            &NewTimeEntry {
                task_id: task.id,
                user: "Amelia",
                seconds: 60,
                started_at: at(9),
                created_at: at(10),
            },
        )
        .unwrap();

        assert_eq!(users(db).unwrap(), vec!["Amelia", "Rob"]);
    }
}
