//! Time tracking for book production.
//!
//! Books are split into production stages (tasks). People log time against
//! a task either by hand or with a start/stop timer that lives in the
//! database, so a running timer survives restarts and is shared by every
//! session. The aggregation functions turn the logged time into per-book
//! progress: time per stage and user, completion against the estimates and
//! the latest activity.
//!
//! ```no_run
//! use booktime::{aggregate, model, RequestContext, Store, TimerEngine};
//! use chrono::Utc;
//!
//! let mut store = Store::open_in_memory()?;
//! let book = model::upsert_book(store.connection(), "Sharks", None, Utc::now())?;
//! let task = model::upsert_task(
//!     store.connection(),
//!     &model::TaskAssignment { book_id: book.id, stage: "1st Proof", user: Some("Noah"), estimate_seconds: Some(3600) },
//! )?;
//!
//! let timers = TimerEngine::default();
//! timers.start(&mut store, &RequestContext::new("Noah", Utc::now()), task.id)?;
//! timers.stop(&mut store, task.id, Utc::now())?;
//!
//! let tasks = model::tasks_for_book(store.connection(), book.id)?;
//! let entries = model::entries_for_book(store.connection(), book.id)?;
//! println!("{}", aggregate::summarize(&book, &tasks, &entries).completion);
//! # Ok::<(), booktime::Error>(())
//! ```

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod timefmt;
pub mod timer;

pub use config::Settings;
pub use db::Store;
pub use error::{Error, ErrorCode, Result};
pub use model::RequestContext;
pub use timer::TimerEngine;
