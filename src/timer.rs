//! Start/stop timers persisted in the store.
//!
//! A running timer is a row in `active_timers`, so it survives restarts and
//! is visible to every session. Stopping commits the session as a time entry
//! and removes the timer row in the same transaction.

use chrono::{DateTime, Utc};

use crate::db::Store;
use crate::error::{Error, Result};
use crate::model::{self, ActiveTimer, NewTimeEntry, RequestContext, TaskId, TimeEntry};
use crate::timefmt::format_hms;

/// Longest session a single entry may record (100 hours).
pub const MAX_SESSION_SECONDS: i64 = 100 * 3600;

/// Outcome of a stop request. `entry` is `None` when there was no running
/// timer, e.g. a repeated stop after a network retry or a double click.
#[derive(Debug, Clone, PartialEq)]
pub struct StopOutcome {
    pub elapsed_seconds: i64,
    pub entry: Option<TimeEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunningTimer {
    pub timer: ActiveTimer,
    pub elapsed_seconds: i64,
}

/// Seconds recorded by `timer` at `now`: the time accumulated before this
/// run plus the current run. Never negative, even if `now` is before the
/// start because of clock skew.
pub fn session_seconds(timer: &ActiveTimer, now: DateTime<Utc>) -> i64 {
    let run = now.signed_duration_since(timer.started_at).num_seconds();
    timer.accumulated_seconds.saturating_add(run).max(0)
}

/// A session limit as given on the command line: whole hours as `100h`,
/// anything else as `hh:mm:ss`.
fn describe_limit(seconds: i64) -> String {
    if seconds > 0 && seconds % 3600 == 0 {
        format!("{}h", seconds / 3600)
    } else {
        format_hms(seconds)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimerEngine {
    max_session_seconds: i64,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new(MAX_SESSION_SECONDS)
    }
}

impl TimerEngine {
    pub fn new(max_session_seconds: i64) -> Self {
        Self {
            max_session_seconds,
        }
    }

    pub fn max_session_seconds(&self) -> i64 {
        self.max_session_seconds
    }

    /// Start a timer on `task_id` for the requesting user. Fails with a
    /// conflict if the task already has a running timer; the existing timer
    /// is left as it was.
    pub fn start(
        &self,
        store: &mut Store,
        ctx: &RequestContext,
        task_id: TaskId,
    ) -> Result<ActiveTimer> {
        let user = ctx.user.trim();
        if user.is_empty() {
            return Err(Error::validation(
                "start timer",
                Some(task_id),
                "a user is required to start a timer",
            ));
        }
        let timer = ActiveTimer {
            task_id,
            started_at: ctx.now,
            accumulated_seconds: 0,
            started_by: user.to_string(),
        };
        store.write("start timer", |db| {
            if model::task(db, task_id)?.is_none() {
                return Err(Error::not_found("task", task_id));
            }
            model::insert_active_timer(db, &timer)
        })?;
        tracing::info!(task_id, user, "timer started");
        Ok(timer)
    }

    /// Seconds on the running timer of `task_id` at `now`, or 0 if the task
    /// has no running timer. Writes nothing.
    pub fn elapsed(&self, store: &Store, task_id: TaskId, now: DateTime<Utc>) -> Result<i64> {
        let timer = store.read("read timer", |db| model::active_timer(db, task_id))?;
        Ok(timer.map_or(0, |timer| session_seconds(&timer, now)))
    }

    /// Stop the running timer of `task_id`, committing the session as a
    /// time entry attributed to whoever started it.
    ///
    /// Stopping a task with no running timer is a no-op returning zero.
    /// A session longer than the configured maximum is rejected and the
    /// timer keeps running; [`TimerEngine::discard`] clears it.
    pub fn stop(
        &self,
        store: &mut Store,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<StopOutcome> {
        let max_session_seconds = self.max_session_seconds;
        let outcome = store.write("stop timer", |db| {
            let timer = match model::active_timer(db, task_id)? {
                Some(timer) => timer,
                None => {
                    return Ok(StopOutcome {
                        elapsed_seconds: 0,
                        entry: None,
                    })
                }
            };

            let elapsed_seconds = session_seconds(&timer, now);
            if elapsed_seconds > max_session_seconds {
                return Err(Error::validation(
                    "stop timer",
                    Some(task_id),
                    format!(
                        "session of {} exceeds the {} limit",
                        format_hms(elapsed_seconds),
                        describe_limit(max_session_seconds)
                    ),
                ));
            }

            let entry = model::insert_time_entry(
                db,
                &NewTimeEntry {
                    task_id,
                    user: &timer.started_by,
                    seconds: elapsed_seconds,
                    started_at: timer.started_at,
                    created_at: now,
                },
            )?;
            model::delete_active_timer(db, task_id)?;
            Ok(StopOutcome {
                elapsed_seconds,
                entry: Some(entry),
            })
        })?;

        match &outcome.entry {
            Some(entry) => tracing::info!(
                task_id,
                seconds = entry.seconds,
                user = %entry.user,
                "timer stopped"
            ),
            None => tracing::debug!(task_id, "stop requested with no running timer"),
        }
        Ok(outcome)
    }

    /// Drop the running timer of `task_id` without recording anything.
    /// Returns the discarded timer, or `None` if none was running.
    pub fn discard(&self, store: &mut Store, task_id: TaskId) -> Result<Option<ActiveTimer>> {
        let timer = store.write("discard timer", |db| {
            let timer = model::active_timer(db, task_id)?;
            if timer.is_some() {
                model::delete_active_timer(db, task_id)?;
            }
            Ok(timer)
        })?;
        match &timer {
            Some(timer) => tracing::info!(
                task_id,
                started_by = %timer.started_by,
                "timer discarded"
            ),
            None => tracing::debug!(task_id, "discard requested with no running timer"),
        }
        Ok(timer)
    }

    /// Record time worked without a timer.
    pub fn record_manual(
        &self,
        store: &mut Store,
        ctx: &RequestContext,
        task_id: TaskId,
        seconds: i64,
        session_started: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        let user = ctx.user.trim();
        if user.is_empty() {
            return Err(Error::validation(
                "log time",
                Some(task_id),
                "a user is required to log time",
            ));
        }
        if seconds <= 0 {
            return Err(Error::validation(
                "log time",
                Some(task_id),
                "time must be greater than 00:00:00",
            ));
        }
        if seconds > self.max_session_seconds {
            return Err(Error::validation(
                "log time",
                Some(task_id),
                format!(
                    "{} exceeds the {} session limit",
                    format_hms(seconds),
                    describe_limit(self.max_session_seconds)
                ),
            ));
        }

        let entry = store.write("log time", |db| {
            if model::task(db, task_id)?.is_none() {
                return Err(Error::not_found("task", task_id));
            }
            model::insert_time_entry(
                db,
                &NewTimeEntry {
                    task_id,
                    user,
                    seconds,
                    started_at: session_started,
                    created_at: ctx.now,
                },
            )
        })?;
        tracing::info!(task_id, seconds, user, "time logged");
        Ok(entry)
    }

    /// Every running timer with its elapsed seconds at `now`.
    pub fn running(&self, store: &Store, now: DateTime<Utc>) -> Result<Vec<RunningTimer>> {
        let timers = store.read("list timers", model::active_timers)?;
        Ok(timers
            .into_iter()
            .map(|timer| RunningTimer {
                elapsed_seconds: session_seconds(&timer, now),
                timer,
            })
            .collect())
    }
}
