use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use crate::db::{RetryPolicy, StoreOptions, DEFAULT_BUSY_TIMEOUT};
use crate::timer::{TimerEngine, MAX_SESSION_SECONDS};

/// Resolved runtime settings. Built once per invocation by the front end
/// from flags and environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub store: StoreOptions,
    pub max_session_seconds: i64,
    /// The acting user, if one was configured.
    pub user: Option<String>,
}

impl Settings {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            store: StoreOptions::default(),
            max_session_seconds: MAX_SESSION_SECONDS,
            user: None,
        }
    }

    pub fn with_max_session_hours(mut self, hours: u32) -> Self {
        self.max_session_seconds = i64::from(hours) * 3600;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.store.retry = RetryPolicy {
            max_attempts,
            backoff,
        };
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.store.busy_timeout = busy_timeout;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        self
    }

    pub fn timer_engine(&self) -> TimerEngine {
        TimerEngine::new(self.max_session_seconds)
    }
}

/// `<data dir>/booktime.sqlite` for the current platform, if a home
/// directory can be found.
pub fn default_db_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "gozque", "booktime").map(|dirs| dirs.data_dir().join("booktime.sqlite"))
}

pub fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}
