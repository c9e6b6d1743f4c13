use std::fmt;

use crate::model::TaskId;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the tracking core. Every variant carries the
/// operation that failed so the front end can show a precise message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input rejected before anything was written.
    #[error("{op}: {message}{}", task_suffix(.task))]
    Validation {
        op: &'static str,
        task: Option<TaskId>,
        message: String,
    },

    /// The store already holds a conflicting row (running timer, duplicate key).
    #[error("{op}: {message}{}", task_suffix(.task))]
    Conflict {
        op: &'static str,
        task: Option<TaskId>,
        message: String,
    },

    /// Transient storage failures outlasted the retry budget.
    #[error("{op}: storage unavailable after {attempts} attempt(s): {source}")]
    Storage {
        op: &'static str,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

fn task_suffix(task: &Option<TaskId>) -> String {
    match task {
        Some(id) => format!(" (task {})", id),
        None => String::new(),
    }
}

impl Error {
    pub fn validation(op: &'static str, task: Option<TaskId>, message: impl Into<String>) -> Self {
        Self::Validation {
            op,
            task,
            message: message.into(),
        }
    }

    pub fn conflict(op: &'static str, task: Option<TaskId>, message: impl Into<String>) -> Self {
        Self::Conflict {
            op,
            task,
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            what,
            key: key.to_string(),
        }
    }

    /// Machine-readable code associated with this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::InvalidInput,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::Storage { .. } => ErrorCode::StorageUnavailable,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Database(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Whether the caller may simply show a notice and carry on.
    pub fn is_notice(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Conflict { .. } | Self::NotFound { .. }
        )
    }
}

/// Stable error codes, grouped by family: `E1xxx` input, `E2xxx` state,
/// `E5xxx` storage, `E9xxx` internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Conflict,
    StorageUnavailable,
    InternalUnexpected,
}

impl ErrorCode {
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "E1001",
            Self::NotFound => "E2001",
            Self::Conflict => "E2002",
            Self::StorageUnavailable => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidInput => "Invalid input",
            Self::NotFound => "Not found",
            Self::Conflict => "Conflicting state",
            Self::StorageUnavailable => "Storage unavailable",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidInput => None,
            Self::NotFound => Some("Check the book and stage names with `booktime books`."),
            Self::Conflict => Some("Refresh with `booktime timers` to see what is already running."),
            Self::StorageUnavailable => Some("Try again in a moment."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
