use std::path::PathBuf;

use thiserror::Error;

use crate::calendar::Category;

/// Why a crontab field or line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty {category} field")]
    EmptyToken { category: Category },

    #[error("bad number '{token}' in {category} field")]
    BadNumber { category: Category, token: String },

    /// A token that is neither numeric nor a known alias of its category.
    #[error("unknown {category} value '{token}'")]
    UnknownAlias { category: Category, token: String },

    #[error("{category} value {value} outside {min}..={max}")]
    OutOfRange {
        category: Category,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("step of zero in '{token}'")]
    ZeroStep { token: String },

    /// `Uncategorized` fields need an explicit range; named categories
    /// must not be given one.
    #[error("invalid range for {category} field")]
    InvalidRange { category: Category },

    #[error("malformed crontab line '{line}'")]
    MalformedLine { line: String },

    #[error("missing job id after '#' in '{line}'")]
    MissingJobId { line: String },

    /// A callback, argument or job id that would read back differently
    /// from a crontab line.
    #[error("{part} '{value}' cannot be written to a crontab line")]
    Unstorable { part: &'static str, value: String },
}

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A crontab line or one of its fields is malformed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// No callback is registered under the given name.
    #[error("Callback not found: {name}")]
    CallbackNotFound { name: String },

    /// No job with the given ID exists in the registry.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Reading or writing the crontab file failed.
    #[error("Persistence error ({}): {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Parse(_) => "PARSE_FAILURE",
            SchedulerError::CallbackNotFound { .. } => "CALLBACK_RESOLUTION_FAILURE",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::Persistence { .. } => "PERSISTENCE_FAILURE",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
