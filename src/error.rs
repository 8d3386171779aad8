//! Error taxonomy for a sync run.

use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Missing or invalid project, page, credential or setting. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Task tracker unreachable, unauthorized or returned garbage.
    #[error("task source unavailable: {0}")]
    SourceUnavailable(String),

    /// Note service unreachable, unauthorized or returned garbage.
    #[error("journal sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The journal page exists in a shape this job cannot write into.
    #[error("journal structure conflict: {0}")]
    SinkConflict(String),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable(message.into())
    }

    pub fn sink_unavailable(message: impl Into<String>) -> Self {
        Self::SinkUnavailable(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::SinkConflict(message.into())
    }

    /// True when every further write to the same date would fail the same way.
    pub fn blocks_date(&self) -> bool {
        matches!(self, SyncError::SinkConflict(_))
    }

    /// Adds the date being processed to the message, keeping the variant.
    pub fn for_date(self, date: NaiveDate) -> Self {
        let tag = date.format("%Y-%m-%d");
        match self {
            SyncError::Configuration(msg) => SyncError::Configuration(format!("{tag}: {msg}")),
            SyncError::SourceUnavailable(msg) => {
                SyncError::SourceUnavailable(format!("{tag}: {msg}"))
            }
            SyncError::SinkUnavailable(msg) => SyncError::SinkUnavailable(format!("{tag}: {msg}")),
            SyncError::SinkConflict(msg) => SyncError::SinkConflict(format!("{tag}: {msg}")),
        }
    }
}
