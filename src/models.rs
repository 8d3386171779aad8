use crate::error::SyncError;
use chrono::{DateTime, Duration, NaiveDate, Utc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub text: String,
    pub completed_at: DateTime<Utc>,
    pub project: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub fingerprint: String,
    pub task_id: String,
    pub date: NaiveDate,
    pub text: String,
    pub completed_at: DateTime<Utc>,
}

/// Entries of one calendar date, in write order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub entries: Vec<JournalEntry>,
}

/// Half-open completion window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn trailing(end: DateTime<Utc>, days: u32) -> Result<Self, SyncError> {
        let start = Duration::try_days(i64::from(days))
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| SyncError::config(format!("lookback of {days} days is out of range")))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedEntry {
    pub task_id: String,
    pub date: NaiveDate,
    pub error: SyncError,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub written: usize,
    pub skipped: usize,
    pub failed: Vec<FailedEntry>,
    /// Nothing was sent; `written` counts entries that would have been.
    pub dry_run: bool,
}

impl RunResult {
    pub fn summary(&self) -> String {
        let line = format!(
            "Written {} | Skipped {} | Failed {}",
            self.written,
            self.skipped,
            self.failed.len()
        );
        if self.dry_run {
            format!("[dry run] {line}")
        } else {
            line
        }
    }
}
