//! Task records to dated journal entries. Pure, no I/O.

use crate::error::SyncError;
use crate::marker::fingerprint_for;
use crate::models::{DateGroup, JournalEntry, Task};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Timezone whose calendar decides which section an entry lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JournalZone {
    Local,
    Fixed(FixedOffset),
}

impl JournalZone {
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "local" => return Ok(JournalZone::Local),
            "utc" | "z" | "gmt" => return Ok(JournalZone::Fixed(utc_offset())),
            _ => {}
        }
        parse_offset(trimmed)
            .map(JournalZone::Fixed)
            .ok_or_else(|| {
                SyncError::config(format!(
                    "unsupported timezone `{trimmed}` (use `local`, `UTC` or an offset like `+09:00`)"
                ))
            })
    }

    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        match self {
            JournalZone::Local => at.with_timezone(&Local).date_naive(),
            JournalZone::Fixed(offset) => at.with_timezone(offset).date_naive(),
        }
    }
}

impl fmt::Display for JournalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalZone::Local => write!(f, "local"),
            JournalZone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value
        .strip_prefix("UTC")
        .or_else(|| value.strip_prefix("utc"))
        .unwrap_or(value);
    let (sign, rest) = match value.chars().next()? {
        '+' => (1, &value[1..]),
        '-' => (-1, &value[1..]),
        _ => return None,
    };
    if !rest.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || minutes.len() > 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[derive(Clone, Copy, Debug)]
pub struct EntryMapper {
    zone: JournalZone,
}

impl EntryMapper {
    pub fn new(zone: JournalZone) -> Self {
        Self { zone }
    }

    /// Groups tasks by local calendar date, oldest date first. Within a date
    /// entries follow completion time, ties ordered by fingerprint.
    pub fn map(&self, tasks: &[Task]) -> Vec<DateGroup> {
        let mut seen = HashSet::new();
        let mut by_date: BTreeMap<NaiveDate, Vec<JournalEntry>> = BTreeMap::new();

        for task in tasks {
            let fingerprint = fingerprint_for(&task.id);
            if !seen.insert(fingerprint.clone()) {
                continue;
            }
            let date = self.zone.date_of(task.completed_at);
            by_date.entry(date).or_default().push(JournalEntry {
                fingerprint,
                task_id: task.id.clone(),
                date,
                text: task.text.trim().to_string(),
                completed_at: task.completed_at,
            });
        }

        by_date
            .into_iter()
            .map(|(date, mut entries)| {
                entries.sort_by(|left, right| {
                    left.completed_at
                        .cmp(&right.completed_at)
                        .then_with(|| left.fingerprint.cmp(&right.fingerprint))
                });
                DateGroup { date, entries }
            })
            .collect()
    }
}
