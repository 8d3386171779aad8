//! One sync run: fetch, map, dedup against the journal, write.

use crate::error::{Result, SyncError};
use crate::mapper::EntryMapper;
use crate::models::{DateGroup, FailedEntry, JournalEntry, RunResult, SyncWindow, Task};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

pub trait TaskSource {
    /// Completed tasks of the configured project inside `window`.
    fn fetch_reflection_tasks(&mut self, window: &SyncWindow) -> Result<Vec<Task>>;
}

pub trait JournalSink {
    /// Fingerprints of tracked entries under the section for `date`. Never
    /// creates content; a missing section yields an empty set.
    fn read_existing_fingerprints(&mut self, date: NaiveDate) -> Result<HashSet<String>>;

    /// Appends `entry` at the end of the section for `date`, creating the
    /// section in chronological position when absent.
    fn append_entry(&mut self, date: NaiveDate, entry: &JournalEntry) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Fetching,
    Mapping,
    Deduplicating,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Fetching => "fetching",
            RunState::Mapping => "mapping",
            RunState::Deduplicating => "deduplicating",
            RunState::Writing => "writing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A run that could not reach the writing phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub state: RunState,
    pub error: SyncError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run failed while {}: {}", self.state, self.error)
    }
}

impl std::error::Error for RunFailure {}

#[derive(Clone, Copy, Debug, Default)]
pub struct EngineOptions {
    pub dry_run: bool,
}

/// Per-date plan after deduplication.
struct DatePlan {
    date: NaiveDate,
    pending: Vec<JournalEntry>,
    blocked: Option<SyncError>,
}

pub struct SyncEngine<S, J> {
    source: S,
    sink: J,
    mapper: EntryMapper,
    options: EngineOptions,
    state: RunState,
}

impl<S: TaskSource, J: JournalSink> SyncEngine<S, J> {
    pub fn new(source: S, sink: J, mapper: EntryMapper, options: EngineOptions) -> Self {
        Self {
            source,
            sink,
            mapper,
            options,
            state: RunState::Fetching,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    #[cfg(test)]
    pub fn sink(&self) -> &J {
        &self.sink
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (S, J) {
        (self.source, self.sink)
    }

    pub fn run(&mut self, window: &SyncWindow) -> std::result::Result<RunResult, RunFailure> {
        self.state = RunState::Fetching;
        info!(start = %window.start, end = %window.end, "fetching reflection tasks");
        let tasks = match self.source.fetch_reflection_tasks(window) {
            Ok(tasks) => tasks,
            Err(err) => return Err(self.fail(err)),
        };
        info!(count = tasks.len(), "fetched tasks");
        for task in &tasks {
            debug!(task_id = %task.id, project = %task.project, completed_at = %task.completed_at, "candidate task");
        }

        self.state = RunState::Mapping;
        let groups = self.mapper.map(&tasks);
        debug!(dates = groups.len(), "mapped tasks into date groups");

        self.state = RunState::Deduplicating;
        let mut result = RunResult {
            dry_run: self.options.dry_run,
            ..RunResult::default()
        };
        let plans = match self.deduplicate(groups, &mut result) {
            Ok(plans) => plans,
            Err(err) => return Err(self.fail(err)),
        };

        self.state = RunState::Writing;
        for plan in plans {
            self.write_date(plan, &mut result);
        }

        self.state = RunState::Done;
        info!(
            written = result.written,
            skipped = result.skipped,
            failed = result.failed.len(),
            dry_run = self.options.dry_run,
            "sync run finished"
        );
        Ok(result)
    }

    fn fail(&mut self, error: SyncError) -> RunFailure {
        let failure = RunFailure {
            state: self.state,
            error,
        };
        error!(state = %failure.state, error = %failure.error, "sync run failed");
        self.state = RunState::Failed;
        failure
    }

    /// Reads each date's existing fingerprints exactly once, before any write.
    fn deduplicate(
        &mut self,
        groups: Vec<DateGroup>,
        result: &mut RunResult,
    ) -> Result<Vec<DatePlan>> {
        let mut plans = Vec::with_capacity(groups.len());
        for group in groups {
            let existing = match self.sink.read_existing_fingerprints(group.date) {
                Ok(existing) => existing,
                Err(err) if err.blocks_date() => {
                    warn!(date = %group.date, error = %err, "cannot read journal section");
                    plans.push(DatePlan {
                        date: group.date,
                        pending: group.entries,
                        blocked: Some(err.for_date(group.date)),
                    });
                    continue;
                }
                Err(err) => return Err(err.for_date(group.date)),
            };

            let mut pending = Vec::new();
            for entry in group.entries {
                if existing.contains(&entry.fingerprint) {
                    debug!(date = %group.date, task_id = %entry.task_id, "already in journal");
                    result.skipped += 1;
                } else {
                    pending.push(entry);
                }
            }
            plans.push(DatePlan {
                date: group.date,
                pending,
                blocked: None,
            });
        }
        Ok(plans)
    }

    fn write_date(&mut self, plan: DatePlan, result: &mut RunResult) {
        let mut blocked = plan.blocked;
        for entry in plan.pending {
            if let Some(err) = &blocked {
                record_failure(result, &entry, err.clone());
                continue;
            }
            if self.options.dry_run {
                info!(date = %plan.date, task_id = %entry.task_id, text = %entry.text, "would write entry");
                result.written += 1;
                continue;
            }
            match self.sink.append_entry(plan.date, &entry) {
                Ok(()) => {
                    debug!(date = %plan.date, task_id = %entry.task_id, "entry written");
                    result.written += 1;
                }
                Err(err) => {
                    let err = err.for_date(plan.date);
                    if err.blocks_date() {
                        blocked = Some(err.clone());
                    }
                    record_failure(result, &entry, err);
                }
            }
        }
    }
}

fn record_failure(result: &mut RunResult, entry: &JournalEntry, error: SyncError) {
    warn!(
        date = %entry.date,
        task_id = %entry.task_id,
        error = %error,
        "entry not written"
    );
    result.failed.push(FailedEntry {
        task_id: entry.task_id.clone(),
        date: entry.date,
        error,
    });
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    pub struct FakeSource {
        pub tasks: Vec<Task>,
        pub error: Option<SyncError>,
    }

    impl FakeSource {
        pub fn with(tasks: Vec<Task>) -> Self {
            Self { tasks, error: None }
        }
    }

    impl TaskSource for FakeSource {
        fn fetch_reflection_tasks(&mut self, window: &SyncWindow) -> Result<Vec<Task>> {
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            Ok(self
                .tasks
                .iter()
                .filter(|task| window.contains(task.completed_at))
                .cloned()
                .collect())
        }
    }

    /// Document modeled as ordered sections of (fingerprint, text) lines.
    #[derive(Default, Clone, Debug, PartialEq, Eq)]
    pub struct FakeJournal {
        pub sections: BTreeMap<NaiveDate, Vec<(String, String)>>,
        pub fail_writes_for: HashSet<String>,
        pub write_errors: HashMap<String, SyncError>,
        pub read_errors: HashMap<NaiveDate, SyncError>,
        pub reads: Vec<NaiveDate>,
        pub appends: usize,
    }

    impl FakeJournal {
        pub fn content(&self) -> BTreeMap<NaiveDate, Vec<(String, String)>> {
            self.sections.clone()
        }

        pub fn seed(&mut self, date: NaiveDate, fingerprint: &str, text: &str) {
            self.sections
                .entry(date)
                .or_default()
                .push((fingerprint.to_string(), text.to_string()));
        }
    }

    impl JournalSink for FakeJournal {
        fn read_existing_fingerprints(&mut self, date: NaiveDate) -> Result<HashSet<String>> {
            self.reads.push(date);
            if let Some(err) = self.read_errors.get(&date) {
                return Err(err.clone());
            }
            Ok(self
                .sections
                .get(&date)
                .map(|lines| lines.iter().map(|(fp, _)| fp.clone()).collect())
                .unwrap_or_default())
        }

        fn append_entry(&mut self, date: NaiveDate, entry: &JournalEntry) -> Result<()> {
            self.appends += 1;
            if let Some(err) = self.write_errors.get(&entry.task_id) {
                return Err(err.clone());
            }
            if self.fail_writes_for.contains(&entry.task_id) {
                return Err(SyncError::sink_unavailable("HTTP 502 Bad Gateway"));
            }
            self.sections
                .entry(date)
                .or_default()
                .push((entry.fingerprint.clone(), entry.text.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeJournal, FakeSource};
    use super::*;
    use crate::mapper::JournalZone;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, 0, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn task(id: &str, text: &str, completed_at: DateTime<Utc>) -> Task {
        Task {
            id: id.to_string(),
            text: text.to_string(),
            completed_at,
            project: "Reflections".to_string(),
        }
    }

    // Mon 2026-10-12 and Tue 2026-10-13.
    fn scenario_tasks() -> Vec<Task> {
        vec![
            task("1", "A", utc(12, 9)),
            task("2", "B", utc(12, 18)),
            task("3", "C", utc(13, 10)),
        ]
    }

    fn window() -> SyncWindow {
        SyncWindow::trailing(utc(19, 0), 7).unwrap()
    }

    fn engine(tasks: Vec<Task>, journal: FakeJournal) -> SyncEngine<FakeSource, FakeJournal> {
        let mapper = EntryMapper::new(JournalZone::parse("UTC").unwrap());
        SyncEngine::new(
            FakeSource::with(tasks),
            journal,
            mapper,
            EngineOptions::default(),
        )
    }

    #[test]
    fn first_run_creates_monday_and_tuesday_sections() {
        let mut engine = engine(scenario_tasks(), FakeJournal::default());
        let result = engine.run(&window()).expect("run");
        assert_eq!(result.written, 3);
        assert_eq!(result.skipped, 0);
        assert!(result.failed.is_empty());
        assert_eq!(engine.state(), RunState::Done);

        let content = engine.sink().content();
        assert_eq!(content.len(), 2);
        assert_eq!(
            content[&date(12)],
            vec![
                ("todoist:1".to_string(), "A".to_string()),
                ("todoist:2".to_string(), "B".to_string())
            ]
        );
        assert_eq!(content[&date(13)], vec![("todoist:3".to_string(), "C".to_string())]);
    }

    #[test]
    fn rerun_writes_only_missing_entries() {
        let mut journal = FakeJournal::default();
        journal.seed(date(12), "todoist:1", "A");
        journal.seed(date(13), "todoist:3", "C");

        let mut engine = engine(scenario_tasks(), journal);
        let result = engine.run(&window()).expect("run");
        assert_eq!(result.written, 1);
        assert_eq!(result.skipped, 2);
        assert!(result.failed.is_empty());
        assert_eq!(engine.sink().appends, 1);
    }

    #[test]
    fn write_failure_is_isolated_and_run_succeeds() {
        let mut journal = FakeJournal::default();
        journal.fail_writes_for.insert("2".to_string());

        let mut engine = engine(scenario_tasks(), journal);
        let result = engine.run(&window()).expect("run completes");
        assert_eq!(result.written, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].task_id, "2");
        assert_eq!(result.failed[0].date, date(12));
        assert!(matches!(result.failed[0].error, SyncError::SinkUnavailable(_)));
        assert_eq!(engine.state(), RunState::Done);
    }

    #[test]
    fn failed_entry_is_written_exactly_once_on_next_healthy_run() {
        let mut journal = FakeJournal::default();
        journal.fail_writes_for.insert("2".to_string());
        let mut first = engine(scenario_tasks(), journal);
        first.run(&window()).expect("first run");

        let (_, mut journal) = first.into_parts();
        journal.fail_writes_for.clear();
        journal.appends = 0;
        let mut second = engine(scenario_tasks(), journal);
        let result = second.run(&window()).expect("second run");
        assert_eq!(result.written, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(second.sink().appends, 1);

        let monday = &second.sink().content()[&date(12)];
        let ids: Vec<&str> = monday.iter().map(|(fp, _)| fp.as_str()).collect();
        assert_eq!(ids, vec!["todoist:1", "todoist:2"]);
    }

    #[test]
    fn running_twice_matches_running_once() {
        let mut once = engine(scenario_tasks(), FakeJournal::default());
        once.run(&window()).expect("run");
        let after_once = once.sink().content();

        let (_, journal) = once.into_parts();
        let mut twice = engine(scenario_tasks(), journal);
        let result = twice.run(&window()).expect("rerun");
        assert_eq!(result.written, 0);
        assert_eq!(result.skipped, 3);
        assert_eq!(twice.sink().content(), after_once);
    }

    #[test]
    fn reads_each_date_once_before_writing() {
        let mut engine = engine(scenario_tasks(), FakeJournal::default());
        engine.run(&window()).expect("run");
        assert_eq!(engine.sink().reads, vec![date(12), date(13)]);
    }

    #[test]
    fn fetch_failure_fails_run_without_writes() {
        let mut source = FakeSource::with(scenario_tasks());
        source.error = Some(SyncError::source_unavailable("HTTP 401 Unauthorized"));
        let mapper = EntryMapper::new(JournalZone::parse("UTC").unwrap());
        let mut engine = SyncEngine::new(
            source,
            FakeJournal::default(),
            mapper,
            EngineOptions::default(),
        );
        let failure = engine.run(&window()).unwrap_err();
        assert_eq!(failure.state, RunState::Fetching);
        assert!(matches!(failure.error, SyncError::SourceUnavailable(_)));
        assert_eq!(engine.state(), RunState::Failed);
        assert_eq!(engine.sink().appends, 0);
    }

    #[test]
    fn unavailable_sink_during_dedup_fails_run() {
        let mut journal = FakeJournal::default();
        journal
            .read_errors
            .insert(date(13), SyncError::sink_unavailable("connection reset"));
        let mut engine = engine(scenario_tasks(), journal);
        let failure = engine.run(&window()).unwrap_err();
        assert_eq!(failure.state, RunState::Deduplicating);
        assert_eq!(engine.sink().appends, 0);
    }

    #[test]
    fn conflict_on_one_date_does_not_stop_other_dates() {
        let mut journal = FakeJournal::default();
        journal.write_errors.insert(
            "1".to_string(),
            SyncError::conflict("section heading is not a date"),
        );
        let mut engine = engine(scenario_tasks(), journal);
        let result = engine.run(&window()).expect("run");
        assert_eq!(result.written, 1);
        let failed: Vec<&str> = result.failed.iter().map(|f| f.task_id.as_str()).collect();
        assert_eq!(failed, vec!["1", "2"]);
        // Task 2 is never attempted once its date is blocked.
        assert_eq!(engine.sink().appends, 2);
    }

    #[test]
    fn conflict_on_read_marks_date_failed() {
        let mut journal = FakeJournal::default();
        journal
            .read_errors
            .insert(date(12), SyncError::conflict("unexpected block layout"));
        let mut engine = engine(scenario_tasks(), journal);
        let result = engine.run(&window()).expect("run");
        assert_eq!(result.written, 1);
        assert_eq!(result.failed.len(), 2);
        assert!(result.failed.iter().all(|f| f.date == date(12)));
    }

    #[test]
    fn dry_run_counts_without_writing() {
        let mut journal = FakeJournal::default();
        journal.seed(date(12), "todoist:1", "A");
        let mapper = EntryMapper::new(JournalZone::parse("UTC").unwrap());
        let mut engine = SyncEngine::new(
            FakeSource::with(scenario_tasks()),
            journal,
            mapper,
            EngineOptions { dry_run: true },
        );
        let result = engine.run(&window()).expect("run");
        assert_eq!(result.written, 2);
        assert_eq!(result.skipped, 1);
        assert!(result.dry_run);
        assert!(result.summary().starts_with("[dry run] Written 2"));
        assert_eq!(engine.sink().appends, 0);
    }

    #[test]
    fn empty_task_set_completes_with_zero_counts() {
        let mut engine = engine(Vec::new(), FakeJournal::default());
        let result = engine.run(&window()).expect("run");
        assert_eq!(result, RunResult::default());
        assert!(engine.sink().reads.is_empty());
    }
}
