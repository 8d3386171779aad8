use crate::config::{Config, Credentials};
use crate::engine::{EngineOptions, SyncEngine};
use crate::error::SyncError;
use crate::integrations::notion::NotionSink;
use crate::integrations::todoist::TodoistSource;
use crate::mapper::EntryMapper;
use crate::models::SyncWindow;
use chrono::{DateTime, Utc};
use tracing::info;

/// Everything one run needs, built once and dropped when the run ends.
pub struct SyncContext {
    pub source: TodoistSource,
    pub sink: NotionSink,
    pub mapper: EntryMapper,
    pub window: SyncWindow,
    pub options: EngineOptions,
}

impl SyncContext {
    pub fn build(
        config: &Config,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let zone = config.zone()?;
        let settings = config.http.settings();
        let window = SyncWindow::trailing(now, config.sync.lookback_days)?;
        info!(
            project = %config.source.project,
            zone = %zone,
            lookback_days = config.sync.lookback_days,
            dry_run = config.sync.dry_run,
            "preparing sync run"
        );

        let source = TodoistSource::new(
            &config.source.api_base,
            &credentials.todoist_token,
            &config.source.project,
            settings.clone(),
        )?;
        let sink = NotionSink::connect(
            &config.journal.api_base,
            &credentials.notion_token,
            config.page_id(),
            config.journal.page_title.trim(),
            settings,
        )?;

        Ok(Self {
            source,
            sink,
            mapper: EntryMapper::new(zone),
            window,
            options: EngineOptions {
                dry_run: config.sync.dry_run,
            },
        })
    }

    pub fn into_engine(self) -> (SyncEngine<TodoistSource, NotionSink>, SyncWindow) {
        let engine = SyncEngine::new(self.source, self.sink, self.mapper, self.options);
        (engine, self.window)
    }
}
