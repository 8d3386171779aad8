use crate::engine::TaskSource;
use crate::error::{Result, SyncError};
use crate::integrations::http::{ApiClient, HttpError, HttpSettings};
use crate::models::{SyncWindow, Task};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, info};

pub const TODOIST_API: &str = "https://api.todoist.com";
const PAGE_LIMIT: &str = "200";
// Guards against a server that keeps handing back cursors.
const MAX_PAGES: usize = 500;

#[derive(Deserialize)]
struct ProjectsPage {
    #[serde(default)]
    results: Vec<RemoteProject>,
    next_cursor: Option<String>,
}

#[derive(Deserialize, Clone)]
struct RemoteProject {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CompletedPage {
    #[serde(default)]
    items: Vec<CompletedTask>,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct CompletedTask {
    id: String,
    #[serde(default)]
    content: String,
    completed_at: Option<String>,
    project_id: Option<String>,
}

pub struct TodoistSource {
    api: ApiClient,
    project_name: String,
    project_id: Option<String>,
}

impl TodoistSource {
    pub fn new(
        base_url: &str,
        token: &str,
        project_name: &str,
        settings: HttpSettings,
    ) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(SyncError::config("TODOIST_TOKEN is empty"));
        }
        let api = ApiClient::new(base_url, token.trim(), &[], settings)
            .map_err(|e| SyncError::source_unavailable(e.to_string()))?;
        Ok(Self {
            api,
            project_name: project_name.trim().to_string(),
            project_id: None,
        })
    }

    fn resolve_project_id(&mut self) -> Result<String> {
        if let Some(id) = &self.project_id {
            return Ok(id.clone());
        }
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page: ProjectsPage = self
                .api
                .get_json("/api/v1/projects", &query)
                .map_err(source_error)?;
            if let Some(project) = page
                .results
                .iter()
                .find(|project| project.name == self.project_name)
            {
                info!(project = %project.name, id = %project.id, "found project");
                self.project_id = Some(project.id.clone());
                return Ok(project.id.clone());
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Err(SyncError::config(format!(
            "Todoist project `{}` not found",
            self.project_name
        )))
    }
}

impl TaskSource for TodoistSource {
    fn fetch_reflection_tasks(&mut self, window: &SyncWindow) -> Result<Vec<Task>> {
        let project_id = self.resolve_project_id()?;
        let since = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let until = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut tasks = Vec::new();
        let mut cursor: Option<String> = None;
        for page_index in 0..MAX_PAGES {
            let mut query = vec![
                ("since", since.clone()),
                ("until", until.clone()),
                ("project_id", project_id.clone()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page: CompletedPage = self
                .api
                .get_json("/api/v1/tasks/completed/by_completion_date", &query)
                .map_err(source_error)?;
            debug!(page = page_index, items = page.items.len(), "completed tasks page");

            for item in page.items {
                if item.project_id.as_deref().is_some_and(|id| id != project_id) {
                    continue;
                }
                let Some(raw) = item.completed_at.as_deref() else {
                    continue;
                };
                let completed_at = parse_timestamp(raw)?;
                if !window.contains(completed_at) {
                    continue;
                }
                tasks.push(Task {
                    id: item.id,
                    text: item.content,
                    completed_at,
                    project: self.project_name.clone(),
                });
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tasks),
            }
        }
        Err(SyncError::source_unavailable(format!(
            "completed task listing did not finish after {MAX_PAGES} pages"
        )))
    }
}

fn source_error(err: HttpError) -> SyncError {
    SyncError::source_unavailable(format!("Todoist {err}"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::source_unavailable(format!("invalid completed_at `{raw}`: {e}")))
}
