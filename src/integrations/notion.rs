use crate::engine::JournalSink;
use crate::error::{Result, SyncError};
use crate::integrations::http::{ApiClient, HttpError, HttpSettings, Retry};
use crate::marker::{format_marker, parse_marker};
use crate::models::JournalEntry;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const NOTION_API: &str = "https://api.notion.com";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: &str = "100";
const MAX_PAGES: usize = 200;
const MAX_RICH_TEXT_CHARS: usize = 2000;

#[derive(Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    DateHeading(NaiveDate),
    /// Any heading_1/heading_2 that is not a date; closes a section.
    Heading,
    Entry(String),
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBlock {
    pub id: String,
    pub kind: BlockKind,
}

/// Where new content goes on the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    After(String),
    End,
}

/// Top-level block structure of the journal page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageLayout {
    blocks: Vec<PageBlock>,
}

impl PageLayout {
    pub fn new(blocks: Vec<PageBlock>) -> Self {
        Self { blocks }
    }

    /// Index ranges `(heading, last)` of every section labeled `date`.
    fn sections(&self, date: NaiveDate) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.kind == BlockKind::DateHeading(date) {
                out.push((idx, self.section_end(idx)));
            }
        }
        out
    }

    fn section_end(&self, heading: usize) -> usize {
        let mut last = heading;
        for (idx, block) in self.blocks.iter().enumerate().skip(heading + 1) {
            if matches!(block.kind, BlockKind::DateHeading(_) | BlockKind::Heading) {
                break;
            }
            last = idx;
        }
        last
    }

    pub fn fingerprints(&self, date: NaiveDate) -> HashSet<String> {
        let mut found = HashSet::new();
        for (start, end) in self.sections(date) {
            for block in &self.blocks[start + 1..=end] {
                if let BlockKind::Entry(fingerprint) = &block.kind {
                    found.insert(fingerprint.clone());
                }
            }
        }
        found
    }

    pub fn has_section(&self, date: NaiveDate) -> bool {
        !self.sections(date).is_empty()
    }

    /// Insertion point for an entry under an existing section.
    pub fn entry_anchor(&self, date: NaiveDate) -> Option<usize> {
        self.sections(date).last().map(|&(_, end)| end)
    }

    /// Insertion point for a new section, keeping dates ascending.
    pub fn section_anchor(&self, date: NaiveDate) -> Option<usize> {
        let mut best: Option<(NaiveDate, usize)> = None;
        let mut first_heading: Option<usize> = None;
        for (idx, block) in self.blocks.iter().enumerate() {
            if let BlockKind::DateHeading(existing) = block.kind {
                first_heading.get_or_insert(idx);
                if existing < date && best.is_none_or(|(d, _)| existing >= d) {
                    best = Some((existing, idx));
                }
            }
        }
        if let Some((_, heading)) = best {
            return Some(self.section_end(heading));
        }
        match first_heading {
            Some(0) | None => None,
            Some(first) => Some(first - 1),
        }
    }

    pub fn placement(&self, anchor: Option<usize>) -> Placement {
        match anchor {
            Some(idx) if idx + 1 < self.blocks.len() => Placement::After(self.blocks[idx].id.clone()),
            _ => Placement::End,
        }
    }

    /// Records blocks created right after `anchor` (or at the end).
    pub fn insert_after(&mut self, anchor: Option<usize>, created: Vec<PageBlock>) {
        let at = match anchor {
            Some(idx) if idx < self.blocks.len() => idx + 1,
            _ => self.blocks.len(),
        };
        self.blocks.splice(at..at, created);
    }

    pub fn needs_out_of_order_section(&self, date: NaiveDate) -> bool {
        self.section_anchor(date).is_none()
            && self
                .blocks
                .iter()
                .any(|b| matches!(b.kind, BlockKind::DateHeading(d) if d > date))
    }
}

pub fn section_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d (%a)").to_string()
}

/// Reads the ISO date at the start of a heading label.
pub fn parse_section_label(text: &str) -> Option<NaiveDate> {
    let first = text.split_whitespace().next()?;
    NaiveDate::parse_from_str(first, "%Y-%m-%d").ok()
}

fn plain_text(block: &Value, block_type: &str) -> String {
    block
        .get(block_type)
        .and_then(|body| body.get("rich_text"))
        .and_then(|rich| rich.as_array())
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("plain_text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

pub fn classify_block(block: &Value) -> Option<PageBlock> {
    let id = block.get("id")?.as_str()?.to_string();
    let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let kind = match block_type {
        "heading_1" | "heading_2" => {
            let text = plain_text(block, block_type);
            match (block_type, parse_section_label(&text)) {
                ("heading_2", Some(date)) => BlockKind::DateHeading(date),
                _ => BlockKind::Heading,
            }
        }
        "bulleted_list_item" => match parse_marker(&plain_text(block, block_type)) {
            Some(fingerprint) => BlockKind::Entry(fingerprint),
            None => BlockKind::Other,
        },
        _ => BlockKind::Other,
    };
    Some(PageBlock { id, kind })
}

fn text_runs(text: &str) -> Vec<Value> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(MAX_RICH_TEXT_CHARS)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            json!({"type": "text", "text": {"content": content}})
        })
        .collect()
}

pub fn heading_block(date: NaiveDate) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": {"rich_text": text_runs(&section_label(date))}
    })
}

pub fn entry_block(entry: &JournalEntry) -> Value {
    let mut runs = text_runs(&entry.text);
    runs.push(json!({
        "type": "text",
        "text": {"content": format!(" {}", format_marker(&entry.fingerprint))},
        "annotations": {"color": "gray"}
    }));
    json!({
        "object": "block",
        "type": "bulleted_list_item",
        "bulleted_list_item": {"rich_text": runs}
    })
}

fn title_of(page: &Value) -> Option<String> {
    let properties = page.get("properties")?.as_object()?;
    let title = properties
        .get("title")
        .or_else(|| properties.get("Name"))
        .or_else(|| {
            properties
                .values()
                .find(|prop| prop.get("type").and_then(|t| t.as_str()) == Some("title"))
        })?;
    let runs = title.get("title")?.as_array()?;
    Some(
        runs.iter()
            .filter_map(|run| run.get("plain_text").and_then(|t| t.as_str()))
            .collect(),
    )
}

fn is_trashed(page: &Value) -> bool {
    ["archived", "in_trash"]
        .iter()
        .any(|key| page.get(*key).and_then(|v| v.as_bool()).unwrap_or(false))
}

fn sink_error(err: HttpError) -> SyncError {
    match err.status() {
        Some(StatusCode::NOT_FOUND) | Some(StatusCode::CONFLICT) | Some(StatusCode::BAD_REQUEST) => {
            SyncError::conflict(format!("Notion {err}"))
        }
        _ => SyncError::sink_unavailable(format!("Notion {err}")),
    }
}

pub struct NotionSink {
    api: ApiClient,
    page_id: String,
    layout: Option<PageLayout>,
}

impl NotionSink {
    /// Resolves and verifies the journal page. A configured id wins; otherwise
    /// the page is looked up by exact title.
    pub fn connect(
        base_url: &str,
        token: &str,
        page_id: Option<&str>,
        page_title: &str,
        settings: HttpSettings,
    ) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(SyncError::config("NOTION_TOKEN is empty"));
        }
        let api = ApiClient::new(
            base_url,
            token.trim(),
            &[("notion-version", NOTION_VERSION)],
            settings,
        )
        .map_err(|e| SyncError::sink_unavailable(e.to_string()))?;

        let page_id = match page_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => find_page_by_title(&api, page_title)?,
        };
        verify_page(&api, &page_id)?;
        info!(page_id = %page_id, "journal page ready");

        Ok(Self {
            api,
            page_id,
            layout: None,
        })
    }

    #[cfg(test)]
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    fn layout(&mut self) -> Result<&mut PageLayout> {
        if self.layout.is_none() {
            let blocks = self.load_blocks()?;
            debug!(blocks = blocks.len(), "loaded journal page structure");
            self.layout = Some(PageLayout::new(blocks));
        }
        self.layout
            .as_mut()
            .ok_or_else(|| SyncError::sink_unavailable("journal page structure unavailable"))
    }

    fn load_blocks(&self) -> Result<Vec<PageBlock>> {
        let path = format!("/v1/blocks/{}/children", self.page_id);
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![("page_size", PAGE_SIZE.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("start_cursor", cursor.clone()));
            }
            let page: ChildrenPage = self.api.get_json(&path, &query).map_err(sink_error)?;
            blocks.extend(page.results.iter().filter_map(classify_block));
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => return Ok(blocks),
            }
        }
        Err(SyncError::sink_unavailable(format!(
            "journal page listing did not finish after {MAX_PAGES} pages"
        )))
    }

    fn append_children(&self, children: Vec<Value>, placement: &Placement) -> Result<Vec<PageBlock>> {
        let path = format!("/v1/blocks/{}/children", self.page_id);
        let sent = children.len();
        let mut body = json!({ "children": children });
        if let Placement::After(anchor) = placement {
            body["after"] = json!(anchor);
        }
        let response: ChildrenPage = self.api.patch_json(&path, &body).map_err(sink_error)?;
        let created: Vec<PageBlock> = response.results.iter().filter_map(classify_block).collect();
        if created.len() < sent {
            return Err(SyncError::sink_unavailable(format!(
                "Notion returned {} of {} appended blocks",
                created.len(),
                sent
            )));
        }
        Ok(created)
    }

    /// An append that failed in transit may still have landed. Re-reads the
    /// page so the outcome is decided by what is actually there.
    fn reconcile_unconfirmed(
        &mut self,
        date: NaiveDate,
        entry: &JournalEntry,
        err: SyncError,
    ) -> Result<()> {
        match self.layout() {
            Ok(layout) if layout.fingerprints(date).contains(&entry.fingerprint) => {
                info!(date = %date, fingerprint = %entry.fingerprint, "append landed despite error");
                Ok(())
            }
            Ok(_) => Err(err),
            Err(reload) => {
                warn!(date = %date, error = %reload, "could not re-read page after failed append");
                Err(err)
            }
        }
    }
}

impl JournalSink for NotionSink {
    fn read_existing_fingerprints(&mut self, date: NaiveDate) -> Result<HashSet<String>> {
        Ok(self.layout()?.fingerprints(date))
    }

    fn append_entry(&mut self, date: NaiveDate, entry: &JournalEntry) -> Result<()> {
        let layout = self.layout()?.clone();
        let (anchor, children) = if layout.has_section(date) {
            (layout.entry_anchor(date), vec![entry_block(entry)])
        } else {
            if layout.needs_out_of_order_section(date) {
                warn!(date = %date, "no earlier section or preamble; appending section at page end");
            }
            (
                layout.section_anchor(date),
                vec![heading_block(date), entry_block(entry)],
            )
        };
        let placement = layout.placement(anchor);
        let sent = children.len();

        match self.append_children(children, &placement) {
            Ok(created) => {
                // Some API versions echo more than the new blocks; keep the tail.
                let fresh: Vec<PageBlock> = created[created.len() - sent..].to_vec();
                let anchor = match placement {
                    Placement::After(_) => anchor,
                    Placement::End => None,
                };
                if let Some(layout) = self.layout.as_mut() {
                    layout.insert_after(anchor, fresh);
                }
                Ok(())
            }
            Err(err) => {
                // The page may have changed under us; reload before the next write.
                self.layout = None;
                if err.blocks_date() {
                    return Err(err);
                }
                self.reconcile_unconfirmed(date, entry, err)
            }
        }
    }
}


fn find_page_by_title(api: &ApiClient, title: &str) -> Result<String> {
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_PAGES {
        let mut body = json!({
            "query": title,
            "filter": {"property": "object", "value": "page"},
            "page_size": 100
        });
        if let Some(cursor) = &cursor {
            body["start_cursor"] = json!(cursor);
        }
        let response: SearchResponse = api
            .post_json("/v1/search", &body, Retry::Allowed)
            .map_err(sink_error_config)?;
        let found = response
            .results
            .iter()
            .filter(|page| page.get("object").and_then(|o| o.as_str()) == Some("page"))
            .filter(|page| !is_trashed(page))
            .find(|page| title_of(page).as_deref() == Some(title))
            .and_then(|page| page.get("id").and_then(|id| id.as_str()).map(str::to_string));
        if let Some(id) = found {
            return Ok(id);
        }
        match response.next_cursor {
            Some(next) if response.has_more => cursor = Some(next),
            _ => break,
        }
    }
    Err(SyncError::config(format!("Notion page titled `{title}` not found")))
}

fn verify_page(api: &ApiClient, page_id: &str) -> Result<()> {
    let page: Value = api
        .get_json(&format!("/v1/pages/{page_id}"), &[])
        .map_err(sink_error_config)?;
    if is_trashed(&page) {
        return Err(SyncError::config(format!(
            "Notion journal page {page_id} is archived"
        )));
    }
    Ok(())
}

/// Page resolution happens before any run; a missing page is a setup problem.
fn sink_error_config(err: HttpError) -> SyncError {
    match sink_error(err) {
        SyncError::SinkConflict(msg) => SyncError::Configuration(msg),
        other => other,
    }
}
