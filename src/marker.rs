//! Fingerprint markers embedded in journal entries.
//!
//! A tracked entry carries a run of the form `⟦reflog:v1:<fingerprint>⟧`,
//! written last but allowed to have text typed after it. Only this exact
//! shape identifies content written by the sync job; free text is never used
//! to infer identity. New versions get a new tag and the
//! parser keeps accepting the old ones.

use regex::Regex;
use std::sync::OnceLock;

const CURRENT_VERSION: &str = "v1";
const KNOWN_VERSIONS: &[&str] = &["v1"];
const FINGERPRINT_NAMESPACE: &str = "todoist";

/// Fingerprint of a task, derived from its id only.
pub fn fingerprint_for(task_id: &str) -> String {
    format!("{FINGERPRINT_NAMESPACE}:{}", task_id.trim())
}

pub fn format_marker(fingerprint: &str) -> String {
    format!("⟦reflog:{CURRENT_VERSION}:{fingerprint}⟧")
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"⟦reflog:(v\d+):([A-Za-z0-9_-]+:[^\s⟦⟧]+)⟧").expect("valid marker regex")
    })
}

/// Extracts the fingerprint of the last recognised marker in an entry's text.
pub fn parse_marker(text: &str) -> Option<String> {
    marker_regex()
        .captures_iter(text)
        .filter(|caps| KNOWN_VERSIONS.contains(&&caps[1]))
        .last()
        .map(|caps| caps[2].to_string())
}
