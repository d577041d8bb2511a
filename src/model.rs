use std::collections::BTreeSet;

use serde::Serialize;

/// Identifiers already reported for one site. Only ever grows.
pub type KnownIds = BTreeSet<String>;

/// One listing entry as scraped during the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    pub id: String,
    pub title: String,
    pub price: String,
    pub url: String,
    pub site_id: String,
}

impl ItemRecord {
    /// Title if present, otherwise the URL. Used for human-facing lines.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub new_items: Vec<ItemRecord>,
    pub unchanged_count: usize,
}
