//! Post title → `cid` lookup shared between the post and comment runs.
//!
//! The post run writes it as JSON next to its SQL; the comment run loads
//! it to attach Artalk pages to the migrated posts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleIndex {
    titles: BTreeMap<String, i64>,
    #[serde(default)]
    slugs: BTreeMap<String, i64>,
}

/// Trim and collapse internal whitespace.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl TitleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a post. On duplicate titles the lowest `cid` is kept.
    pub fn insert(&mut self, title: &str, slug: &str, cid: i64) {
        let title = normalize_title(title);
        if !title.is_empty() {
            let entry = self.titles.entry(title).or_insert(cid);
            *entry = (*entry).min(cid);
        }
        if !slug.is_empty() {
            let entry = self.slugs.entry(slug.to_string()).or_insert(cid);
            *entry = (*entry).min(cid);
        }
    }

    /// Exact title match, then the URL-decoded form of the title.
    pub fn lookup_title(&self, title: &str) -> Option<i64> {
        let exact = normalize_title(title);
        if let Some(cid) = self.titles.get(&exact) {
            return Some(*cid);
        }
        let decoded = urlencoding::decode(title).ok()?;
        self.titles.get(&normalize_title(&decoded)).copied()
    }

    pub fn lookup_slug(&self, slug: &str) -> Option<i64> {
        self.slugs.get(slug).copied()
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read title index: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse title index: {}", path.display()))
    }
}
