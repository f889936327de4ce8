//! Core data models shared by the conversion pipeline.
//!
//! Source-side records ([`RawDocument`], [`SourceComment`]) come from the
//! filesystem scan and the Artalk store; target-side records ([`Post`],
//! [`Comment`]) are what the SQL generators turn into rows.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One discovered source file before parsing.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub path: PathBuf,
    /// Name used when nothing better is available: the file stem, or the
    /// parent directory for `index.md` / `README.md` inside a folder.
    pub stem: String,
    pub text: String,
    pub modified: Option<DateTime<Utc>>,
    /// Asset folder matched to this post, if any.
    pub asset_dir: Option<String>,
    /// File lives under a `_drafts` directory.
    pub in_drafts: bool,
}

/// Typecho content status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    Publish,
    Draft,
    Private,
    Hidden,
    Waiting,
}

impl PostStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "publish" => Some(Self::Publish),
            "draft" => Some(Self::Draft),
            "private" => Some(Self::Private),
            "hidden" => Some(Self::Hidden),
            "waiting" => Some(Self::Waiting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Draft => "draft",
            Self::Private => "private",
            Self::Hidden => "hidden",
            Self::Waiting => "waiting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Post,
    Page,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Page => "page",
        }
    }
}

/// Normalized post, ready for identifier assignment.
#[derive(Debug, Clone)]
pub struct Post {
    pub source_path: PathBuf,
    pub title: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Informational. Contents rows carry the configured `authorId` only.
    pub author: String,
    pub status: PostStatus,
    pub doc_type: DocType,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub excerpt: String,
    pub body: String,
    pub asset_dir: Option<String>,
    pub rewritten_links: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TermKind {
    Category,
    Tag,
}

impl TermKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Tag => "tag",
        }
    }
}

/// A category or tag row in the metas table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyTerm {
    pub mid: i64,
    pub kind: TermKind,
    pub name: String,
    pub slug: String,
    pub count: i64,
}

/// A post ↔ term link. `sort` is the 1-based position of the term on the
/// post, categories first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub cid: i64,
    pub mid: i64,
    pub sort: i64,
}

/// One Artalk comment joined with its author and page.
#[derive(Debug, Clone)]
pub struct SourceComment {
    pub id: i64,
    /// Unix seconds; `None` when the store's timestamp could not be parsed.
    pub created: Option<i64>,
    pub page_key: String,
    pub page_title: Option<String>,
    pub content: String,
    pub author: String,
    pub mail: String,
    pub url: String,
    pub ip: String,
    pub agent: String,
    /// Id of the comment this one replies to, 0 for top-level.
    pub rid: i64,
    pub is_pending: bool,
}

/// A comment row for the Typecho comments table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub coid: i64,
    pub cid: i64,
    pub parent: i64,
    pub created: i64,
    pub author: String,
    pub owner_id: i64,
    pub mail: String,
    pub url: String,
    pub ip: String,
    pub agent: String,
    pub text: String,
    pub status: &'static str,
}

/// A record left out of the output, with the reason shown in the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub source: String,
    pub reason: String,
}

impl Exclusion {
    pub fn new(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reason: reason.into(),
        }
    }
}
