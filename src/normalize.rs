//! Field normalization: front matter + body → [`Post`].
//!
//! Every lookup tolerates a missing field. The rules:
//!
//! | Field | Source | Default |
//! |-------|--------|---------|
//! | title | `title` | file stem |
//! | slug | `slug` → file stem → title | excluded if none slugifies |
//! | created | `date` | file mtime, then run time |
//! | updated | `updated` | created |
//! | status | `status` → `draft`/`published` → `_drafts` location | publish |
//! | type | `layout: page` | post |
//! | categories, tags | scalar or list | empty |
//! | excerpt | `excerpt` → `description` | empty |

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::frontmatter::{MetaValue, Metadata};
use crate::models::{DocType, Exclusion, Post, PostStatus, RawDocument};

/// Highest numeric suffix tried before a slug is declared irreconcilable.
const MAX_SLUG_SUFFIX: usize = 10_000;

static OFFSET_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)\s*(Z|[+-]\d{2}:?\d{2})$").expect("valid offset regex")
});

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub default_author: String,
    /// Used when neither `date` nor the file mtime is available.
    pub run_time: DateTime<Utc>,
}

/// Build a [`Post`] from parsed front matter. The body is stored as given
/// (trimmed); rewriting happens afterwards.
pub fn normalize_post(
    meta: &Metadata,
    body: &str,
    doc: &RawDocument,
    options: &NormalizeOptions,
) -> Result<Post, Exclusion> {
    let source = doc.path.display().to_string();

    let title = meta
        .get_text("title")
        .unwrap_or_else(|| doc.stem.trim().to_string());

    let slug = [meta.get_text("slug"), Some(doc.stem.clone()), Some(title.clone())]
        .into_iter()
        .flatten()
        .map(|candidate| slugify(&candidate))
        .find(|slug| !slug.is_empty())
        .ok_or_else(|| Exclusion::new(&source, "no title or slug can be derived"))?;

    let title = if title.is_empty() { slug.clone() } else { title };

    let fallback_time = doc.modified.unwrap_or(options.run_time);
    let created_at = match meta.get("date") {
        Some(MetaValue::Null) | None => fallback_time,
        Some(value) => parse_date(value).unwrap_or_else(|| {
            tracing::warn!(path = %source, "unparsable date {:?}, using file time", value);
            fallback_time
        }),
    };
    let updated_at = meta
        .get("updated")
        .and_then(parse_date)
        .unwrap_or(created_at);

    let author = meta
        .get_text("author")
        .unwrap_or_else(|| options.default_author.clone());

    let excerpt = meta
        .get_text("excerpt")
        .or_else(|| meta.get_text("description"))
        .unwrap_or_default();

    let doc_type = match meta.get_text("layout") {
        Some(layout) if layout.eq_ignore_ascii_case("page") => DocType::Page,
        _ => DocType::Post,
    };

    Ok(Post {
        source_path: doc.path.clone(),
        title,
        slug,
        created_at,
        updated_at,
        author,
        status: normalize_status(meta, doc.in_drafts),
        doc_type,
        categories: normalize_list(meta.get("categories")),
        tags: normalize_list(meta.get("tags")),
        excerpt,
        body: body.trim().to_string(),
        asset_dir: doc.asset_dir.clone(),
        rewritten_links: 0,
    })
}

/// URL-safe slug: lowercase letters, digits and single `-` separators.
/// Everything else becomes a separator.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

pub fn normalize_status(meta: &Metadata, in_drafts: bool) -> PostStatus {
    if let Some(status) = meta.get_text("status").and_then(|s| PostStatus::parse(&s)) {
        return status;
    }
    if meta.get_bool("draft") == Some(true) || meta.get_bool("published") == Some(false) {
        return PostStatus::Draft;
    }
    if in_drafts {
        return PostStatus::Draft;
    }
    PostStatus::Publish
}

/// Flatten a category/tag field into a deduplicated list.
///
/// Scalars become one item (a `[a, b]`-shaped string is split), nested
/// lists are flattened, and maps contribute `name` or all their values.
pub fn normalize_list(value: Option<&MetaValue>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(value) = value {
        flatten_into(value, &mut out);
    }
    dedupe(out)
}

fn flatten_into(value: &MetaValue, out: &mut Vec<String>) {
    match value {
        MetaValue::Null => {}
        MetaValue::List(items) => items.iter().for_each(|item| flatten_into(item, out)),
        MetaValue::Map(map) => match map.get("name") {
            Some(name) => flatten_into(name, out),
            None => map.values().for_each(|item| flatten_into(item, out)),
        },
        MetaValue::Str(s) => {
            let trimmed = s.trim();
            match trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                Some(inner) => out.extend(
                    inner
                        .split(',')
                        .map(|part| part.trim().trim_matches(['\'', '"']).to_string()),
                ),
                None => out.push(trimmed.to_string()),
            }
        }
        scalar => out.extend(scalar.as_text()),
    }
}

/// Trim, drop empties and keep the first occurrence of each item.
pub fn dedupe(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

/// Parse a front matter date. Integers are unix seconds; strings accept
/// RFC 3339 and `YYYY-MM-DD[ HH:MM[:SS[.f]]]` with `-` or `/`, an optional
/// `T` separator and optional offset. Naive values are local time.
pub fn parse_date(value: &MetaValue) -> Option<DateTime<Utc>> {
    match value {
        MetaValue::Int(secs) => Utc.timestamp_opt(*secs, 0).single(),
        MetaValue::Float(secs) => Utc.timestamp_opt(secs.trunc() as i64, 0).single(),
        MetaValue::Str(text) => parse_date_str(text),
        _ => None,
    }
}

pub fn parse_date_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    let mut normalized = text.replace('/', "-");
    if normalized.as_bytes().get(10) == Some(&b'T') {
        normalized.replace_range(10..11, " ");
    }

    let (naive_part, offset) = match OFFSET_SUFFIX.captures(&normalized) {
        Some(caps) if caps[1].len() > 10 => (caps[1].to_string(), parse_offset(&caps[2])),
        _ => (normalized.clone(), None),
    };

    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&naive_part, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(&naive_part, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    match offset {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    if text == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if text.starts_with('-') { -1 } else { 1 };
    let digits: String = text[1..].chars().filter(|c| *c != ':').collect();
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Hands out batch-unique slugs. The first claimant keeps the slug; later
/// ones get the lowest free `-2`, `-3`, … suffix.
#[derive(Debug, Default)]
pub struct SlugRegistry {
    taken: HashSet<String>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `slug` or its first free suffixed form. `None` when every
    /// suffix up to the limit is taken.
    pub fn claim(&mut self, slug: &str) -> Option<String> {
        if self.taken.insert(slug.to_string()) {
            return Some(slug.to_string());
        }
        (2..=MAX_SLUG_SUFFIX)
            .map(|n| format!("{slug}-{n}"))
            .find(|candidate| self.taken.insert(candidate.clone()))
    }
}
