//! SQL generation for migrated comments.
//!
//! Comments are attached to posts through the [`TitleIndex`] written by the
//! post run, so the generated SQL carries literal `cid`s and needs no
//! lookups at import time. Reply chains are rebuilt in two passes: new
//! `coid`s are handed out in emission order first, then every parent
//! reference is rewritten through the old → new table.

use regex::Regex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::LazyLock;

use crate::models::{Comment, SourceComment};
use crate::normalize::slugify;
use crate::sql::{quote, SqlScript};
use crate::title_index::TitleIndex;

/// Trailing ` | Site Name` that themes append to page titles.
static SITE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\|\s+[^|]+$").expect("valid site suffix regex"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").expect("valid entity regex")
});

const COMMENTS_COLUMNS: &[&str] = &[
    "coid", "cid", "created", "author", "authorId", "ownerId", "mail", "url", "ip", "agent",
    "text", "type", "status", "parent",
];

#[derive(Debug, Clone)]
pub struct CommentSqlOptions {
    pub table_prefix: String,
    pub owner_id: i64,
    pub coid_start: i64,
    pub truncate: bool,
}

/// A page whose comments could not be attached to any post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPage {
    pub page_key: String,
    pub candidates: Vec<String>,
    pub comments: usize,
}

#[derive(Debug, Clone)]
pub struct CommentBatch {
    pub sql: String,
    /// Emitted comments, parents before children.
    pub comments: Vec<Comment>,
    pub skipped_pages: Vec<SkippedPage>,
    /// Per-post count of emitted comments.
    pub comment_counts: BTreeMap<i64, i64>,
    /// Comments whose timestamp fell back to the run time.
    pub untimed: usize,
    pub cycles_broken: usize,
    pub source_total: usize,
}

pub struct CommentSqlGenerator {
    options: CommentSqlOptions,
}

impl CommentSqlGenerator {
    pub fn new(options: CommentSqlOptions) -> Self {
        Self { options }
    }

    /// `source` must be in store order (ascending id). `run_time` stands in
    /// for timestamps the reader could not parse.
    pub fn generate(
        &self,
        source: &[SourceComment],
        index: &TitleIndex,
        run_time: i64,
    ) -> CommentBatch {
        let (kept, skipped_pages) = attach_pages(source, index);

        let mut parents = effective_parents(&kept);
        let cycles_broken = break_cycles(&kept, &mut parents);
        let order = emission_order(&parents);

        // Pass 1: new identifiers in emission order.
        let mut next = self.options.coid_start.max(1);
        let mut coids = HashMap::with_capacity(order.len());
        for &pos in &order {
            coids.insert(kept[pos].0.id, next);
            next += 1;
        }

        // Pass 2: rows with parents rewritten through the table.
        let mut comments = Vec::with_capacity(order.len());
        let mut comment_counts = BTreeMap::new();
        let mut untimed = 0;
        for &pos in &order {
            let (src, cid) = kept[pos];
            let parent = parents[pos]
                .and_then(|p| coids.get(&kept[p].0.id).copied())
                .unwrap_or(0);
            let created = src.created.unwrap_or_else(|| {
                untimed += 1;
                run_time
            });
            *comment_counts.entry(cid).or_insert(0) += 1;
            comments.push(Comment {
                coid: coids[&src.id],
                cid,
                parent,
                created,
                author: src.author.clone(),
                owner_id: self.options.owner_id,
                mail: src.mail.clone(),
                url: src.url.clone(),
                ip: src.ip.clone(),
                agent: src.agent.clone(),
                text: src.content.clone(),
                status: if src.is_pending { "waiting" } else { "approved" },
            });
        }

        let mut batch = CommentBatch {
            sql: String::new(),
            comments,
            skipped_pages,
            comment_counts,
            untimed,
            cycles_broken,
            source_total: source.len(),
        };
        batch.sql = self.render(&batch, next);
        batch
    }

    fn render(&self, batch: &CommentBatch, next_coid: i64) -> String {
        let mut script = SqlScript::begin(
            &self.options.table_prefix,
            &[
                "Generated by h2t comments",
                "Import target: Typecho comments (MySQL/MariaDB)",
            ],
        );

        if self.options.truncate {
            script.delete_all("comments");
        }

        script.section("Comment inserts");
        for c in &batch.comments {
            script.insert(
                "comments",
                COMMENTS_COLUMNS,
                &[
                    c.coid.to_string(),
                    c.cid.to_string(),
                    c.created.to_string(),
                    quote(&c.author),
                    "0".to_string(),
                    c.owner_id.to_string(),
                    quote(&c.mail),
                    quote(&c.url),
                    quote(&c.ip),
                    quote(&c.agent),
                    quote(&c.text),
                    quote("comment"),
                    quote(c.status),
                    c.parent.to_string(),
                ],
            );
        }

        script.section("Comment counters");
        let contents = script.table("contents");
        for (cid, count) in &batch.comment_counts {
            script.push(format!(
                "UPDATE {contents} SET `commentsNum` = {count} WHERE `cid` = {cid};"
            ));
        }

        script.section("Auto-increment");
        script.set_auto_increment("comments", next_coid);

        let mut footer = vec![
            format!("Total comments from Artalk: {}", batch.source_total),
            format!("Emitted comments: {}", batch.comments.len()),
            format!("Skipped pages: {}", batch.skipped_pages.len()),
        ];
        footer.extend(batch.skipped_pages.iter().map(|p| {
            format!(
                "Skipped {} ({} comments) candidates={}",
                p.page_key,
                p.comments,
                p.candidates.join(" | ")
            )
        }));
        script.commit(&footer)
    }
}

/// Pair each comment with its target `cid`; comments on unresolved pages
/// are dropped and reported per page.
fn attach_pages<'a>(
    source: &'a [SourceComment],
    index: &TitleIndex,
) -> (Vec<(&'a SourceComment, i64)>, Vec<SkippedPage>) {
    let mut resolved: HashMap<&str, Option<i64>> = HashMap::new();
    let mut skipped: Vec<SkippedPage> = Vec::new();
    let mut kept = Vec::with_capacity(source.len());

    for comment in source {
        let key = comment.page_key.as_str();
        let cid = *resolved.entry(key).or_insert_with(|| {
            let candidates = page_candidates(comment.page_title.as_deref(), key);
            let cid = resolve_page(&candidates, index);
            match cid {
                Some(cid) => tracing::debug!(page = key, cid, "matched page"),
                None => {
                    tracing::warn!(page = key, "no post matches page, skipping its comments");
                    skipped.push(SkippedPage {
                        page_key: key.to_string(),
                        candidates,
                        comments: 0,
                    });
                }
            }
            cid
        });

        match cid {
            Some(cid) => kept.push((comment, cid)),
            None => {
                if let Some(page) = skipped.iter_mut().find(|p| p.page_key == key) {
                    page.comments += 1;
                }
            }
        }
    }
    (kept, skipped)
}

/// Titles to try for a page: its cleaned title, then the last segment of
/// its key. Blank and duplicate candidates are dropped.
pub fn page_candidates(page_title: Option<&str>, page_key: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for candidate in [
        page_title.map(cleaned_page_title).unwrap_or_default(),
        title_from_page_key(page_key),
    ] {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// HTML entities are decoded one at a time; unknown ones stay as written.
fn cleaned_page_title(title: &str) -> String {
    let unescaped = ENTITY.replace_all(title, |caps: &regex::Captures| {
        let entity = &caps[0];
        quick_xml::escape::unescape_with(entity, quick_xml::escape::resolve_html5_entity)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| entity.to_string())
    });
    SITE_SUFFIX
        .replace(unescaped.trim(), "")
        .trim()
        .to_string()
}

fn title_from_page_key(page_key: &str) -> String {
    let path = page_key.split(['?', '#']).next().unwrap_or_default();
    let Some(last) = path.split('/').filter(|s| !s.is_empty()).last() else {
        return String::new();
    };
    let last = last
        .strip_suffix(".html")
        .or_else(|| last.strip_suffix(".htm"))
        .unwrap_or(last);
    urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string())
        .trim()
        .to_string()
}

/// Each candidate in turn: title (exact, then URL-decoded), then slug.
pub fn resolve_page(candidates: &[String], index: &TitleIndex) -> Option<i64> {
    candidates.iter().find_map(|candidate| {
        index.lookup_title(candidate).or_else(|| {
            let slug = slugify(candidate);
            (!slug.is_empty())
                .then(|| index.lookup_slug(&slug))
                .flatten()
        })
    })
}

/// Position of each comment's parent within `kept`, when the parent is
/// itself kept and sits on the same post.
fn effective_parents(kept: &[(&SourceComment, i64)]) -> Vec<Option<usize>> {
    let positions: HashMap<i64, usize> = kept
        .iter()
        .enumerate()
        .map(|(pos, (c, _))| (c.id, pos))
        .collect();

    kept.iter()
        .map(|(c, cid)| {
            if c.rid <= 0 || c.rid == c.id {
                return None;
            }
            let parent = positions.get(&c.rid).copied();
            match parent {
                Some(p) if kept[p].1 == *cid => Some(p),
                _ => {
                    tracing::debug!(comment = c.id, rid = c.rid, "parent not migrated, top-level");
                    None
                }
            }
        })
        .collect()
}

/// Detach the lowest-id member of every reply cycle. Returns how many
/// cycles were broken.
fn break_cycles(kept: &[(&SourceComment, i64)], parents: &mut [Option<usize>]) -> usize {
    #[derive(Clone, Copy, PartialEq)]
    enum Visit {
        New,
        Active,
        Done,
    }

    let mut state = vec![Visit::New; parents.len()];
    let mut broken = 0;

    for start in 0..parents.len() {
        let mut path = Vec::new();
        let mut cur = start;
        let cycle_entry = loop {
            match state[cur] {
                Visit::Done => break None,
                Visit::Active => break Some(cur),
                Visit::New => {}
            }
            state[cur] = Visit::Active;
            path.push(cur);
            match parents[cur] {
                Some(p) => cur = p,
                None => break None,
            }
        };

        if let Some(entry) = cycle_entry {
            let from = path.iter().position(|&n| n == entry).unwrap_or(0);
            if let Some(&lowest) = path[from..].iter().min_by_key(|&&n| kept[n].0.id) {
                tracing::warn!(comment = kept[lowest].0.id, "reply cycle, made top-level");
                parents[lowest] = None;
                broken += 1;
            }
        }
        for n in path {
            state[n] = Visit::Done;
        }
    }
    broken
}

/// Source order, except that a reply never precedes its parent.
fn emission_order(parents: &[Option<usize>]) -> Vec<usize> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); parents.len()];
    let mut ready = BinaryHeap::new();
    for (pos, parent) in parents.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(pos),
            None => ready.push(Reverse(pos)),
        }
    }

    let mut order = Vec::with_capacity(parents.len());
    while let Some(Reverse(pos)) = ready.pop() {
        order.push(pos);
        ready.extend(children[pos].iter().map(|&c| Reverse(c)));
    }
    order
}
