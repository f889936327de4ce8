//! SQL generation for posts, categories and tags.
//!
//! Produces inserts for Typecho's `contents`, `metas` and `relationships`
//! tables inside one transaction, plus the [`TitleIndex`] the comment run
//! needs.
//!
//! Identifier assignment:
//!
//! ```text
//! posts (batch order) ──▶ slug registry ──▶ cid = cid_start, cid_start+1, …
//!                                  │
//!                                  └──▶ categories, tags ──▶ taxonomy registry
//!                                                              (kind, name) → mid
//! ```

use std::collections::{HashMap, HashSet};

use crate::models::{Exclusion, Post, Relationship, TaxonomyTerm, TermKind};
use crate::normalize::{slugify, SlugRegistry};
use crate::sql::{quote, SqlScript};
use crate::title_index::TitleIndex;

const CONTENTS_COLUMNS: &[&str] = &[
    "cid",
    "title",
    "slug",
    "created",
    "modified",
    "text",
    "order",
    "authorId",
    "template",
    "type",
    "status",
    "password",
    "commentsNum",
    "allowComment",
    "allowPing",
    "allowFeed",
    "parent",
];

const METAS_COLUMNS: &[&str] = &[
    "mid",
    "name",
    "slug",
    "type",
    "description",
    "count",
    "order",
    "parent",
];

/// Typecho renders a post as Markdown only when its text starts with this.
const MARKDOWN_MARKER: &str = "<!--markdown-->";
const MORE_MARKER: &str = "<!--more-->";

#[derive(Debug, Clone)]
pub struct PostSqlOptions {
    pub table_prefix: String,
    pub author_id: i64,
    pub cid_start: i64,
    pub mid_start: i64,
    pub truncate: bool,
}

/// A post with its assigned `cid`.
#[derive(Debug, Clone)]
pub struct NumberedPost {
    pub cid: i64,
    pub post: Post,
}

/// Everything the post run produces.
#[derive(Debug, Clone)]
pub struct PostBatch {
    pub sql: String,
    pub posts: Vec<NumberedPost>,
    pub terms: Vec<TaxonomyTerm>,
    pub relationships: Vec<Relationship>,
    pub title_index: TitleIndex,
    pub excluded: Vec<Exclusion>,
}

/// Arena of taxonomy terms keyed by (kind, normalized name).
#[derive(Debug)]
pub struct TaxonomyRegistry {
    next_mid: i64,
    ids: HashMap<(TermKind, String), usize>,
    terms: Vec<TaxonomyTerm>,
    slugs: HashMap<TermKind, SlugRegistry>,
}

impl TaxonomyRegistry {
    pub fn new(mid_start: i64) -> Self {
        Self {
            next_mid: mid_start.max(1),
            ids: HashMap::new(),
            terms: Vec::new(),
            slugs: HashMap::new(),
        }
    }

    /// Arena index of a term, registering it on first sight.
    pub fn intern(&mut self, kind: TermKind, name: &str) -> usize {
        let key = (kind, name.trim().to_lowercase());
        if let Some(&idx) = self.ids.get(&key) {
            return idx;
        }

        let mid = self.next_mid;
        self.next_mid += 1;

        let base = match slugify(name) {
            s if s.is_empty() => format!("{}-{mid}", kind.as_str()),
            s => s,
        };
        let slug = self
            .slugs
            .entry(kind)
            .or_default()
            .claim(&base)
            .unwrap_or_else(|| format!("{base}-{mid}"));

        let idx = self.terms.len();
        self.ids.insert(key, idx);
        self.terms.push(TaxonomyTerm {
            mid,
            kind,
            name: name.trim().to_string(),
            slug,
            count: 0,
        });
        idx
    }

    pub fn term(&self, idx: usize) -> &TaxonomyTerm {
        &self.terms[idx]
    }

    fn bump(&mut self, idx: usize) {
        self.terms[idx].count += 1;
    }

    pub fn into_terms(self) -> Vec<TaxonomyTerm> {
        self.terms
    }
}

pub struct PostSqlGenerator {
    options: PostSqlOptions,
}

impl PostSqlGenerator {
    pub fn new(options: PostSqlOptions) -> Self {
        Self { options }
    }

    /// Assign identifiers and render SQL. `posts` must already be in batch
    /// order; that order decides cids and which duplicate keeps its slug.
    pub fn generate(&self, posts: Vec<Post>) -> PostBatch {
        let mut slugs = SlugRegistry::new();
        let mut taxonomy = TaxonomyRegistry::new(self.options.mid_start);
        let mut numbered = Vec::with_capacity(posts.len());
        let mut relationships = Vec::new();
        let mut excluded = Vec::new();
        let mut title_index = TitleIndex::new();
        let mut next_cid = self.options.cid_start.max(1);

        for mut post in posts {
            let Some(slug) = slugs.claim(&post.slug) else {
                excluded.push(Exclusion::new(
                    post.source_path.display().to_string(),
                    format!("slug '{}' collides and no free suffix remains", post.slug),
                ));
                continue;
            };
            if slug != post.slug {
                tracing::info!(
                    path = %post.source_path.display(),
                    "slug '{}' already taken, using '{}'", post.slug, slug
                );
                post.slug = slug;
            }

            let cid = next_cid;
            next_cid += 1;

            let mut seen = HashSet::new();
            let mut sort = 0;
            let terms = post
                .categories
                .iter()
                .map(|name| (TermKind::Category, name))
                .chain(post.tags.iter().map(|name| (TermKind::Tag, name)));
            for (kind, name) in terms {
                let idx = taxonomy.intern(kind, name);
                if seen.insert(idx) {
                    sort += 1;
                    taxonomy.bump(idx);
                    let mid = taxonomy.term(idx).mid;
                    relationships.push(Relationship { cid, mid, sort });
                }
            }

            title_index.insert(&post.title, &post.slug, cid);
            numbered.push(NumberedPost { cid, post });
        }

        let terms = taxonomy.into_terms();
        let sql = self.render(&numbered, &terms, &relationships, &excluded);

        PostBatch {
            sql,
            posts: numbered,
            terms,
            relationships,
            title_index,
            excluded,
        }
    }

    fn render(
        &self,
        posts: &[NumberedPost],
        terms: &[TaxonomyTerm],
        relationships: &[Relationship],
        excluded: &[Exclusion],
    ) -> String {
        let mut script = SqlScript::begin(
            &self.options.table_prefix,
            &[
                "Generated by h2t posts",
                "Import target: Typecho (MySQL/MariaDB)",
            ],
        );

        if self.options.truncate {
            script.delete_all("relationships");
            script.delete_all("metas");
            script.delete_all("contents");
        }

        script.section("Contents");
        let author_id = self.options.author_id.max(1).to_string();
        for NumberedPost { cid, post } in posts {
            script.insert(
                "contents",
                CONTENTS_COLUMNS,
                &[
                    cid.to_string(),
                    quote(&post.title),
                    quote(&post.slug),
                    post.created_at.timestamp().to_string(),
                    post.updated_at.timestamp().to_string(),
                    quote(&compose_text(&post.body, &post.excerpt)),
                    "0".to_string(),
                    author_id.clone(),
                    "NULL".to_string(),
                    quote(post.doc_type.as_str()),
                    quote(post.status.as_str()),
                    "NULL".to_string(),
                    "0".to_string(),
                    quote("1"),
                    quote("1"),
                    quote("1"),
                    "0".to_string(),
                ],
            );
        }

        script.section("Metas (categories/tags)");
        for term in terms {
            script.insert(
                "metas",
                METAS_COLUMNS,
                &[
                    term.mid.to_string(),
                    quote(&term.name),
                    quote(&term.slug),
                    quote(term.kind.as_str()),
                    quote(""),
                    term.count.to_string(),
                    "0".to_string(),
                    "0".to_string(),
                ],
            );
        }

        script.section("Relationships");
        for rel in relationships {
            script.insert(
                "relationships",
                &["cid", "mid"],
                &[rel.cid.to_string(), rel.mid.to_string()],
            );
        }

        let next_cid = posts
            .iter()
            .map(|p| p.cid)
            .max()
            .map_or(self.options.cid_start, |max| max + 1);
        let next_mid = terms
            .iter()
            .map(|t| t.mid)
            .max()
            .map_or(self.options.mid_start, |max| max + 1);

        script.section("Auto-increment");
        script.set_auto_increment("contents", next_cid);
        script.set_auto_increment("metas", next_mid);

        let mut footer = vec![
            format!("Posts: {}", posts.len()),
            format!("Terms: {}", terms.len()),
        ];
        footer.extend(
            excluded
                .iter()
                .map(|e| format!("Excluded {}: {}", e.source, e.reason)),
        );
        script.commit(&footer)
    }
}

/// Join excerpt and body with Typecho's `<!--more-->` marker and prepend
/// the Markdown marker.
pub fn compose_text(body: &str, excerpt: &str) -> String {
    let body = body.trim();
    let summary = excerpt.trim();
    let merged = if summary.is_empty() || body.contains(MORE_MARKER) {
        body.to_string()
    } else if body.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n\n{MORE_MARKER}\n\n{body}")
    };

    if merged.starts_with(MARKDOWN_MARKER) {
        merged
    } else {
        format!("{MARKDOWN_MARKER}{merged}")
    }
}
