//! Conversion runs.
//!
//! `posts`: scan → front matter → normalize → rewrite → batch order →
//! SQL + title index. `comments`: title index + Artalk store → SQL.
//!
//! Output files are written whole or not at all: the content is rendered
//! in memory, written to a temporary file next to the target and renamed
//! over it. A posts run stages the SQL and the title index before renaming
//! either.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::artalk;
use crate::comment_sql::{CommentSqlGenerator, CommentSqlOptions};
use crate::config::{CommentsConfig, PostsConfig};
use crate::connector_fs;
use crate::frontmatter::{default_parser, split_front_matter};
use crate::models::{Exclusion, PostStatus, TermKind};
use crate::normalize::{normalize_post, NormalizeOptions};
use crate::post_sql::{PostSqlGenerator, PostSqlOptions};
use crate::rewrite::{rewrite_body, AssetRewrite};
use crate::title_index::TitleIndex;

/// Counts from a `posts` run.
#[derive(Debug, Clone)]
pub struct PostsReport {
    pub scanned: usize,
    pub written: usize,
    pub drafts_skipped: usize,
    pub excluded: Vec<Exclusion>,
    pub categories: usize,
    pub tags: usize,
    pub relationships: usize,
    pub rewritten_links: usize,
    /// Front matter authors other than the configured one. Typecho keys
    /// posts by `authorId`, so these all land on that single user.
    pub other_authors: BTreeSet<String>,
}

/// Counts from a `comments` run.
#[derive(Debug, Clone)]
pub struct CommentsReport {
    pub read: usize,
    pub written: usize,
    pub pages: usize,
    pub skipped_pages: usize,
    pub skipped_comments: usize,
    pub pending: usize,
    pub untimed: usize,
}

pub fn run_posts(config: &PostsConfig) -> Result<PostsReport> {
    let encoding = config.output_encoding()?;
    let posts_dir = connector_fs::resolve_source_dir(&config.source)?;
    let docs = connector_fs::scan_posts(&posts_dir, config.include_drafts)?;
    let scanned = docs.len();

    let parser = default_parser();
    tracing::debug!(parser = parser.name(), "front matter parser");
    let options = NormalizeOptions {
        default_author: config.author.clone(),
        run_time: Utc::now(),
    };

    let mut posts = Vec::with_capacity(docs.len());
    let mut excluded = Vec::new();
    let mut drafts_skipped = 0;
    let mut rewritten_links = 0;

    for doc in docs {
        let (meta, body) = split_front_matter(&doc.text, parser.as_ref());
        if meta.is_empty() {
            tracing::debug!(path = %doc.path.display(), "no front matter");
        }
        let mut post = match normalize_post(&meta, &body, &doc, &options) {
            Ok(post) => post,
            Err(exclusion) => {
                tracing::warn!(path = %exclusion.source, "excluded: {}", exclusion.reason);
                excluded.push(exclusion);
                continue;
            }
        };

        if post.status != PostStatus::Publish && !config.include_drafts {
            tracing::debug!(path = %doc.path.display(), status = post.status.as_str(), "skipping draft");
            drafts_skipped += 1;
            continue;
        }

        let outcome = rewrite_body(
            &post.body,
            config.math_underscore_mode,
            AssetRewrite {
                mode: config.asset_mode,
                url_prefix: &config.asset_url_prefix,
                asset_dir: post.asset_dir.as_deref(),
            },
        );
        if outcome.unresolved_relative {
            tracing::warn!(
                path = %doc.path.display(),
                "relative images found but no asset folder matched"
            );
        }
        post.body = outcome.text;
        post.rewritten_links = outcome.rewritten;
        rewritten_links += outcome.rewritten;
        posts.push(post);
    }

    posts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.source_path.cmp(&b.source_path))
    });

    let generator = PostSqlGenerator::new(PostSqlOptions {
        table_prefix: config.table_prefix.clone(),
        author_id: config.author_id,
        cid_start: config.cid_start,
        mid_start: config.mid_start,
        truncate: config.truncate,
    });
    let batch = generator.generate(posts);
    for exclusion in &batch.excluded {
        tracing::warn!(path = %exclusion.source, "excluded: {}", exclusion.reason);
    }
    excluded.extend(batch.excluded.iter().cloned());

    let sql = encoding.encode(&batch.sql);
    let index_json = batch.title_index.to_json()?;
    write_all_atomic(&[
        (config.output.as_path(), sql.as_slice()),
        (config.title_index.as_path(), index_json.as_bytes()),
    ])?;

    let report = PostsReport {
        scanned,
        written: batch.posts.len(),
        drafts_skipped,
        excluded,
        categories: batch
            .terms
            .iter()
            .filter(|t| t.kind == TermKind::Category)
            .count(),
        tags: batch.terms.iter().filter(|t| t.kind == TermKind::Tag).count(),
        relationships: batch.relationships.len(),
        rewritten_links,
        other_authors: batch
            .posts
            .iter()
            .map(|p| p.post.author.clone())
            .filter(|author| *author != config.author)
            .collect(),
    };

    println!("posts {}", posts_dir.display());
    println!("  scanned: {} files", report.scanned);
    println!("  posts written: {}", report.written);
    if !config.include_drafts {
        println!("  drafts skipped: {}", report.drafts_skipped);
    }
    println!("  categories: {}", report.categories);
    println!("  tags: {}", report.tags);
    println!("  relationships: {}", report.relationships);
    println!("  asset links rewritten: {}", report.rewritten_links);
    if !report.other_authors.is_empty() {
        let names: Vec<_> = report.other_authors.iter().map(String::as_str).collect();
        println!(
            "  authors mapped to authorId {}: {}",
            config.author_id,
            names.join(", ")
        );
    }
    println!("  excluded: {}", report.excluded.len());
    for exclusion in &report.excluded {
        println!("    {}: {}", exclusion.source, exclusion.reason);
    }
    println!("  output: {}", config.output.display());
    println!("  title index: {}", config.title_index.display());
    println!("ok");

    Ok(report)
}

pub async fn run_comments(config: &CommentsConfig) -> Result<CommentsReport> {
    let encoding = config.output_encoding()?;
    let index = TitleIndex::load(&config.title_index)
        .context("The title index is written by `h2t posts`; run it first")?;
    tracing::info!(titles = index.len(), "loaded title index");

    let source = artalk::read_comments(&config.db).await?;

    let generator = CommentSqlGenerator::new(CommentSqlOptions {
        table_prefix: config.table_prefix.clone(),
        owner_id: config.owner_id,
        coid_start: config.coid_start,
        truncate: config.truncate,
    });
    let batch = generator.generate(&source, &index, Utc::now().timestamp());

    write_atomic(&config.output, &encoding.encode(&batch.sql))?;

    let report = CommentsReport {
        read: source.len(),
        written: batch.comments.len(),
        pages: source
            .iter()
            .map(|c| c.page_key.as_str())
            .collect::<HashSet<_>>()
            .len(),
        skipped_pages: batch.skipped_pages.len(),
        skipped_comments: batch.skipped_pages.iter().map(|p| p.comments).sum(),
        pending: batch
            .comments
            .iter()
            .filter(|c| c.status == "waiting")
            .count(),
        untimed: batch.untimed,
    };

    println!("comments {}", config.db.display());
    println!("  read: {} comments on {} pages", report.read, report.pages);
    println!("  comments written: {}", report.written);
    println!("  pending: {}", report.pending);
    println!(
        "  skipped: {} comments on {} unmatched pages",
        report.skipped_comments, report.skipped_pages
    );
    for page in &batch.skipped_pages {
        println!("    {} ({})", page.page_key, page.candidates.join(" | "));
    }
    if report.untimed > 0 {
        println!("  timestamps replaced with run time: {}", report.untimed);
    }
    if batch.cycles_broken > 0 {
        println!("  reply cycles broken: {}", batch.cycles_broken);
    }
    println!("  output: {}", config.output.display());
    println!("ok");

    Ok(report)
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_all_atomic(&[(path, bytes)])
}

/// Write several outputs together. Every file is staged before any target
/// is replaced, so a failure while staging leaves all targets untouched.
pub fn write_all_atomic(outputs: &[(&Path, &[u8])]) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(outputs.len());
    for &(path, bytes) in outputs {
        match stage(path, bytes) {
            Ok(tmp) => staged.push((tmp, path)),
            Err(err) => {
                discard(staged.iter().map(|(tmp, _)| tmp));
                return Err(err);
            }
        }
    }

    for (i, (tmp, path)) in staged.iter().enumerate() {
        if let Err(err) = std::fs::rename(tmp, path) {
            discard(staged[i..].iter().map(|(tmp, _)| tmp));
            return Err(err).with_context(|| format!("Failed to replace {}", path.display()));
        }
        tracing::debug!(path = %path.display(), "wrote output");
    }
    Ok(())
}

fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Output path has no file name: {}", path.display()))?;
    let tmp: PathBuf = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    if let Err(err) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("Failed to write {}", tmp.display()));
    }
    Ok(tmp)
}

fn discard<'a>(tmps: impl Iterator<Item = &'a PathBuf>) {
    for tmp in tmps {
        let _ = std::fs::remove_file(tmp);
    }
}
